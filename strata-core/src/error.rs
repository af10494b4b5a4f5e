//! Runtime Errors
//!
//! Every fallible operation of the engine reports a [`RuntimeError`]. The
//! type is `Clone` because a single failure (a task that ended in error, a
//! processor that went away) is usually delivered to several blocked callers
//! at once.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{AppId, TaskId};

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Identity and context of a task that ended in the FAILED state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub app_id: AppId,
    pub name: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} ({}) of application {}",
            self.task_id, self.name, self.app_id
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The access processor no longer accepts requests (shutdown has begun
    /// or its thread is gone).
    #[error("queue offer failed: the access processor is not accepting requests")]
    QueueClosed,

    /// The processor dropped a request without answering it.
    #[error("request was dropped before a reply was produced")]
    ReplyDropped,

    #[error("task failed: {0}")]
    TaskFailed(TaskFailure),

    #[error("transfer of {renaming} failed: {reason}")]
    Transfer { renaming: String, reason: String },

    #[error("unknown data: {0}")]
    UnknownData(String),

    #[error("failed to spawn the access processor thread: {0}")]
    Spawn(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl RuntimeError {
    /// Whether the error means the engine can no longer guarantee a correct
    /// execution for its caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::QueueClosed | Self::TaskFailed(_))
    }
}
