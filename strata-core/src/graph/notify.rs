//! Outbound notifications of the dependency tracker.
//!
//! [`ReadyNotifier`] is the only output the rest of the runtime needs: a
//! task with no unresolved predecessors. [`GraphObserver`] is purely
//! observational and never read back.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::task::{ReadyTask, TaskId};
use crate::data::DataInstanceId;

/// Receives tasks that may be scheduled.
pub trait ReadyNotifier: Send {
    /// Called from the request processor thread. Must not block.
    fn task_ready(&mut self, task: ReadyTask);
}

/// One end of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphNode {
    Task(TaskId),
    /// The application's main program.
    Main,
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "{id}"),
            Self::Main => f.write_str("main"),
        }
    }
}

/// A dependency as drawn in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: GraphNode,
    pub target: GraphNode,
    /// Version carried along the edge, if the edge comes from data.
    pub data: Option<DataInstanceId>,
}

impl GraphEdge {
    pub fn new(source: GraphNode, target: GraphNode, data: Option<DataInstanceId>) -> Self {
        Self {
            source,
            target,
            data,
        }
    }
}

/// Receives graph structure for visualization.
pub trait GraphObserver: Send {
    fn add_task(&mut self, task_id: TaskId, name: &str);
    fn add_edge(&mut self, edge: GraphEdge);
    /// A synchronization point was reached; buffered output may be flushed.
    fn commit(&mut self);
}
