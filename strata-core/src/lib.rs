//! Strata Core
//!
//! This crate provides the dependency and data-versioning engine of the
//! Strata task-parallel runtime. Tasks are submitted in program order;
//! the engine works out which of them consume what others produce and
//! reports each task once it can run.
//!
//! It implements:
//!
//! - Versioned data: every write to a file or object creates a new version
//!   with its own renaming, so readers of an old version are never disturbed
//! - Dependency tracking from a last-writer table
//! - Safe deletion of versions nobody can read anymore
//! - A single-threaded request processor that serializes all of the above
//!
//! # Architecture
//!
//! - `data`: version store, identifiers and the storage collaborator trait
//! - `graph`: tasks, the dependency graph and its analyser
//! - `runtime`: the access processor and its collaborators
//! - `config`, `error`, `reply`: ambient plumbing
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_core::config::RuntimeConfig;
//! use strata_core::data::DataLocation;
//! use strata_core::graph::{AppId, Direction, TaskDescription, TaskOutcome};
//! use strata_core::runtime::{AccessProcessor, Collaborators, InMemoryBackend, ReadyQueue};
//!
//! let ready = ReadyQueue::new();
//! let processor = AccessProcessor::start(
//!     RuntimeConfig::default(),
//!     Collaborators::new(ready.clone(), InMemoryBackend::new()),
//! )?;
//!
//! let app = AppId(1);
//! let out = DataLocation::local("/data/out.txt");
//! let producer = processor.new_task(
//!     TaskDescription::method(app, "Stage", "produce").file(Direction::Out, out.clone()),
//! )?;
//! let consumer = processor.new_task(
//!     TaskDescription::method(app, "Stage", "consume").file(Direction::In, out),
//! )?;
//!
//! // only the producer is ready; the consumer follows once it ends
//! processor.notify_task_end(TaskOutcome::finished(producer))?;
//! processor.notify_task_end(TaskOutcome::finished(consumer))?;
//! processor.barrier(app)?;
//! processor.shutdown()?;
//! # Ok::<(), strata_core::error::RuntimeError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod graph;
#[cfg(feature = "logging")]
pub mod logging;
pub mod reply;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use runtime::AccessProcessor;
