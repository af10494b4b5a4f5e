//! Runtime
//!
//! The [`AccessProcessor`] serializes every request from the application
//! and from task completion onto one thread, which owns the
//! [`VersionStore`](crate::data::VersionStore) and the
//! [`TaskAnalyser`](crate::graph::TaskAnalyser).
//!
//! [`collab`] holds the traits the processor reports to, plus in-process
//! implementations of them.

pub mod collab;
mod processor;
mod request;

pub use collab::{Collaborators, InMemoryBackend, ReadyQueue, RecordingObserver};
pub use processor::AccessProcessor;
