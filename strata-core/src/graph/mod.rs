//! Dependency Graph
//!
//! This module implements the task dependency graph that orders tasks
//! issued in sequential program order.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are live tasks, from submission until their end is processed
//! - Edges are data dependencies: if B reads what A wrote, there is an edge
//!   from A to B
//!
//! Edges only ever point from an earlier submission to a later one, so the
//! graph cannot contain cycles. A task is ready once all its incoming edges
//! are gone.
//!
//! # Design Decisions
//!
//! 1. Edges are derived from a last-writer table rather than from comparing
//!    parameter lists, so analysing a task costs one lookup per parameter.
//!
//! 2. Tasks are indexed by ID in an insertion-ordered map, which keeps
//!    reports and ready notifications in submission order.
//!
//! 3. We maintain both predecessor and successor sets so that ending a task
//!    can release its successors without scanning the graph.

mod analyser;
mod application;
mod dag;
mod notify;
mod task;

pub use analyser::{AppReport, TaskAnalyser, TaskReport, TaskStateReport};
pub use application::Application;
pub use dag::{Released, TaskGraph};
pub use notify::{GraphEdge, GraphNode, GraphObserver, ReadyNotifier};
pub use task::{
    AppId, Direction, OnFailure, ParamData, Parameter, ReadyTask, Task, TaskDescription, TaskId,
    TaskKind, TaskOutcome, TaskState,
};
