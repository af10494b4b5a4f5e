//! Tasks
//!
//! This module defines the tasks that live in the dependency graph: how the
//! application describes them, how the graph stores them, and what the
//! graph hands to the scheduler and receives back when they end.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::data::{
    AccessDescriptor, AccessMode, AccessParams, DataLocation, ObjectCode, ObjectValue,
};

/// Unique identifier for a task, monotonic over the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Generate a new unique task ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the application a task was submitted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub u64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Submitted, waiting for its predecessors.
    ToAnalyse,
    /// Handed to the scheduler.
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToAnalyse => "TO_ANALYSE",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// What to do when a task ends in the FAILED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OnFailure {
    /// Resubmission is up to the scheduler; a failure that reaches the
    /// engine is final.
    #[default]
    Retry,
    /// Stop the application.
    Fail,
    /// Treat the failure as a completion.
    Ignore,
}

/// What a task runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Method {
        class: String,
        method: String,
    },
    Service {
        namespace: String,
        service: String,
        port: String,
        operation: String,
    },
    Http {
        base_url: String,
        request: String,
    },
    Reduce {
        class: String,
        method: String,
        chunk_size: usize,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Method { .. } => "method",
            Self::Service { .. } => "service",
            Self::Http { .. } => "http",
            Self::Reduce { .. } => "reduce",
        }
    }
}

/// Direction of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn mode(&self) -> AccessMode {
        match self {
            Self::In => AccessMode::R,
            Self::Out => AccessMode::W,
            Self::InOut => AccessMode::RW,
        }
    }
}

/// Value carried by a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamData {
    File(DataLocation),
    Object {
        code: ObjectCode,
        value: Option<ObjectValue>,
    },
    Persistent {
        code: ObjectCode,
        psco_id: String,
    },
    /// Passed by value; never versioned.
    Basic(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub direction: Direction,
    pub data: ParamData,
    /// Versions observed, set during analysis.
    pub access: Option<AccessDescriptor>,
}

impl Parameter {
    pub fn new(direction: Direction, data: ParamData) -> Self {
        Self {
            direction,
            data,
            access: None,
        }
    }

    /// Access to register for this parameter, `None` for basic values.
    pub fn access_params(&self) -> Option<AccessParams> {
        let mode = self.direction.mode();
        match &self.data {
            ParamData::File(location) => Some(AccessParams::File {
                mode,
                location: location.clone(),
            }),
            ParamData::Object { code, value } => Some(AccessParams::Object {
                mode,
                code: *code,
                value: value.clone(),
            }),
            ParamData::Persistent { code, psco_id } => Some(AccessParams::Persistent {
                mode,
                code: *code,
                psco_id: psco_id.clone(),
            }),
            ParamData::Basic(_) => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.data, ParamData::File(_))
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.data, ParamData::Persistent { .. })
    }
}

/// Everything the application states about a task when submitting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub kind: TaskKind,
    pub name: String,
    pub app_id: AppId,
    pub priority: bool,
    pub on_failure: OnFailure,
    pub timeout: Option<Duration>,
    pub parameters: Vec<Parameter>,
    /// Parameter whose producer the task should be placed next to.
    pub constraining: Option<usize>,
}

impl TaskDescription {
    pub fn new(app_id: AppId, kind: TaskKind) -> Self {
        let name = match &kind {
            TaskKind::Method { class, method } | TaskKind::Reduce { class, method, .. } => {
                format!("{class}.{method}")
            }
            TaskKind::Service {
                service, operation, ..
            } => format!("{service}.{operation}"),
            TaskKind::Http { request, .. } => request.clone(),
        };
        Self {
            kind,
            name,
            app_id,
            priority: false,
            on_failure: OnFailure::default(),
            timeout: None,
            parameters: Vec::new(),
            constraining: None,
        }
    }

    /// A method task named `class.method`.
    pub fn method(app_id: AppId, class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(
            app_id,
            TaskKind::Method {
                class: class.into(),
                method: method.into(),
            },
        )
    }

    pub fn param(mut self, direction: Direction, data: ParamData) -> Self {
        self.parameters.push(Parameter::new(direction, data));
        self
    }

    pub fn file(self, direction: Direction, location: DataLocation) -> Self {
        self.param(direction, ParamData::File(location))
    }

    pub fn object(self, direction: Direction, code: ObjectCode, value: Option<ObjectValue>) -> Self {
        self.param(direction, ParamData::Object { code, value })
    }

    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn constraining(mut self, index: usize) -> Self {
        self.constraining = Some(index);
        self
    }
}

/// A task in the dependency graph.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    description: TaskDescription,
    state: TaskState,

    /// Tasks that must end before this one may run.
    predecessors: IndexSet<TaskId>,

    /// Tasks waiting for this one.
    successors: IndexSet<TaskId>,

    /// No other execution of this task is still running.
    free: bool,

    /// Producer of the constraining parameter, a placement hint.
    enforcing: Option<TaskId>,
}

impl Task {
    pub fn new(id: TaskId, description: TaskDescription) -> Self {
        Self {
            id,
            description,
            state: TaskState::ToAnalyse,
            predecessors: IndexSet::new(),
            successors: IndexSet::new(),
            free: true,
            enforcing: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &TaskDescription {
        &self.description
    }

    pub fn app_id(&self) -> AppId {
        self.description.app_id
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.description.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.description.parameters
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn set_free(&mut self, free: bool) {
        self.free = free;
    }

    pub fn enforcing(&self) -> Option<TaskId> {
        self.enforcing
    }

    pub fn set_enforcing(&mut self, task: TaskId) {
        self.enforcing = Some(task);
    }

    pub fn add_predecessor(&mut self, task: TaskId) -> bool {
        self.predecessors.insert(task)
    }

    pub fn remove_predecessor(&mut self, task: TaskId) -> bool {
        self.predecessors.shift_remove(&task)
    }

    pub fn predecessors(&self) -> &IndexSet<TaskId> {
        &self.predecessors
    }

    pub fn add_successor(&mut self, task: TaskId) -> bool {
        self.successors.insert(task)
    }

    pub fn remove_successor(&mut self, task: TaskId) -> bool {
        self.successors.shift_remove(&task)
    }

    pub fn successors(&self) -> &IndexSet<TaskId> {
        &self.successors
    }

    pub fn has_predecessors(&self) -> bool {
        !self.predecessors.is_empty()
    }

    /// Data ids written by this task.
    pub fn written_data(&self) -> HashSet<crate::data::DataId> {
        self.parameters()
            .iter()
            .filter_map(|p| p.access.and_then(|a| a.written_instance()))
            .map(|i| i.data_id())
            .collect()
    }

    pub(crate) fn ready_snapshot(&self) -> ReadyTask {
        ReadyTask {
            task_id: self.id,
            app_id: self.app_id(),
            name: self.description.name.clone(),
            kind: self.description.kind.clone(),
            priority: self.description.priority,
            timeout: self.description.timeout,
            enforcing: self.enforcing,
            parameters: self.description.parameters.clone(),
        }
    }
}

/// What the scheduler receives when a task has no unresolved predecessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyTask {
    pub task_id: TaskId,
    pub app_id: AppId,
    pub name: String,
    pub kind: TaskKind,
    pub priority: bool,
    pub timeout: Option<Duration>,
    pub enforcing: Option<TaskId>,
    /// Parameters with the versions each one observes.
    pub parameters: Vec<Parameter>,
}

/// Completion report for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub state: TaskState,
    /// `false` while other executions of the task may still report.
    pub free: bool,
    /// Where written parameters ended up, by parameter index.
    pub locations: Vec<(usize, DataLocation)>,
}

impl TaskOutcome {
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            free: true,
            locations: Vec::new(),
        }
    }

    pub fn finished(task_id: TaskId) -> Self {
        Self::new(task_id, TaskState::Finished)
    }

    pub fn failed(task_id: TaskId) -> Self {
        Self::new(task_id, TaskState::Failed)
    }

    pub fn cancelled(task_id: TaskId) -> Self {
        Self::new(task_id, TaskState::Cancelled)
    }

    pub fn with_location(mut self, param: usize, location: DataLocation) -> Self {
        self.locations.push((param, location));
        self
    }

    pub fn not_free(mut self) -> Self {
        self.free = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn directions_map_to_modes() {
        assert_eq!(Direction::In.mode(), AccessMode::R);
        assert_eq!(Direction::Out.mode(), AccessMode::W);
        assert_eq!(Direction::InOut.mode(), AccessMode::RW);
    }

    #[test]
    fn basic_parameters_are_not_versioned() {
        let param = Parameter::new(Direction::In, ParamData::Basic(serde_json::json!(3)));
        assert!(param.access_params().is_none());

        let param = Parameter::new(Direction::InOut, ParamData::File(DataLocation::local("/f")));
        assert_eq!(param.access_params().map(|p| p.mode()), Some(AccessMode::RW));
    }

    #[test]
    fn description_builder_names_the_task() {
        let desc = TaskDescription::method(AppId(1), "Matrix", "multiply")
            .file(Direction::In, DataLocation::local("/a"))
            .object(Direction::Out, 9, None)
            .on_failure(OnFailure::Ignore);
        assert_eq!(desc.name, "Matrix.multiply");
        assert_eq!(desc.parameters.len(), 2);
        assert_eq!(desc.on_failure, OnFailure::Ignore);
        assert_eq!(desc.kind.label(), "method");
    }

    #[test]
    fn edge_management() {
        let mut task = Task::new(TaskId::new(), TaskDescription::method(AppId(1), "A", "b"));
        let dep1 = TaskId::new();
        let dep2 = TaskId::new();

        assert!(task.add_predecessor(dep1));
        assert!(task.add_predecessor(dep2));
        assert!(!task.add_predecessor(dep1));
        assert_eq!(task.predecessors().len(), 2);

        task.remove_predecessor(dep1);
        assert_eq!(task.predecessors().iter().copied().collect::<Vec<_>>(), vec![dep2]);
        assert!(task.has_predecessors());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert_eq!(TaskState::Failed.to_string(), "FAILED");
    }
}
