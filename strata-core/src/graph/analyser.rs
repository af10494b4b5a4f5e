//! Task Analyser
//!
//! Turns each submitted task into dependency edges and keeps the last-writer
//! table that makes those edges correct.
//!
//! # Analysis
//!
//! Parameters are processed in declaration order. For each one:
//!
//! 1. Its direction becomes an access mode and the version store returns the
//!    versions it observes
//! 2. A read-bearing access depends on the datum's last writer, unless that
//!    writer is the task itself or no longer in the graph
//! 3. A write-bearing access makes the task the datum's last writer
//!
//! Because step 3 runs before the next parameter's step 2, a task that reads
//! and writes the same datum through two parameters never depends on itself.
//!
//! # Ending
//!
//! A FAILED task whose policy is not [`OnFailure::Ignore`] poisons its
//! application: every waiter of that application is answered with
//! [`RuntimeError::TaskFailed`] and the task's successors are not released.
//! The failed task and every task behind it give back the versions they were
//! going to read, so deletions of those data do not wait forever.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, error, info, trace, warn};

use super::application::Application;
use super::dag::TaskGraph;
use super::notify::{GraphEdge, GraphNode, GraphObserver, ReadyNotifier};
use super::task::{AppId, OnFailure, Task, TaskDescription, TaskId, TaskOutcome, TaskState};
use crate::data::{AccessDescriptor, AccessMode, DataBackend, DataId, DataInstanceId, VersionStore};
use crate::error::{Result, RuntimeError, TaskFailure};
use crate::reply::Reply;

type TaskWaiters = SmallVec<[Reply<Result<()>>; 2]>;

/// Dependency tracker state. Owned by the request processor thread.
pub struct TaskAnalyser {
    graph: TaskGraph,
    /// Last writer per datum. `None` when the main program synchronized it.
    writers: HashMap<DataId, Option<TaskId>>,
    /// Main-program threads waiting for a specific task to end.
    waited_tasks: HashMap<TaskId, TaskWaiters>,
    /// Failed tasks and everything queued behind them, with the failure
    /// that stopped them.
    blocked: HashMap<TaskId, TaskFailure>,
    apps: HashMap<AppId, Application>,
    observer: Option<Box<dyn GraphObserver>>,
}

impl fmt::Debug for TaskAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAnalyser")
            .field("tasks", &self.graph.len())
            .field("writers", &self.writers.len())
            .field("apps", &self.apps.len())
            .finish()
    }
}

impl Default for TaskAnalyser {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TaskAnalyser {
    pub fn new(observer: Option<Box<dyn GraphObserver>>) -> Self {
        Self {
            graph: TaskGraph::new(),
            writers: HashMap::new(),
            waited_tasks: HashMap::new(),
            blocked: HashMap::new(),
            apps: HashMap::new(),
            observer,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn app(&self, app_id: AppId) -> Option<&Application> {
        self.apps.get(&app_id)
    }

    /// Last writer of `data_id`, if a task holds it.
    pub fn last_writer(&self, data_id: DataId) -> Option<TaskId> {
        self.writers.get(&data_id).copied().flatten()
    }

    /// Register a new task's accesses and wire it into the graph. A task
    /// with no predecessors is reported ready right away.
    pub fn process_task(
        &mut self,
        task_id: TaskId,
        description: TaskDescription,
        store: &mut VersionStore,
        backend: &mut dyn DataBackend,
        notifier: &mut dyn ReadyNotifier,
    ) {
        info!(
            task_id = %task_id,
            app_id = %description.app_id,
            kind = description.kind.label(),
            name = %description.name,
            "new task"
        );
        let mut task = Task::new(task_id, description);
        let app_id = task.app_id();
        let constraining = task.description().constraining;
        if let Some(observer) = self.observer.as_mut() {
            observer.add_task(task_id, task.name());
        }
        let app = self
            .apps
            .entry(app_id)
            .or_insert_with(|| Application::new(app_id));
        app.new_task();

        let mut predecessors: SmallVec<[(TaskId, DataInstanceId); 4]> = SmallVec::new();
        let mut from_main: SmallVec<[DataInstanceId; 4]> = SmallVec::new();
        let mut enforcing = None;

        for (idx, param) in task.parameters_mut().iter_mut().enumerate() {
            let Some(params) = param.access_params() else {
                continue;
            };
            let access = store.register_data_access(&params, backend);
            param.access = Some(access);
            let data_id = access.data_id();

            if let Some(read) = access.read_instance() {
                match self.writers.get(&data_id).copied().flatten() {
                    Some(writer) if writer == task_id => {
                        trace!(task_id = %task_id, data_id = %data_id, "self dependency suppressed");
                    }
                    Some(writer) if self.graph.contains(writer) => {
                        debug!(task_id = %task_id, predecessor = %writer, data_id = %data_id, "data dependency");
                        predecessors.push((writer, read));
                    }
                    _ => from_main.push(read),
                }
                if constraining == Some(idx) && read.version_id() > 1 {
                    enforcing = self
                        .writers
                        .get(&data_id)
                        .copied()
                        .flatten()
                        .filter(|w| *w != task_id && self.graph.contains(*w));
                }
            }

            if access.written_instance().is_some() {
                self.writers.insert(data_id, Some(task_id));
                if param.is_file() {
                    app.add_written_file(data_id);
                } else if param.is_persistent() {
                    app.add_written_persistent(data_id);
                }
            }
        }

        if let Some(writer) = enforcing {
            task.set_enforcing(writer);
        }
        self.graph.add_task(task);
        for (writer, read) in &predecessors {
            if self.graph.add_edge(*writer, task_id) {
                if let Some(observer) = self.observer.as_mut() {
                    observer.add_edge(GraphEdge::new(
                        GraphNode::Task(*writer),
                        GraphNode::Task(task_id),
                        Some(*read),
                    ));
                }
            }
        }
        if let Some(observer) = self.observer.as_mut() {
            if predecessors.is_empty() {
                let data = from_main.first().copied();
                observer.add_edge(GraphEdge::new(GraphNode::Main, GraphNode::Task(task_id), data));
            }
        }

        let failure = predecessors
            .iter()
            .find_map(|(writer, _)| self.blocked.get(writer).cloned());
        if let Some(failure) = failure {
            debug!(task_id = %task_id, failed = %failure.task_id, "task queued behind a failed task");
            self.blocked.insert(task_id, failure);
            self.drop_read_references(task_id, store, backend);
            return;
        }
        if let Some(task) = self.graph.get_mut(task_id) {
            if !task.has_predecessors() {
                task.set_state(TaskState::Running);
                notifier.task_ready(task.ready_snapshot());
            }
        }
    }

    /// Process a task's completion report.
    pub fn end_task(
        &mut self,
        outcome: TaskOutcome,
        store: &mut VersionStore,
        backend: &mut dyn DataBackend,
        notifier: &mut dyn ReadyNotifier,
    ) {
        let task_id = outcome.task_id;
        let Some(task) = self.graph.get_mut(task_id) else {
            warn!(task_id = %task_id, "end notification for a task not in the graph");
            return;
        };
        info!(task_id = %task_id, state = %outcome.state, "task end notification");
        task.set_free(outcome.free);
        if !outcome.free {
            debug!(task_id = %task_id, "task is not free, waiting for other executions to end");
            return;
        }
        if !outcome.state.is_terminal() {
            debug!(task_id = %task_id, state = %outcome.state, "ignoring non-terminal notification");
            return;
        }
        task.set_state(outcome.state);
        let app_id = task.app_id();

        match (outcome.state, task.description().on_failure) {
            (TaskState::Failed, OnFailure::Retry | OnFailure::Fail) => {
                let failure = TaskFailure {
                    task_id,
                    app_id,
                    name: task.name().to_string(),
                };
                error!(task_id = %task_id, app_id = %app_id, name = %failure.name, "task failed");
                // neither the task nor anything after it will run
                let mut blocked = self.graph.transitive_successors(task_id);
                blocked.insert(0, task_id);
                for blocked_id in blocked {
                    self.blocked.insert(blocked_id, failure.clone());
                    self.fail_waiters(blocked_id, &failure);
                    self.drop_read_references(blocked_id, store, backend);
                }
                if let Some(app) = self.apps.get_mut(&app_id) {
                    app.fail(failure);
                }
                return;
            }
            (TaskState::Failed, OnFailure::Ignore) => {
                warn!(task_id = %task_id, name = %task.name(), "task failed, failure ignored");
            }
            (TaskState::Cancelled, _) => {
                warn!(task_id = %task_id, name = %task.name(), "task cancelled");
            }
            _ => {}
        }

        if let Some(waiters) = self.waited_tasks.remove(&task_id) {
            debug!(task_id = %task_id, waiters = waiters.len(), "releasing task waiters");
            for waiter in waiters {
                waiter.send(Ok(()));
            }
        }

        let accesses: SmallVec<[AccessDescriptor; 8]> =
            task.parameters().iter().filter_map(|p| p.access).collect();
        let written_files: SmallVec<[DataId; 4]> = task
            .parameters()
            .iter()
            .filter(|p| p.is_file())
            .filter_map(|p| p.access.and_then(|a| a.written_instance()))
            .map(|i| i.data_id())
            .collect();

        for (idx, location) in &outcome.locations {
            match task
                .parameters()
                .get(*idx)
                .and_then(|p| p.access)
                .and_then(|a| a.written_instance())
            {
                Some(written) => backend.register_location(&written.renaming(), location),
                None => warn!(task_id = %task_id, param = idx, "final location for a parameter that writes nothing"),
            }
        }

        for access in &accesses {
            store.data_has_been_accessed(access, backend);
        }

        let ending = self.apps.get(&app_id).map(|a| a.is_ending()).unwrap_or(false);
        if ending {
            for data_id in written_files {
                if self.last_writer(data_id) == Some(task_id) {
                    debug!(task_id = %task_id, data_id = %data_id, "requesting result file");
                    if store
                        .block_data_and_get_result_file(data_id, None, backend)
                        .is_some()
                    {
                        store.unblock_data_id(data_id, backend);
                    }
                }
            }
        }

        for successor in self.graph.release_successors(task_id) {
            if let Some(task) = self.graph.get_mut(successor) {
                debug!(task_id = %successor, released_by = %task_id, "task released");
                task.set_state(TaskState::Running);
                notifier.task_ready(task.ready_snapshot());
            }
        }
        self.graph.remove_task(task_id);

        if let Some(app) = self.apps.get_mut(&app_id) {
            app.task_ended();
        }
    }

    /// Answer `reply` once the last writer of `data_id` has ended.
    ///
    /// A read-write main access takes the value over: the writer entry is
    /// reset so later readers do not depend on the old writer. A writer that
    /// failed, or sits behind a failed task, is answered with its failure.
    pub fn find_waited_task(&mut self, data_id: DataId, mode: AccessMode, reply: Reply<Result<()>>) {
        let writer = match self.writers.get(&data_id) {
            Some(writer) => *writer,
            None => {
                if mode == AccessMode::RW {
                    debug!(data_id = %data_id, "adding empty writer entry");
                    self.writers.insert(data_id, None);
                }
                reply.send(Ok(()));
                return;
            }
        };
        if let Some(failure) = writer.and_then(|w| self.blocked.get(&w)) {
            debug!(data_id = %data_id, "last writer will never run");
            reply.send(Err(RuntimeError::TaskFailed(failure.clone())));
            return;
        }
        if mode == AccessMode::RW {
            self.writers.insert(data_id, None);
        }
        let Some(writer) = writer else {
            reply.send(Ok(()));
            return;
        };

        if let Some(observer) = self.observer.as_mut() {
            let version = self.graph.get(writer).and_then(|t| {
                t.parameters()
                    .iter()
                    .filter_map(|p| p.access.and_then(|a| a.written_instance()))
                    .find(|i| i.data_id() == data_id)
            });
            observer.add_edge(GraphEdge::new(GraphNode::Task(writer), GraphNode::Main, version));
        }

        match self.graph.get(writer) {
            Some(_) => {
                debug!(data_id = %data_id, writer = %writer, "main access waits for task");
                self.waited_tasks.entry(writer).or_default().push(reply);
            }
            None => reply.send(Ok(())),
        }
    }

    pub fn barrier(&mut self, app_id: AppId, reply: Reply<Result<()>>) {
        if let Some(observer) = self.observer.as_mut() {
            observer.commit();
        }
        self.apps
            .entry(app_id)
            .or_insert_with(|| Application::new(app_id))
            .reach_barrier(reply);
    }

    pub fn no_more_tasks(&mut self, app_id: AppId, reply: Reply<Result<()>>) {
        if let Some(observer) = self.observer.as_mut() {
            observer.commit();
        }
        self.apps
            .entry(app_id)
            .or_insert_with(|| Application::new(app_id))
            .end_reached(reply);
    }

    /// Forget a deleted datum's writer and drop it from every written set.
    pub fn delete_data(&mut self, data_id: DataId) {
        info!(data_id = %data_id, "deleting data");
        if self.writers.remove(&data_id).is_none() {
            warn!(data_id = %data_id, "writer info for data not found");
        }
        for app in self.apps.values_mut() {
            app.remove_written(data_id);
        }
    }

    /// Files written by `app_id`, emptying its set.
    pub fn get_and_remove_written_files(&mut self, app_id: AppId) -> BTreeSet<DataId> {
        self.apps
            .get_mut(&app_id)
            .map(|app| app.take_written_files())
            .unwrap_or_default()
    }

    pub fn task_state_report(&self) -> TaskStateReport {
        let mut apps: Vec<AppReport> = self
            .apps
            .values()
            .map(|app| AppReport {
                app_id: app.id(),
                in_flight: app.in_flight(),
                total: app.total(),
                failed: app.failure().is_some(),
            })
            .collect();
        apps.sort_by_key(|a| a.app_id);
        let tasks = self
            .graph
            .topological_order()
            .into_iter()
            .filter_map(|id| self.graph.get(id))
            .map(|task| TaskReport {
                task_id: task.id(),
                app_id: task.app_id(),
                name: task.name().to_string(),
                state: task.state(),
                predecessors: task.predecessors().iter().copied().collect(),
                successors: task.successors().iter().copied().collect(),
            })
            .collect();
        TaskStateReport { apps, tasks }
    }

    pub fn graph_dot(&self) -> String {
        self.graph.to_dot()
    }

    /// Release the versions a task that will never run was going to read.
    /// The read half of each access is dropped, so a second call is a no-op.
    fn drop_read_references(
        &mut self,
        task_id: TaskId,
        store: &mut VersionStore,
        backend: &mut dyn DataBackend,
    ) {
        let Some(task) = self.graph.get_mut(task_id) else {
            return;
        };
        for param in task.parameters_mut() {
            let (read, rest) = match param.access {
                Some(AccessDescriptor::Read { read }) => (read, None),
                Some(AccessDescriptor::ReadWrite { read, written }) => {
                    (read, Some(AccessDescriptor::Write { written }))
                }
                _ => continue,
            };
            trace!(task_id = %task_id, read = %read.renaming(), "dropping read of a blocked task");
            store.data_has_been_accessed(&AccessDescriptor::Read { read }, backend);
            param.access = rest;
        }
    }

    fn fail_waiters(&mut self, task_id: TaskId, failure: &TaskFailure) {
        if let Some(waiters) = self.waited_tasks.remove(&task_id) {
            for waiter in waiters {
                waiter.send(Err(RuntimeError::TaskFailed(failure.clone())));
            }
        }
    }
}

/// Snapshot of the tracker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStateReport {
    pub apps: Vec<AppReport>,
    /// Live tasks, producers first.
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppReport {
    pub app_id: AppId,
    pub in_flight: usize,
    pub total: u64,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub app_id: AppId,
    pub name: String,
    pub state: TaskState,
    pub predecessors: Vec<TaskId>,
    pub successors: Vec<TaskId>,
}

impl fmt::Display for TaskStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for app in &self.apps {
            writeln!(
                f,
                "application {}: {} in flight, {} total{}",
                app.app_id,
                app.in_flight,
                app.total,
                if app.failed { ", failed" } else { "" }
            )?;
        }
        for task in &self.tasks {
            writeln!(
                f,
                "  task {} ({}) {} waits on {:?}",
                task.task_id,
                task.name,
                task.state,
                task.predecessors.iter().map(|t| t.raw()).collect::<Vec<_>>()
            )?;
        }
        Ok(())
    }
}
