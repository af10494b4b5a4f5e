//! Collaborators
//!
//! The engine talks to the rest of the runtime through three traits:
//!
//! - [`ReadyNotifier`]: receives tasks whose predecessors have all ended
//! - [`DataBackend`]: binds renamings to storage and moves bytes
//! - [`GraphObserver`]: receives graph structure for visualization
//!
//! This module ships an in-process implementation of each one. They are
//! cheap to clone; clones share state, so a caller can keep a handle to
//! inspect what the processor thread did through its own copy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

pub use crate::data::{DataBackend, FileTransfer};
pub use crate::graph::{GraphEdge, GraphNode, GraphObserver, ReadyNotifier};

use crate::data::{DataLocation, ObjectValue, Renaming};
use crate::error::{Result, RuntimeError};
use crate::graph::{ReadyTask, TaskId};
use crate::reply::Reply;

/// Everything the access processor hands its outputs to.
pub struct Collaborators {
    pub notifier: Box<dyn ReadyNotifier>,
    pub backend: Box<dyn DataBackend>,
    pub observer: Option<Box<dyn GraphObserver>>,
}

impl Collaborators {
    pub fn new(notifier: impl ReadyNotifier + 'static, backend: impl DataBackend + 'static) -> Self {
        Self {
            notifier: Box::new(notifier),
            backend: Box::new(backend),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl GraphObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }
}

#[derive(Default)]
struct ReadyShared {
    queue: Mutex<VecDeque<ReadyTask>>,
    available: Condvar,
}

/// FIFO of ready tasks that scheduler threads can block on.
#[derive(Clone, Default)]
pub struct ReadyQueue {
    shared: Arc<ReadyShared>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_pop(&self) -> Option<ReadyTask> {
        self.shared.queue.lock().pop_front()
    }

    /// Wait up to `timeout` for a ready task.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ReadyTask> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            if self
                .shared
                .available
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return queue.pop_front();
            }
        }
    }

    /// Take every task currently queued.
    pub fn drain(&self) -> Vec<ReadyTask> {
        self.shared.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadyNotifier for ReadyQueue {
    fn task_ready(&mut self, task: ReadyTask) {
        self.shared.queue.lock().push_back(task);
        self.shared.available.notify_all();
    }
}

impl std::fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyQueue").field("len", &self.len()).finish()
    }
}

#[derive(Debug, Default)]
struct BackendState {
    locations: HashMap<Renaming, Vec<DataLocation>>,
    values: HashMap<Renaming, ObjectValue>,
    persistent: HashMap<Renaming, String>,
    removed: Vec<Renaming>,
    transfers: Vec<(Renaming, DataLocation)>,
}

impl BackendState {
    fn holds(&self, renaming: &Renaming) -> bool {
        self.locations.contains_key(renaming)
            || self.values.contains_key(renaming)
            || self.persistent.contains_key(renaming)
    }
}

/// Storage tables kept in memory. Transfers complete immediately.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locations bound to `renaming`, in registration order.
    pub fn locations(&self, renaming: &Renaming) -> Vec<DataLocation> {
        self.state
            .lock()
            .locations
            .get(renaming)
            .cloned()
            .unwrap_or_default()
    }

    pub fn value(&self, renaming: &Renaming) -> Option<ObjectValue> {
        self.state.lock().values.get(renaming).cloned()
    }

    /// Bind a value as a worker would after producing it.
    pub fn store_value(&self, renaming: &Renaming, value: ObjectValue) {
        self.state.lock().values.insert(renaming.clone(), value);
    }

    /// Renamings removed so far, in removal order.
    pub fn removed(&self) -> Vec<Renaming> {
        self.state.lock().removed.clone()
    }

    /// Transfers performed so far.
    pub fn transfers(&self) -> Vec<(Renaming, DataLocation)> {
        self.state.lock().transfers.clone()
    }
}

impl DataBackend for InMemoryBackend {
    fn register_location(&mut self, renaming: &Renaming, location: &DataLocation) {
        let mut state = self.state.lock();
        let locations = state.locations.entry(renaming.clone()).or_default();
        if !locations.contains(location) {
            locations.push(location.clone());
        }
    }

    fn register_value(&mut self, renaming: &Renaming, value: ObjectValue) {
        self.store_value(renaming, value);
    }

    fn register_persistent(&mut self, renaming: &Renaming, psco_id: &str) {
        self.state
            .lock()
            .persistent
            .insert(renaming.clone(), psco_id.to_string());
    }

    fn remove_data(&mut self, renaming: &Renaming) {
        let mut state = self.state.lock();
        state.locations.remove(renaming);
        state.values.remove(renaming);
        state.persistent.remove(renaming);
        state.removed.push(renaming.clone());
    }

    fn exists(&self, renaming: &Renaming) -> bool {
        self.state.lock().holds(renaming)
    }

    fn transfer_file(&mut self, transfer: FileTransfer) {
        let FileTransfer {
            source,
            target,
            completion,
        } = transfer;
        let result = {
            let mut state = self.state.lock();
            if state.holds(&source) {
                let locations = state.locations.entry(source.clone()).or_default();
                if !locations.contains(&target) {
                    locations.push(target.clone());
                }
                state.transfers.push((source.clone(), target.clone()));
                Ok(target)
            } else {
                warn!(renaming = %source, "transfer of data that has no copy");
                Err(RuntimeError::Transfer {
                    renaming: source.to_string(),
                    reason: "no copy of the data is held".to_string(),
                })
            }
        };
        if let Some(completion) = completion {
            completion.send(result);
        }
    }

    fn fetch_object(&mut self, renaming: &Renaming, reply: Reply<Result<ObjectValue>>) {
        let value = self.value(renaming).ok_or_else(|| RuntimeError::Transfer {
            renaming: renaming.to_string(),
            reason: "no value is held".to_string(),
        });
        reply.send(value);
    }
}

#[derive(Debug, Default)]
struct ObserverState {
    tasks: Vec<(TaskId, String)>,
    edges: Vec<GraphEdge>,
    commits: usize,
}

/// Graph observer that keeps everything it is told.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    state: Arc<Mutex<ObserverState>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<(TaskId, String)> {
        self.state.lock().tasks.clone()
    }

    pub fn edges(&self) -> Vec<GraphEdge> {
        self.state.lock().edges.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }
}

impl GraphObserver for RecordingObserver {
    fn add_task(&mut self, task_id: TaskId, name: &str) {
        self.state.lock().tasks.push((task_id, name.to_string()));
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        self.state.lock().edges.push(edge);
    }

    fn commit(&mut self) {
        self.state.lock().commits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AppId, TaskDescription, TaskKind};
    use crate::reply;
    use serde_json::json;

    fn ready(id: u64) -> ReadyTask {
        let desc = TaskDescription::method(AppId(0), "T", "run");
        ReadyTask {
            task_id: TaskId::from(id),
            app_id: desc.app_id,
            name: desc.name,
            kind: TaskKind::Method {
                class: "T".into(),
                method: "run".into(),
            },
            priority: false,
            timeout: None,
            enforcing: None,
            parameters: Vec::new(),
        }
    }

    #[test]
    fn ready_queue_is_fifo_across_clones() {
        let queue = ReadyQueue::new();
        let mut producer = queue.clone();
        producer.task_ready(ready(1));
        producer.task_ready(ready(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop().map(|t| t.task_id), Some(TaskId::from(1)));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let queue = ReadyQueue::new();
        let mut producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.task_ready(ready(7));
        });
        let task = queue.pop_timeout(Duration::from_secs(5));
        assert_eq!(task.map(|t| t.task_id), Some(TaskId::from(7)));
        handle.join().unwrap();
    }

    #[test]
    fn pop_timeout_gives_up() {
        let queue = ReadyQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn transfer_of_missing_data_fails() {
        let mut backend = InMemoryBackend::new();
        let (tx, rx) = reply::channel();
        backend.transfer_file(
            FileTransfer::new(Renaming::from("d1v1"), DataLocation::local("/out"))
                .with_completion(tx),
        );
        assert!(matches!(rx.wait_flat(), Err(RuntimeError::Transfer { .. })));
        assert!(backend.transfers().is_empty());
    }

    #[test]
    fn removed_data_no_longer_exists() {
        let mut backend = InMemoryBackend::new();
        let renaming = Renaming::from("d2v1");
        backend.register_value(&renaming, json!([1, 2]));
        assert!(backend.exists(&renaming));

        let (tx, rx) = reply::channel();
        backend.fetch_object(&renaming, tx);
        assert_eq!(rx.wait_flat(), Ok(json!([1, 2])));

        backend.remove_data(&renaming);
        assert!(!backend.exists(&renaming));
        assert_eq!(backend.removed(), vec![renaming]);
    }

    #[test]
    fn observer_records_commits() {
        let observer = RecordingObserver::new();
        let mut handle = observer.clone();
        handle.add_edge(GraphEdge::new(GraphNode::Main, GraphNode::Task(TaskId::from(1)), None));
        handle.commit();
        assert_eq!(observer.edges().len(), 1);
        assert_eq!(observer.commits(), 1);
    }
}
