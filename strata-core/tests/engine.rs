//! Integration Tests for the Access Processor
//!
//! These tests drive the whole engine through its public API, with the
//! in-process collaborators standing in for the scheduler and the storage.

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use strata_core::config::RuntimeConfig;
use strata_core::data::{AccessMode, DataLocation};
use strata_core::error::RuntimeError;
use strata_core::graph::{
    AppId, Direction, GraphNode, OnFailure, TaskDescription, TaskOutcome, TaskState,
};
use strata_core::runtime::{
    AccessProcessor, Collaborators, InMemoryBackend, ReadyQueue, RecordingObserver,
};

use common::{Engine, PATIENCE};

const APP: AppId = AppId(1);

fn write_file(location: &DataLocation) -> TaskDescription {
    TaskDescription::method(APP, "Stage", "write").file(Direction::Out, location.clone())
}

fn read_file(location: &DataLocation) -> TaskDescription {
    TaskDescription::method(APP, "Stage", "read").file(Direction::In, location.clone())
}

/// A reader of a file becomes ready only once its writer has ended.
#[test]
fn reader_is_released_by_its_writer() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/scenario-a.txt");

    let t1 = engine.processor.new_task(write_file(&f)).unwrap();
    let t2 = engine.processor.new_task(read_file(&f)).unwrap();

    assert_eq!(engine.next_ready().task_id, t1);
    let report = engine.processor.current_task_state().unwrap();
    let reader = report.tasks.iter().find(|t| t.task_id == t2).unwrap();
    assert_eq!(reader.predecessors, vec![t1]);
    assert!(engine.ready.is_empty());

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();
    assert_eq!(engine.next_ready().task_id, t2);

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t2))
        .unwrap();
    engine.processor.barrier(APP).unwrap();
    engine.processor.shutdown().unwrap();
}

/// Chained read-write accesses to one object produce one version each. The
/// first one has no earlier value to read, so it writes version 1.
#[test]
fn read_write_chain_on_an_object() {
    let engine = Engine::start();

    let t1 = engine
        .processor
        .new_task(
            TaskDescription::method(APP, "Counter", "init").object(Direction::InOut, 42, None),
        )
        .unwrap();
    let t2 = engine
        .processor
        .new_task(
            TaskDescription::method(APP, "Counter", "increment").object(
                Direction::InOut,
                42,
                None,
            ),
        )
        .unwrap();

    let first = engine.next_ready();
    assert_eq!(first.task_id, t1);
    let initial = first.parameters[0].access.unwrap();
    assert_eq!(initial.read_version(), None);
    assert_eq!(initial.written_version(), Some(1));
    let report = engine.processor.current_task_state().unwrap();
    let second = report.tasks.iter().find(|t| t.task_id == t2).unwrap();
    assert_eq!(second.predecessors, vec![t1]);

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();
    let released = engine.next_ready();
    assert_eq!(released.task_id, t2);
    let access = released.parameters[0].access.unwrap();
    assert_eq!(access.read_version(), Some(1));
    assert_eq!(access.written_version(), Some(2));

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t2))
        .unwrap();
    engine.processor.barrier(APP).unwrap();

    let last = engine.processor.last_renaming(42).unwrap().unwrap();
    assert_eq!(last, access.target_renaming());
    assert_eq!(last.parse().unwrap().version_id(), 2);
}

/// Deleting a file waits for the task that still has to read it.
#[test]
fn deletion_waits_for_pending_reader() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/scenario-c.txt");

    let t1 = engine.processor.new_task(read_file(&f)).unwrap();
    let read = engine.next_ready().parameters[0]
        .access
        .unwrap()
        .read_instance()
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let processor = Arc::clone(&engine.processor);
    let location = f.clone();
    let deleter = thread::spawn(move || {
        let result = processor.mark_for_deletion(&location);
        done_tx.send(()).unwrap();
        result
    });

    // the reader has not ended, so the deletion must still be parked
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();
    done_rx.recv_timeout(PATIENCE).unwrap();
    deleter.join().unwrap().unwrap();

    assert!(engine.backend.removed().contains(&read.renaming()));
    assert!(!engine.processor.already_accessed(&f).unwrap());
}

/// Ending an application with nothing in flight does not block.
#[test]
fn no_more_tasks_without_tasks_returns_at_once() {
    let engine = Engine::start();
    engine.processor.no_more_tasks(AppId(77)).unwrap();
    assert!(engine.processor.get_result_files(AppId(77)).unwrap().is_empty());
}

/// A barrier blocks until every task submitted before it has ended.
#[test]
fn barrier_waits_for_submitted_tasks() {
    let engine = Engine::start();
    let t1 = engine
        .processor
        .new_task(write_file(&DataLocation::local("/data/barrier.txt")))
        .unwrap();

    let processor = Arc::clone(&engine.processor);
    let waiter = thread::spawn(move || processor.barrier(APP));
    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();
    waiter.join().unwrap().unwrap();
}

/// Submissions from several threads keep their per-thread order.
#[test]
fn concurrent_producers_keep_their_order() {
    let engine = Engine::start();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let processor = Arc::clone(&engine.processor);
            thread::spawn(move || {
                let part = DataLocation::local(format!("/data/part-{i}"));
                let writer = processor.new_task(write_file(&part)).unwrap();
                let reader = processor.new_task(read_file(&part)).unwrap();
                (writer, reader)
            })
        })
        .collect();
    let pairs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let report = engine.processor.current_task_state().unwrap();
    for (writer, reader) in &pairs {
        let task = report.tasks.iter().find(|t| t.task_id == *reader).unwrap();
        assert_eq!(task.predecessors, vec![*writer]);
    }

    let mut ready: Vec<_> = engine.ready.drain().into_iter().map(|t| t.task_id).collect();
    let mut writers: Vec<_> = pairs.iter().map(|(w, _)| *w).collect();
    ready.sort();
    writers.sort();
    assert_eq!(ready, writers);

    for (writer, _) in &pairs {
        engine
            .processor
            .notify_task_end(TaskOutcome::finished(*writer))
            .unwrap();
    }
    for (_, reader) in &pairs {
        engine
            .processor
            .notify_task_end(TaskOutcome::finished(*reader))
            .unwrap();
    }
    engine.processor.barrier(APP).unwrap();
}

/// Once shutdown has begun every request is refused.
#[test]
fn shutdown_refuses_new_requests() {
    let engine = Engine::start();
    engine.processor.shutdown().unwrap();

    let f = DataLocation::local("/data/late.txt");
    assert_eq!(
        engine.processor.new_task(write_file(&f)),
        Err(RuntimeError::QueueClosed)
    );
    assert_eq!(
        engine.processor.main_access_to_file(&f, AccessMode::R),
        Err(RuntimeError::QueueClosed)
    );
    assert_eq!(
        engine.processor.notify_task_end(TaskOutcome::finished(Default::default())),
        Err(RuntimeError::QueueClosed)
    );
}

/// A failed task poisons its application and keeps its successors blocked.
#[test]
fn failed_task_poisons_the_application() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/failing.txt");

    let t1 = engine
        .processor
        .new_task(write_file(&f).on_failure(OnFailure::Fail))
        .unwrap();
    let t2 = engine.processor.new_task(read_file(&f)).unwrap();
    assert_eq!(engine.next_ready().task_id, t1);

    engine
        .processor
        .notify_task_end(TaskOutcome::failed(t1))
        .unwrap();

    match engine.processor.barrier(APP) {
        Err(RuntimeError::TaskFailed(failure)) => {
            assert_eq!(failure.task_id, t1);
            assert_eq!(failure.app_id, APP);
        }
        other => panic!("expected a task failure, got {other:?}"),
    }
    assert!(engine.ready.is_empty());

    let report = engine.processor.current_task_state().unwrap();
    let failed = report.tasks.iter().find(|t| t.task_id == t1).unwrap();
    assert_eq!(failed.state, TaskState::Failed);
    assert!(report.tasks.iter().any(|t| t.task_id == t2));
    assert!(report.apps.iter().any(|a| a.app_id == APP && a.failed));
}

/// A main-program wait on a task queued behind a failed one fails too, and
/// the file can still be deleted afterwards.
#[test]
fn failure_reaches_main_waits_on_later_writers() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/failing-chain.txt");

    let t1 = engine
        .processor
        .new_task(write_file(&f).on_failure(OnFailure::Fail))
        .unwrap();
    engine
        .processor
        .new_task(TaskDescription::method(APP, "Stage", "update").file(Direction::InOut, f.clone()))
        .unwrap();
    assert_eq!(engine.next_ready().task_id, t1);

    let (done_tx, done_rx) = mpsc::channel();
    let processor = Arc::clone(&engine.processor);
    let location = f.clone();
    thread::spawn(move || {
        let _ = done_tx.send(processor.main_access_to_file(&location, AccessMode::R));
    });

    engine
        .processor
        .notify_task_end(TaskOutcome::failed(t1))
        .unwrap();
    match done_rx.recv_timeout(PATIENCE).expect("main access returns") {
        Err(RuntimeError::TaskFailed(failure)) => assert_eq!(failure.task_id, t1),
        other => panic!("expected a task failure, got {other:?}"),
    }

    let (done_tx, done_rx) = mpsc::channel();
    let processor = Arc::clone(&engine.processor);
    thread::spawn(move || {
        let _ = done_tx.send(processor.mark_for_deletion(&f));
    });
    assert!(done_rx.recv_timeout(PATIENCE).expect("deletion returns").is_ok());
}

/// A failed task gives back the file it was reading.
#[test]
fn failed_reader_does_not_block_deletion() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/failed-reader.txt");

    let t1 = engine
        .processor
        .new_task(read_file(&f).on_failure(OnFailure::Fail))
        .unwrap();
    assert_eq!(engine.next_ready().task_id, t1);
    engine
        .processor
        .notify_task_end(TaskOutcome::failed(t1))
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let processor = Arc::clone(&engine.processor);
    thread::spawn(move || {
        let _ = done_tx.send(processor.mark_for_deletion(&f));
    });
    assert!(done_rx.recv_timeout(PATIENCE).expect("deletion returns").is_ok());
}

/// A failure under the ignore policy behaves like a success.
#[test]
fn ignored_failure_releases_successors() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/ignored.txt");

    let t1 = engine
        .processor
        .new_task(write_file(&f).on_failure(OnFailure::Ignore))
        .unwrap();
    let t2 = engine.processor.new_task(read_file(&f)).unwrap();
    assert_eq!(engine.next_ready().task_id, t1);

    engine
        .processor
        .notify_task_end(TaskOutcome::failed(t1))
        .unwrap();
    assert_eq!(engine.next_ready().task_id, t2);
}

/// The main program reads a file a task produced on a worker.
#[test]
fn main_program_opens_task_output() {
    let config = RuntimeConfig {
        app_host: "master".into(),
        working_dir: "/work".into(),
        ..RuntimeConfig::default()
    };
    let engine = Engine::with_config(config);
    let f = DataLocation::local("/data/output.csv");

    let t1 = engine.processor.new_task(write_file(&f)).unwrap();
    let written = engine.next_ready().parameters[0]
        .access
        .unwrap()
        .written_instance()
        .unwrap();
    engine
        .processor
        .notify_task_end(
            TaskOutcome::finished(t1).with_location(0, DataLocation::new("worker-1", "/scratch/out")),
        )
        .unwrap();

    let granted = engine
        .processor
        .main_access_to_file(&f, AccessMode::R)
        .unwrap();
    assert_eq!(granted.host(), "master");
    assert_eq!(granted.file_name(), Some(written.renaming().as_str()));
    assert!(engine
        .backend
        .transfers()
        .contains(&(written.renaming(), granted.clone())));

    engine
        .processor
        .finish_access_to_file(&f, AccessMode::R)
        .unwrap();
    assert!(engine.processor.already_accessed(&f).unwrap());
}

/// Writing a tracked file from the main program creates a new version at
/// the returned location.
#[test]
fn main_program_writes_a_new_version() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/log.txt");

    let t1 = engine.processor.new_task(read_file(&f)).unwrap();
    engine.next_ready();
    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();

    let granted = engine
        .processor
        .main_access_to_file(&f, AccessMode::W)
        .unwrap();
    engine
        .processor
        .finish_access_to_file(&f, AccessMode::W)
        .unwrap();

    let t2 = engine.processor.new_task(read_file(&f)).unwrap();
    let reader = engine.next_ready();
    assert_eq!(reader.task_id, t2);
    let read = reader.parameters[0].access.unwrap().read_instance().unwrap();
    assert_eq!(read.version_id(), 2);
    assert_eq!(engine.backend.locations(&read.renaming()), vec![granted]);
}

/// Taking an object back waits for its writer and fetches the value.
#[test]
fn main_program_takes_object_from_task() {
    let engine = Engine::start();

    let t1 = engine
        .processor
        .new_task(TaskDescription::method(APP, "Model", "train").object(Direction::Out, 7, None))
        .unwrap();
    let written = engine.next_ready().parameters[0]
        .access
        .unwrap()
        .written_instance()
        .unwrap();
    // the worker produced the value
    engine
        .backend
        .store_value(&written.renaming(), json!({ "weights": [1, 2, 3] }));
    assert!(!engine.processor.is_current_register_value_valid(7).unwrap());

    let processor = Arc::clone(&engine.processor);
    let taker = thread::spawn(move || processor.main_access_to_object(7, json!(null)));
    thread::sleep(Duration::from_millis(50));
    assert!(!taker.is_finished());

    engine
        .processor
        .notify_task_end(TaskOutcome::finished(t1))
        .unwrap();
    let value = taker.join().unwrap().unwrap();
    assert_eq!(value, json!({ "weights": [1, 2, 3] }));

    assert!(engine.processor.is_current_register_value_valid(7).unwrap());
    let last = engine.processor.last_renaming(7).unwrap().unwrap();
    assert_eq!(last.parse().unwrap().version_id(), 2);
    assert_eq!(engine.backend.value(&last), Some(value));
    // nobody can read the task's version anymore
    assert!(engine.backend.removed().contains(&written.renaming()));

    engine.processor.delete_object(7).unwrap();
    engine.settle();
    assert_eq!(engine.processor.last_renaming(7).unwrap(), None);
    assert!(engine.backend.removed().contains(&last));
}

/// Files an application wrote are copied back to where it expects them.
#[test]
fn result_files_are_copied_back() {
    let engine = Engine::start();
    let f = DataLocation::local("/data/result.bin");

    let t1 = engine.processor.new_task(write_file(&f)).unwrap();
    let written = engine.next_ready().parameters[0]
        .access
        .unwrap()
        .written_instance()
        .unwrap();
    engine
        .processor
        .notify_task_end(
            TaskOutcome::finished(t1).with_location(0, DataLocation::new("worker-2", "/scratch/r")),
        )
        .unwrap();
    engine.processor.barrier(APP).unwrap();

    let files = engine.processor.get_result_files(APP).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].original_location, f);
    assert_eq!(files[0].source, written.renaming());
    assert!(engine
        .backend
        .transfers()
        .contains(&(written.renaming(), f.clone())));

    // the written set was handed over
    assert!(engine.processor.get_result_files(APP).unwrap().is_empty());
}

/// With graph drawing enabled the observer sees every dependency.
#[test]
fn observer_receives_dependencies() {
    common::init_tracing();
    let observer = RecordingObserver::new();
    let config = RuntimeConfig {
        draw_graph: true,
        ..RuntimeConfig::default()
    };
    let processor = AccessProcessor::start(
        config,
        Collaborators::new(ReadyQueue::new(), InMemoryBackend::new()).with_observer(observer.clone()),
    )
    .unwrap();

    let f = DataLocation::local("/data/drawn.txt");
    let t1 = processor.new_task(write_file(&f)).unwrap();
    let t2 = processor.new_task(read_file(&f)).unwrap();
    processor.barrier(AppId(99)).unwrap();

    let edges = observer.edges();
    assert!(edges
        .iter()
        .any(|e| e.source == GraphNode::Main && e.target == GraphNode::Task(t1)));
    assert!(edges
        .iter()
        .any(|e| e.source == GraphNode::Task(t1) && e.target == GraphNode::Task(t2)));
    assert_eq!(observer.tasks().len(), 2);
    assert_eq!(observer.commits(), 1);

    let dot = processor.graph_dot().unwrap();
    assert!(dot.contains(&format!("{} -> {};", t1.raw(), t2.raw())));
}

/// Without graph drawing the observer is never called.
#[test]
fn observer_is_ignored_unless_drawing() {
    common::init_tracing();
    let observer = RecordingObserver::new();
    let processor = AccessProcessor::start(
        RuntimeConfig::default(),
        Collaborators::new(ReadyQueue::new(), InMemoryBackend::new()).with_observer(observer.clone()),
    )
    .unwrap();

    processor
        .new_task(write_file(&DataLocation::local("/data/hidden.txt")))
        .unwrap();
    processor.barrier(AppId(98)).unwrap();
    assert!(observer.edges().is_empty());
    assert!(observer.tasks().is_empty());
}
