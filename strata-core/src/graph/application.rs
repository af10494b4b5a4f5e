//! Per-application bookkeeping: in-flight counters, synchronization waiters
//! and the data each application wrote.

use std::collections::BTreeSet;

use smallvec::SmallVec;
use tracing::debug;

use super::task::AppId;
use crate::data::DataId;
use crate::error::{Result, RuntimeError, TaskFailure};
use crate::reply::Reply;

type Waiters = SmallVec<[Reply<Result<()>>; 1]>;

#[derive(Debug)]
pub struct Application {
    id: AppId,
    in_flight: usize,
    total: u64,
    /// The application announced it will submit no more tasks.
    ending: bool,
    barrier_waiters: Waiters,
    end_waiters: Waiters,
    written_files: BTreeSet<DataId>,
    written_persistent: BTreeSet<DataId>,
    /// First fatal task failure; sticky.
    failure: Option<TaskFailure>,
}

impl Application {
    pub fn new(id: AppId) -> Self {
        Self {
            id,
            in_flight: 0,
            total: 0,
            ending: false,
            barrier_waiters: Waiters::new(),
            end_waiters: Waiters::new(),
            written_files: BTreeSet::new(),
            written_persistent: BTreeSet::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Task generation is over and nobody is inside a barrier.
    pub fn is_ending(&self) -> bool {
        self.ending && self.barrier_waiters.is_empty()
    }

    pub fn new_task(&mut self) {
        self.in_flight += 1;
        self.total += 1;
    }

    /// One task left the in-flight set. Waiters are released at zero.
    pub fn task_ended(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.release_waiters();
        }
    }

    /// Answer once every task submitted so far has ended.
    pub fn reach_barrier(&mut self, reply: Reply<Result<()>>) {
        if let Some(failure) = &self.failure {
            reply.send(Err(RuntimeError::TaskFailed(failure.clone())));
        } else if self.in_flight == 0 {
            reply.send(Ok(()));
        } else {
            debug!(app_id = %self.id, in_flight = self.in_flight, "barrier waits for tasks");
            self.barrier_waiters.push(reply);
        }
    }

    /// Like a barrier, but also marks the application as ending.
    pub fn end_reached(&mut self, reply: Reply<Result<()>>) {
        self.ending = true;
        if let Some(failure) = &self.failure {
            reply.send(Err(RuntimeError::TaskFailed(failure.clone())));
        } else if self.in_flight == 0 {
            reply.send(Ok(()));
        } else {
            debug!(app_id = %self.id, in_flight = self.in_flight, "end of application waits for tasks");
            self.end_waiters.push(reply);
        }
    }

    /// Poison the application. Current and future waiters get the failure.
    pub fn fail(&mut self, failure: TaskFailure) {
        let failure = self.failure.get_or_insert(failure).clone();
        for waiter in self.barrier_waiters.drain(..).chain(self.end_waiters.drain(..)) {
            waiter.send(Err(RuntimeError::TaskFailed(failure.clone())));
        }
    }

    pub fn add_written_file(&mut self, data_id: DataId) {
        self.written_files.insert(data_id);
    }

    pub fn add_written_persistent(&mut self, data_id: DataId) {
        self.written_persistent.insert(data_id);
    }

    pub fn written_files(&self) -> &BTreeSet<DataId> {
        &self.written_files
    }

    pub fn written_persistent(&self) -> &BTreeSet<DataId> {
        &self.written_persistent
    }

    /// Forget `data_id` in both written sets.
    pub fn remove_written(&mut self, data_id: DataId) {
        self.written_files.remove(&data_id);
        self.written_persistent.remove(&data_id);
    }

    /// Hand over the written files, leaving the set empty.
    pub fn take_written_files(&mut self) -> BTreeSet<DataId> {
        std::mem::take(&mut self.written_files)
    }

    fn release_waiters(&mut self) {
        if !self.barrier_waiters.is_empty() || !self.end_waiters.is_empty() {
            debug!(app_id = %self.id, "releasing synchronization waiters");
        }
        for waiter in self.barrier_waiters.drain(..).chain(self.end_waiters.drain(..)) {
            waiter.send(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskId;
    use crate::reply;

    #[test]
    fn barrier_without_tasks_returns_at_once() {
        let mut app = Application::new(AppId(1));
        let (tx, mut rx) = reply::channel();
        app.end_reached(tx);
        assert_eq!(rx.try_take(), Some(Ok(Ok(()))));
        assert!(app.is_ending());
    }

    #[test]
    fn barrier_waits_for_in_flight_tasks() {
        let mut app = Application::new(AppId(1));
        app.new_task();
        app.new_task();
        let (tx, mut rx) = reply::channel();
        app.reach_barrier(tx);
        assert!(!app.is_ending());

        app.task_ended();
        assert!(rx.try_take().is_none());
        app.task_ended();
        assert_eq!(rx.try_take(), Some(Ok(Ok(()))));
        assert_eq!(app.total(), 2);
    }

    #[test]
    fn ending_is_hidden_while_in_a_barrier() {
        let mut app = Application::new(AppId(1));
        app.new_task();
        let (barrier, _keep) = reply::channel();
        app.reach_barrier(barrier);
        let (end, _keep_end) = reply::channel();
        app.end_reached(end);
        assert!(!app.is_ending());
    }

    #[test]
    fn failure_poisons_current_and_future_waiters() {
        let mut app = Application::new(AppId(2));
        app.new_task();
        let (tx, mut rx) = reply::channel();
        app.reach_barrier(tx);

        let failure = TaskFailure {
            task_id: TaskId::from(5),
            app_id: AppId(2),
            name: "t".into(),
        };
        app.fail(failure.clone());
        assert_eq!(
            rx.try_take(),
            Some(Ok(Err(RuntimeError::TaskFailed(failure.clone()))))
        );

        let (tx, mut rx) = reply::channel();
        app.reach_barrier(tx);
        assert_eq!(rx.try_take(), Some(Ok(Err(RuntimeError::TaskFailed(failure)))));
    }

    #[test]
    fn written_files_are_taken_once() {
        let mut app = Application::new(AppId(1));
        app.add_written_file(DataId::from(3));
        app.add_written_file(DataId::from(1));
        app.add_written_persistent(DataId::from(4));
        app.remove_written(DataId::from(4));

        let files: Vec<_> = app.take_written_files().into_iter().collect();
        assert_eq!(files, vec![DataId::from(1), DataId::from(3)]);
        assert!(app.written_files().is_empty());
        assert!(app.written_persistent().is_empty());
    }
}
