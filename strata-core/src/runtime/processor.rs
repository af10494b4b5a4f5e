//! Access Processor
//!
//! The single writer of all version and dependency state. Application
//! threads call the methods of [`AccessProcessor`]; each call becomes a
//! [`Request`] on an unbounded FIFO that one dedicated thread drains,
//! processing every request to completion before taking the next.
//!
//! Calls that need an answer block the calling thread on a one-shot reply.
//! They must therefore not be made from inside an async runtime.
//!
//! # Shutdown
//!
//! [`AccessProcessor::shutdown`] flips a closing flag before the shutdown
//! request is queued, so every later call fails with
//! [`RuntimeError::QueueClosed`]. Requests that slipped in behind the
//! shutdown request are dropped; their callers see
//! [`RuntimeError::ReplyDropped`].

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::collab::Collaborators;
use super::request::{OrderedResult, Request};
use crate::config::RuntimeConfig;
use crate::data::{
    AccessDescriptor, AccessMode, AccessParams, DataBackend, DataId, DataLocation, FileTransfer,
    ObjectCode, ObjectValue, Renaming, ResultFile, VersionStore,
};
use crate::error::{Result, RuntimeError};
use crate::graph::{
    AppId, ReadyNotifier, TaskAnalyser, TaskDescription, TaskId, TaskOutcome, TaskStateReport,
};
use crate::reply::{self, Reply};

/// Handle to the request processor thread.
pub struct AccessProcessor {
    config: RuntimeConfig,
    tx: mpsc::UnboundedSender<Request>,
    closing: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AccessProcessor {
    /// Spawn the processor thread.
    pub fn start(config: RuntimeConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            notifier,
            backend,
            observer,
        } = collaborators;

        let observer = if config.draw_graph {
            observer
        } else {
            if observer.is_some() {
                debug!("graph drawing disabled, ignoring observer");
            }
            None
        };

        let engine = Engine {
            config: config.clone(),
            store: VersionStore::new(),
            analyser: TaskAnalyser::new(observer),
            backend,
            notifier,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name(config.processor_thread_name.clone())
            .spawn(move || engine.run(rx))
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        info!(
            thread = %config.processor_thread_name,
            app_host = %config.app_host,
            working_dir = %config.working_dir.display(),
            "access processor started"
        );

        Ok(Self {
            config,
            tx,
            closing: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether shutdown has begun.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Submit a task. Its dependencies are analysed asynchronously.
    pub fn new_task(&self, description: TaskDescription) -> Result<TaskId> {
        let task_id = TaskId::new();
        self.enqueue(Request::TaskAnalysis {
            task_id,
            description,
        })?;
        Ok(task_id)
    }

    pub fn notify_task_end(&self, outcome: TaskOutcome) -> Result<()> {
        self.enqueue(Request::TaskEnd(outcome))
    }

    // ------------------------------------------------------------------
    // Data accesses
    // ------------------------------------------------------------------

    pub fn register_data_access(&self, params: AccessParams) -> Result<AccessDescriptor> {
        self.ask(|reply| Request::RegisterDataAccess { params, reply })
    }

    pub fn already_accessed(&self, location: &DataLocation) -> Result<bool> {
        let location = location.clone();
        self.ask(|reply| Request::AlreadyAccessed { location, reply })
    }

    /// Block until the last writer of `data_id` has ended.
    pub fn wait_for_task(&self, data_id: DataId, mode: AccessMode) -> Result<()> {
        self.ask(|reply| Request::WaitForTask {
            data_id,
            mode,
            reply,
        })?
    }

    /// Wait for the writer behind a main-program access. When the writer
    /// failed, the version the access was going to read is given back so a
    /// later deletion does not wait for it.
    fn wait_for_access(&self, access: AccessDescriptor, mode: AccessMode) -> Result<()> {
        let waited = self.wait_for_task(access.data_id(), mode);
        if waited.is_err() {
            if let Some(read) = access.read_instance() {
                self.enqueue(Request::DataAccessed {
                    access: AccessDescriptor::Read { read },
                })?;
            }
        }
        waited
    }

    /// Make a file available to the main program.
    ///
    /// Files no task has touched are returned untouched. Otherwise the
    /// call waits for the last writer, copies the read version into the
    /// working directory and, for write-bearing modes, binds the new version
    /// to the returned location.
    pub fn main_access_to_file(
        &self,
        location: &DataLocation,
        mode: AccessMode,
    ) -> Result<DataLocation> {
        if !self.already_accessed(location)? {
            debug!(location = %location, "file not accessed before, using it in place");
            return Ok(location.clone());
        }

        let access = self.register_data_access(AccessParams::File {
            mode,
            location: location.clone(),
        })?;
        let wait_mode = if mode == AccessMode::R {
            AccessMode::R
        } else {
            AccessMode::RW
        };
        self.wait_for_access(access, wait_mode)?;

        let mut target = location.clone();
        if access.read_instance().is_some() {
            target = self.ask(|reply| Request::TransferOpenFile { access, reply })??;
        }
        if let Some(written) = access.written_instance() {
            target = self.working_location(&written.renaming());
            self.enqueue(Request::RegisterLocation {
                renaming: written.renaming(),
                location: target.clone(),
            })?;
        }
        debug!(location = %location, target = %target, mode = ?mode, "main file access granted");
        Ok(target)
    }

    /// The main program is done with a file it opened.
    pub fn finish_access_to_file(&self, location: &DataLocation, mode: AccessMode) -> Result<()> {
        if !self.already_accessed(location)? {
            debug!(location = %location, "file not tracked, nothing to finish");
            return Ok(());
        }
        self.enqueue(Request::FinishFileAccess {
            mode,
            location: location.clone(),
        })
    }

    /// Take over an object from the tasks.
    ///
    /// Waits for its last writer, obtains the latest value and records it
    /// as a new version owned by the main program.
    pub fn main_access_to_object(&self, code: ObjectCode, value: ObjectValue) -> Result<ObjectValue> {
        let access = self.register_data_access(AccessParams::Object {
            mode: AccessMode::RW,
            code,
            value: Some(value),
        })?;
        self.wait_for_access(access, AccessMode::RW)?;

        let value = self.ask(|reply| Request::TransferObject { access, reply })??;
        if let Some(written) = access.written_instance() {
            self.set_object_version_value(&written.renaming(), value.clone())?;
        }
        self.enqueue(Request::DataAccessed { access })?;
        debug!(code, renaming = %access.target_renaming(), "main object access granted");
        Ok(value)
    }

    /// Whether the latest version of `code` is held by the main program.
    pub fn is_current_register_value_valid(&self, code: ObjectCode) -> Result<bool> {
        self.ask(|reply| Request::IsObjectHere { code, reply })
    }

    pub fn last_renaming(&self, code: ObjectCode) -> Result<Option<Renaming>> {
        self.ask(|reply| Request::GetLastRenaming { code, reply })
    }

    pub fn set_object_version_value(&self, renaming: &Renaming, value: ObjectValue) -> Result<()> {
        self.enqueue(Request::SetObjectVersionValue {
            renaming: renaming.clone(),
            value,
        })
    }

    pub fn new_version_same_value(&self, read: &Renaming, written: &Renaming) -> Result<()> {
        self.enqueue(Request::NewVersionSameValue {
            read: read.clone(),
            written: written.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Block until every task of `app_id` submitted so far has ended.
    pub fn barrier(&self, app_id: AppId) -> Result<()> {
        self.ask(|reply| Request::Barrier { app_id, reply })?
    }

    /// Announce the end of task generation and wait for the remaining tasks.
    pub fn no_more_tasks(&self, app_id: AppId) -> Result<()> {
        self.ask(|reply| Request::EndOfApp { app_id, reply })?
    }

    /// Copy every file `app_id` wrote back to its original location.
    ///
    /// Files whose copy fails are logged and left out of the result.
    pub fn get_result_files(&self, app_id: AppId) -> Result<Vec<ResultFile>> {
        let ordered = self.ask(|reply| Request::GetResultFiles { app_id, reply })?;
        let mut files = Vec::with_capacity(ordered.len());
        let mut data_ids = Vec::with_capacity(ordered.len());
        for (file, completion) in ordered {
            data_ids.push(file.data_id);
            match completion.wait_flat() {
                Ok(location) => {
                    debug!(renaming = %file.source, location = %location, "result file transferred");
                    files.push(file);
                }
                Err(err) => {
                    error!(renaming = %file.source, error = %err, "result file transfer failed");
                }
            }
        }
        self.enqueue(Request::UnblockResultFiles { data_ids })?;
        Ok(files)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete a file once no task still has to read any of its versions.
    pub fn mark_for_deletion(&self, location: &DataLocation) -> Result<()> {
        let waited = location.clone();
        self.ask(|reply| Request::WaitForDataReadyToDelete {
            location: waited,
            reply,
        })?;
        let location = location.clone();
        self.ask(|reply| Request::DeleteFile { location, reply })
    }

    pub fn delete_object(&self, code: ObjectCode) -> Result<()> {
        self.enqueue(Request::DeleteObject { code })
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn current_task_state(&self) -> Result<TaskStateReport> {
        self.ask(|reply| Request::TasksState { reply })
    }

    pub fn graph_dot(&self) -> Result<String> {
        self.ask(|reply| Request::GraphDot { reply })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop accepting requests, let the processor drain what is queued
    /// and join its thread. Calling it again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            debug!("access processor already shut down");
            return Ok(());
        }
        let (reply, pending) = reply::channel();
        let sent = self.tx.send(Request::Shutdown { reply }).is_ok();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("access processor thread panicked");
            }
        }
        if !sent {
            return Err(RuntimeError::QueueClosed);
        }
        pending.wait()?;
        info!("access processor shut down");
        Ok(())
    }

    fn working_location(&self, renaming: &Renaming) -> DataLocation {
        working_location(&self.config, renaming)
    }

    fn enqueue(&self, request: Request) -> Result<()> {
        if self.is_closing() {
            error!(request = request.kind(), "queue offer failed: access processor is shutting down");
            return Err(RuntimeError::QueueClosed);
        }
        self.tx.send(request).map_err(|rejected| {
            error!(request = rejected.0.kind(), "queue offer failed: access processor is gone");
            RuntimeError::QueueClosed
        })
    }

    fn ask<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, pending) = reply::channel();
        self.enqueue(build(reply))?;
        pending.wait()
    }
}

impl Drop for AccessProcessor {
    fn drop(&mut self) {
        if !self.is_closing() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "access processor did not shut down cleanly");
            }
        }
    }
}

impl std::fmt::Debug for AccessProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessProcessor")
            .field("thread", &self.config.processor_thread_name)
            .field("closing", &self.is_closing())
            .finish()
    }
}

fn working_location(config: &RuntimeConfig, renaming: &Renaming) -> DataLocation {
    DataLocation::new(
        config.app_host.clone(),
        config.working_dir.join(renaming.as_str()),
    )
}

/// State owned by the processor thread.
struct Engine {
    config: RuntimeConfig,
    store: VersionStore,
    analyser: TaskAnalyser,
    backend: Box<dyn DataBackend>,
    notifier: Box<dyn ReadyNotifier>,
}

impl Engine {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        let mut shutdown = None;
        while let Some(request) = rx.blocking_recv() {
            trace!(request = request.kind(), "processing request");
            if let ControlFlow::Break(reply) = self.handle(request) {
                shutdown = Some(reply);
                break;
            }
        }

        rx.close();
        while let Ok(request) = rx.try_recv() {
            warn!(request = request.kind(), "request dropped after shutdown");
        }
        info!("access processor stopped");
        if let Some(reply) = shutdown {
            reply.send(());
        }
    }

    fn handle(&mut self, request: Request) -> ControlFlow<Reply<()>> {
        let backend = self.backend.as_mut();
        match request {
            Request::TaskAnalysis {
                task_id,
                description,
            } => self.analyser.process_task(
                task_id,
                description,
                &mut self.store,
                backend,
                self.notifier.as_mut(),
            ),
            Request::TaskEnd(outcome) => {
                self.analyser
                    .end_task(outcome, &mut self.store, backend, self.notifier.as_mut())
            }
            Request::RegisterDataAccess { params, reply } => {
                reply.send(self.store.register_data_access(&params, backend));
            }
            Request::AlreadyAccessed { location, reply } => {
                reply.send(self.store.already_accessed(&location));
            }
            Request::WaitForTask {
                data_id,
                mode,
                reply,
            } => self.analyser.find_waited_task(data_id, mode, reply),
            Request::TransferOpenFile { access, reply } => {
                let Some(read) = access.read_instance() else {
                    reply.send(Err(RuntimeError::UnknownData(format!(
                        "file access {} reads no version",
                        access.target_renaming()
                    ))));
                    return ControlFlow::Continue(());
                };
                let target = working_location(&self.config, &access.target_renaming());
                debug!(source = %read.renaming(), target = %target, "opening file for the main program");
                backend.transfer_file(
                    FileTransfer::new(read.renaming(), target).with_completion(reply),
                );
            }
            Request::TransferObject { access, reply } => {
                self.store.transfer_object_value(&access, reply, backend);
            }
            Request::DataAccessed { access } => {
                self.store.data_has_been_accessed(&access, backend);
            }
            Request::RegisterLocation { renaming, location } => {
                backend.register_location(&renaming, &location);
            }
            Request::FinishFileAccess { mode, location } => {
                self.store.finish_file_access(mode, &location, backend);
            }
            Request::IsObjectHere { code, reply } => {
                let here = self
                    .store
                    .last_instance(code)
                    .is_some_and(|instance| self.store.is_here(&instance));
                reply.send(here);
            }
            Request::GetLastRenaming { code, reply } => {
                reply.send(self.store.last_renaming(code));
            }
            Request::SetObjectVersionValue { renaming, value } => {
                self.store.set_object_version_value(&renaming, value, backend);
            }
            Request::NewVersionSameValue { read, written } => {
                self.store.new_version_same_value(&read, &written);
            }
            Request::Barrier { app_id, reply } => self.analyser.barrier(app_id, reply),
            Request::EndOfApp { app_id, reply } => self.analyser.no_more_tasks(app_id, reply),
            Request::GetResultFiles { app_id, reply } => {
                let written = self.analyser.get_and_remove_written_files(app_id);
                let mut ordered: Vec<OrderedResult> = Vec::with_capacity(written.len());
                for data_id in written {
                    let (completion, pending) = reply::channel();
                    if let Some(file) =
                        self.store
                            .block_data_and_get_result_file(data_id, Some(completion), backend)
                    {
                        ordered.push((file, pending));
                    }
                }
                debug!(app_id = %app_id, files = ordered.len(), "result files ordered");
                reply.send(ordered);
            }
            Request::UnblockResultFiles { data_ids } => {
                for data_id in data_ids {
                    self.store.unblock_data_id(data_id, backend);
                }
            }
            Request::WaitForDataReadyToDelete { location, reply } => {
                self.store.wait_for_data_ready_to_delete(&location, reply);
            }
            Request::DeleteFile { location, reply } => {
                if let Some(data_id) = self.store.delete_data(&location, backend) {
                    self.analyser.delete_data(data_id);
                }
                reply.send(());
            }
            Request::DeleteObject { code } => {
                if let Some(data_id) = self.store.delete_object(code, backend) {
                    self.analyser.delete_data(data_id);
                }
            }
            Request::TasksState { reply } => reply.send(self.analyser.task_state_report()),
            Request::GraphDot { reply } => reply.send(self.analyser.graph_dot()),
            Request::Shutdown { reply } => {
                info!("shutdown requested");
                return ControlFlow::Break(reply);
            }
        }
        ControlFlow::Continue(())
    }
}
