//! Version Store
//!
//! Maps every logical datum the application touches to its [`DataInfo`] and
//! answers access registrations with [`AccessDescriptor`]s.
//!
//! # Keys
//!
//! Files are found by their location key, objects and persistent objects by
//! their identity code. Data ids are handed out in order starting at 1 and
//! are never reused: a deleted file that is accessed again becomes a new
//! datum.
//!
//! # Side effects
//!
//! The store owns no storage. Registrations, removals and transfers are
//! delegated to the [`DataBackend`] passed into each call, which keeps the
//! store itself a plain single-owner structure with no interior locking.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use super::access::{AccessDescriptor, AccessMode, AccessParams};
use super::backend::{DataBackend, FileTransfer, ResultFile};
use super::id::{DataId, DataInstanceId, Renaming};
use super::info::{DataInfo, DataKind};
use super::location::DataLocation;
use super::{ObjectCode, ObjectValue};
use crate::error::{Result, RuntimeError};
use crate::reply::Reply;

/// Logical data and their version histories.
#[derive(Debug)]
pub struct VersionStore {
    name_to_id: HashMap<String, DataId>,
    code_to_id: HashMap<ObjectCode, DataId>,
    id_to_data: HashMap<DataId, DataInfo>,
    /// Values of object versions held on the application side.
    renaming_to_value: HashMap<Renaming, ObjectValue>,
    next_data_id: u32,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            name_to_id: HashMap::new(),
            code_to_id: HashMap::new(),
            id_to_data: HashMap::new(),
            renaming_to_value: HashMap::new(),
            next_data_id: 1,
        }
    }

    /// Register any kind of access.
    pub fn register_data_access(
        &mut self,
        params: &AccessParams,
        backend: &mut dyn DataBackend,
    ) -> AccessDescriptor {
        match params {
            AccessParams::File { mode, location } => {
                self.register_file_access(*mode, location, backend)
            }
            AccessParams::Object { mode, code, value } => {
                self.register_object_access(*mode, value.clone(), *code, backend)
            }
            AccessParams::Persistent {
                mode,
                code,
                psco_id,
            } => self.register_persistent_access(*mode, psco_id, *code, backend),
        }
    }

    /// Register an access to the file at `location`.
    ///
    /// The first read-bearing access binds the location itself as version 1.
    /// A first write-only access has no prior value to bind.
    pub fn register_file_access(
        &mut self,
        mode: AccessMode,
        location: &DataLocation,
        backend: &mut dyn DataBackend,
    ) -> AccessDescriptor {
        let key = location.location_key();
        let (data_id, created) = match self.name_to_id.get(&key) {
            Some(id) => {
                debug!(location = %key, "another access to file");
                (*id, false)
            }
            None => {
                debug!(location = %key, "first access to file");
                let id = self.allocate_id();
                self.name_to_id.insert(key, id);
                (id, true)
            }
        };
        let info = self.id_to_data.entry(data_id).or_insert_with(|| {
            DataInfo::new(
                data_id,
                DataKind::File {
                    original: location.clone(),
                },
            )
        });
        if created && mode.reads() {
            let instance = info.create_initial_version();
            backend.register_location(&instance.renaming(), location);
        }
        let (access, removed) = will_access(mode, info);
        self.evict(removed, backend);
        access
    }

    /// Register an access to the in-memory object identified by `code`.
    ///
    /// The first read-bearing access snapshots `value` as version 1. When
    /// there is no value to snapshot, that first access writes version 1.
    pub fn register_object_access(
        &mut self,
        mode: AccessMode,
        value: Option<ObjectValue>,
        code: ObjectCode,
        backend: &mut dyn DataBackend,
    ) -> AccessDescriptor {
        let (data_id, created) = self.code_entry(code);
        let info = self
            .id_to_data
            .entry(data_id)
            .or_insert_with(|| DataInfo::new(data_id, DataKind::Object { code }));
        let mode = match value {
            Some(value) if created && mode.reads() => {
                let renaming = info.create_initial_version().renaming();
                self.renaming_to_value
                    .insert(renaming.clone(), value.clone());
                backend.register_value(&renaming, value);
                mode
            }
            None if created && mode.reads() => {
                debug!(code, ?mode, "first access to an object without a value, registered as a write");
                AccessMode::W
            }
            _ => mode,
        };
        let (access, removed) = will_access(mode, info);
        self.evict(removed, backend);
        access
    }

    /// Register an access to an externally managed persistent object.
    pub fn register_persistent_access(
        &mut self,
        mode: AccessMode,
        psco_id: &str,
        code: ObjectCode,
        backend: &mut dyn DataBackend,
    ) -> AccessDescriptor {
        let (data_id, created) = self.code_entry(code);
        let info = self.id_to_data.entry(data_id).or_insert_with(|| {
            DataInfo::new(
                data_id,
                DataKind::Persistent {
                    code,
                    psco_id: psco_id.to_string(),
                },
            )
        });
        if created && mode.reads() {
            let instance = info.create_initial_version();
            backend.register_persistent(&instance.renaming(), psco_id);
        }
        let (access, removed) = will_access(mode, info);
        self.evict(removed, backend);
        access
    }

    /// An access registered earlier has finished.
    pub fn data_has_been_accessed(
        &mut self,
        access: &AccessDescriptor,
        backend: &mut dyn DataBackend,
    ) {
        let Some(info) = self.id_to_data.get_mut(&access.data_id()) else {
            warn!(data_id = %access.data_id(), "access finished on unknown data");
            return;
        };
        let mut removed = Vec::new();
        if let Some(version) = access.read_version() {
            removed.extend(info.version_has_been_read(version));
        }
        if let Some(version) = access.written_version() {
            removed.extend(info.version_has_been_written(version));
        }
        self.evict(removed, backend);
    }

    /// Close a main-program access to a file, using the versions its
    /// matching access was given.
    pub fn finish_file_access(
        &mut self,
        mode: AccessMode,
        location: &DataLocation,
        backend: &mut dyn DataBackend,
    ) {
        let access = self
            .name_to_id
            .get(&location.location_key())
            .and_then(|id| self.id_to_data.get(id))
            .and_then(|info| current_access(mode, info));
        match access {
            Some(access) => self.data_has_been_accessed(&access, backend),
            None => warn!(location = %location, "file has not been accessed before"),
        }
    }

    /// Whether any access to the file at `location` was registered.
    pub fn already_accessed(&self, location: &DataLocation) -> bool {
        self.name_to_id.contains_key(&location.location_key())
    }

    /// Datum registered for the file at `location`.
    pub fn data_id_of_location(&self, location: &DataLocation) -> Option<DataId> {
        self.name_to_id.get(&location.location_key()).copied()
    }

    /// Datum registered for the object identified by `code`.
    pub fn data_id_of_code(&self, code: ObjectCode) -> Option<DataId> {
        self.code_to_id.get(&code).copied()
    }

    /// Versioning state of a datum, if it is still known.
    pub fn data_info(&self, data_id: DataId) -> Option<&DataInfo> {
        self.id_to_data.get(&data_id)
    }

    /// Current instance of the object identified by `code`.
    pub fn last_instance(&self, code: ObjectCode) -> Option<DataInstanceId> {
        self.code_to_id
            .get(&code)
            .and_then(|id| self.id_to_data.get(id))
            .and_then(|info| info.current_instance())
    }

    /// Renaming of the current version of the object identified by `code`.
    pub fn last_renaming(&self, code: ObjectCode) -> Option<Renaming> {
        self.last_instance(code).map(|i| i.renaming())
    }

    /// Current instance of each datum, `None` for unknown ids.
    pub fn last_versions(&self, data_ids: &[DataId]) -> Vec<Option<DataInstanceId>> {
        data_ids
            .iter()
            .map(|id| self.id_to_data.get(id).and_then(|i| i.current_instance()))
            .collect()
    }

    /// Location a file datum was first registered with.
    pub fn original_location(&self, data_id: DataId) -> Option<&DataLocation> {
        self.id_to_data
            .get(&data_id)
            .and_then(|info| info.original_location())
    }

    /// Store the application-side value of an object version.
    pub fn set_object_version_value(
        &mut self,
        renaming: &Renaming,
        value: ObjectValue,
        backend: &mut dyn DataBackend,
    ) {
        self.renaming_to_value
            .insert(renaming.clone(), value.clone());
        backend.register_value(renaming, value);
    }

    /// Whether the value of `instance` is held on the application side.
    pub fn is_here(&self, instance: &DataInstanceId) -> bool {
        self.renaming_to_value.contains_key(&instance.renaming())
    }

    /// Application-side value of an object version.
    pub fn object(&self, renaming: &Renaming) -> Option<&ObjectValue> {
        self.renaming_to_value.get(renaming)
    }

    /// Bind `written` to the same value as `read`.
    pub fn new_version_same_value(&mut self, read: &Renaming, written: &Renaming) {
        match self.renaming_to_value.get(read).cloned() {
            Some(value) => {
                self.renaming_to_value.insert(written.clone(), value);
            }
            None => warn!(read = %read, written = %written, "no value held for the read version"),
        }
    }

    /// Obtain the value read by a main-program object access.
    ///
    /// Values held locally are answered at once; others are fetched.
    pub fn transfer_object_value(
        &self,
        access: &AccessDescriptor,
        reply: Reply<Result<ObjectValue>>,
        backend: &mut dyn DataBackend,
    ) {
        let Some(read) = access.read_instance() else {
            reply.send(Err(RuntimeError::UnknownData(format!(
                "object access {} reads no version",
                access.target_renaming()
            ))));
            return;
        };
        let renaming = read.renaming();
        match self.renaming_to_value.get(&renaming) {
            Some(value) => reply.send(Ok(value.clone())),
            None => {
                debug!(renaming = %renaming, "object not held locally, fetching");
                backend.fetch_object(&renaming, reply);
            }
        }
    }

    /// Keep every version of `data_id` alive until it is unblocked.
    pub fn block_deletions(&mut self, data_id: DataId) {
        match self.id_to_data.get_mut(&data_id) {
            Some(info) => info.block_deletions(),
            None => warn!(data_id = %data_id, "cannot block deletions of unknown data"),
        }
    }

    /// Lift one deletion block and remove the versions it was holding.
    pub fn unblock_data_id(&mut self, data_id: DataId, backend: &mut dyn DataBackend) {
        let removed = match self.id_to_data.get_mut(&data_id) {
            Some(info) => info.unblock_deletions(),
            None => {
                warn!(data_id = %data_id, "cannot unblock deletions of unknown data");
                return;
            }
        };
        self.evict(removed, backend);
    }

    /// Park `waiter` until the file at `location` has no pending readers.
    /// Unknown files are answered immediately.
    pub fn wait_for_data_ready_to_delete(&mut self, location: &DataLocation, waiter: Reply<()>) {
        let info = self
            .name_to_id
            .get(&location.location_key())
            .and_then(|id| self.id_to_data.get_mut(id));
        match info {
            Some(info) => info.wait_until_ready_to_delete(waiter),
            None => {
                debug!(location = %location, "no data for location, nothing to wait for");
                waiter.send(());
            }
        }
    }

    /// Delete the file at `location`. Its versions go as soon as nothing
    /// references them and the location key is forgotten.
    pub fn delete_data(
        &mut self,
        location: &DataLocation,
        backend: &mut dyn DataBackend,
    ) -> Option<DataId> {
        let Some(data_id) = self.name_to_id.remove(&location.location_key()) else {
            warn!(location = %location, "deleting unknown data location");
            return None;
        };
        self.delete_versions(data_id, backend);
        Some(data_id)
    }

    /// Delete every version of the object identified by `code`.
    pub fn delete_object(
        &mut self,
        code: ObjectCode,
        backend: &mut dyn DataBackend,
    ) -> Option<DataId> {
        let Some(data_id) = self.code_to_id.remove(&code) else {
            warn!(code, "deleting unknown object");
            return None;
        };
        self.delete_versions(data_id, backend);
        Some(data_id)
    }

    /// Block deletions of a written file and order its newest available
    /// version back to the original location.
    ///
    /// The datum stays blocked until [`VersionStore::unblock_data_id`].
    pub fn block_data_and_get_result_file(
        &mut self,
        data_id: DataId,
        completion: Option<Reply<Result<DataLocation>>>,
        backend: &mut dyn DataBackend,
    ) -> Option<ResultFile> {
        let info = self.id_to_data.get_mut(&data_id)?;
        if info.is_deleted() {
            return None;
        }
        let original = info.original_location()?.clone();
        let instance = info.current_instance()?;
        info.block_deletions();

        let mut source = Some(instance.renaming());
        while let Some(renaming) = source.as_ref() {
            if backend.exists(renaming) {
                break;
            }
            source = renaming.previous_version();
        }
        let Some(source) = source else {
            error!(renaming = %instance.renaming(), "cannot transfer result file nor any of its previous versions");
            self.unblock_data_id(data_id, backend);
            return None;
        };

        debug!(source = %source, target = %original, "ordering result file transfer");
        let mut transfer = FileTransfer::new(source.clone(), original.clone());
        transfer.completion = completion;
        backend.transfer_file(transfer);

        Some(ResultFile {
            data_id,
            instance,
            source,
            original_location: original,
        })
    }

    fn allocate_id(&mut self) -> DataId {
        let data_id = DataId::new(self.next_data_id);
        self.next_data_id += 1;
        data_id
    }

    fn code_entry(&mut self, code: ObjectCode) -> (DataId, bool) {
        match self.code_to_id.get(&code) {
            Some(id) => (*id, false),
            None => {
                debug!(code, "first access to object");
                let id = self.allocate_id();
                self.code_to_id.insert(code, id);
                (id, true)
            }
        }
    }

    fn delete_versions(&mut self, data_id: DataId, backend: &mut dyn DataBackend) {
        let removed = match self.id_to_data.get_mut(&data_id) {
            Some(info) => info.delete(),
            None => return,
        };
        debug!(data_id = %data_id, removed = removed.len(), "data deleted");
        self.evict(removed, backend);
    }

    fn evict(&mut self, removed: Vec<Renaming>, backend: &mut dyn DataBackend) {
        for renaming in removed {
            self.renaming_to_value.remove(&renaming);
            backend.remove_data(&renaming);
        }
    }
}

/// Allocate the versions one access observes. Returns the renamings that
/// became removable along the way.
fn will_access(mode: AccessMode, info: &mut DataInfo) -> (AccessDescriptor, Vec<Renaming>) {
    let read = if mode.reads() {
        let read = info.will_be_read();
        if read.is_none() {
            warn!(data_id = %info.data_id(), "no current version to read, access degrades to a write");
        }
        read
    } else {
        None
    };
    let (access, removed) = match read {
        Some(read) if !mode.writes() => (AccessDescriptor::Read { read }, Vec::new()),
        read => {
            let (written, removed) = info.will_be_written();
            let access = match read {
                Some(read) => AccessDescriptor::ReadWrite { read, written },
                None => AccessDescriptor::Write { written },
            };
            (access, removed)
        }
    };
    debug!(data_id = %info.data_id(), ?access, "access registered");
    (access, removed)
}

/// Descriptor matching the versions a main-program access of `mode` was
/// given, assuming it was the latest access.
fn current_access(mode: AccessMode, info: &DataInfo) -> Option<AccessDescriptor> {
    let current = info.current_instance()?;
    Some(match mode {
        AccessMode::R => AccessDescriptor::Read { read: current },
        AccessMode::W => AccessDescriptor::Write { written: current },
        AccessMode::RW => AccessDescriptor::ReadWrite {
            read: info.previous_instance()?,
            written: current,
        },
    })
}
