//! Logical Data and Versions
//!
//! A [`DataInfo`] is one logical datum: a file, an in-memory object or an
//! externally managed persistent object. It owns the versions of that datum
//! that still have a reason to exist.
//!
//! # Version lifecycle
//!
//! ```text
//!   allocated ──(newer version appears)──▶ superseded
//!       │                                      │
//!   readers, pending write                readers == 0
//!       │                                 write done
//!       ▼                                 no deletion block
//!   current version                            ▼
//!                                           removed
//! ```
//!
//! Removal returns the renaming to the caller, which is responsible for
//! evicting the backing storage.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::id::{DataId, DataInstanceId, Renaming, VersionId};
use super::location::DataLocation;
use super::ObjectCode;
use crate::reply::Reply;

/// What kind of value a datum holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataKind {
    File { original: DataLocation },
    Object { code: ObjectCode },
    Persistent { code: ObjectCode, psco_id: String },
}

/// One snapshot of a datum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVersion {
    instance: DataInstanceId,
    /// Accesses that will read this version and have not finished yet.
    readers: u32,
    /// The access producing this version has not finished yet.
    pending_write: bool,
    /// A newer version exists, or the whole datum was deleted.
    superseded: bool,
}

impl DataVersion {
    fn snapshot(instance: DataInstanceId) -> Self {
        Self {
            instance,
            readers: 0,
            pending_write: false,
            superseded: false,
        }
    }

    fn to_be_written(instance: DataInstanceId) -> Self {
        Self {
            pending_write: true,
            ..Self::snapshot(instance)
        }
    }

    /// The datum and version this entry stands for.
    pub fn instance(&self) -> DataInstanceId {
        self.instance
    }

    pub fn version_id(&self) -> VersionId {
        self.instance.version_id()
    }

    pub fn renaming(&self) -> Renaming {
        self.instance.renaming()
    }

    /// Accesses registered to read this version that have not finished.
    pub fn readers(&self) -> u32 {
        self.readers
    }

    /// Whether the writer of this version has finished.
    pub fn is_written(&self) -> bool {
        !self.pending_write
    }

    /// A newer version exists, or the datum was deleted.
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    /// Ignores deletion blocks, which live on the datum.
    fn is_removable(&self) -> bool {
        self.superseded && self.readers == 0 && !self.pending_write
    }
}

/// A logical datum and its live versions.
#[derive(Debug)]
pub struct DataInfo {
    data_id: DataId,
    kind: DataKind,
    /// Highest version ever allocated; 0 until the first one exists.
    current_version: VersionId,
    versions: BTreeMap<VersionId, DataVersion>,
    deletion_blocks: u32,
    deleted: bool,
    delete_waiters: Vec<Reply<()>>,
}

impl DataInfo {
    pub(crate) fn new(data_id: DataId, kind: DataKind) -> Self {
        Self {
            data_id,
            kind,
            current_version: 0,
            versions: BTreeMap::new(),
            deletion_blocks: 0,
            deleted: false,
            delete_waiters: Vec::new(),
        }
    }

    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    pub fn kind(&self) -> &DataKind {
        &self.kind
    }

    /// Original location, for file data.
    pub fn original_location(&self) -> Option<&DataLocation> {
        match &self.kind {
            DataKind::File { original } => Some(original),
            _ => None,
        }
    }

    /// Number of versions ever allocated for this datum.
    pub fn version_count(&self) -> VersionId {
        self.current_version
    }

    /// Latest version, unless it was already removed.
    pub fn current_version(&self) -> Option<&DataVersion> {
        self.versions.get(&self.current_version)
    }

    pub fn current_instance(&self) -> Option<DataInstanceId> {
        (self.current_version > 0).then(|| DataInstanceId::new(self.data_id, self.current_version))
    }

    /// Instance right before the current one, if it is still alive.
    pub fn previous_instance(&self) -> Option<DataInstanceId> {
        let previous = self.current_version.checked_sub(1)?;
        self.versions.get(&previous).map(|v| v.instance())
    }

    pub fn version(&self, version: VersionId) -> Option<&DataVersion> {
        self.versions.get(&version)
    }

    /// Versions still held, oldest first.
    pub fn live_versions(&self) -> impl Iterator<Item = &DataVersion> {
        self.versions.values()
    }

    /// Whether the datum was marked for deletion.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_deletion_blocked(&self) -> bool {
        self.deletion_blocks > 0
    }

    /// Readers still pending over all live versions.
    pub fn pending_readers(&self) -> u32 {
        self.versions.values().map(|v| v.readers).sum()
    }

    /// Create version 1 as the snapshot of a value that predates the engine.
    ///
    /// Only valid while no version exists yet.
    pub(crate) fn create_initial_version(&mut self) -> DataInstanceId {
        debug_assert_eq!(self.current_version, 0, "initial version already exists");
        self.current_version = 1;
        let instance = DataInstanceId::new(self.data_id, 1);
        self.versions.insert(1, DataVersion::snapshot(instance));
        instance
    }

    /// Register a reader on the current version.
    pub(crate) fn will_be_read(&mut self) -> Option<DataInstanceId> {
        let version = self.versions.get_mut(&self.current_version)?;
        version.readers += 1;
        Some(version.instance)
    }

    /// Allocate the next version. The previous one becomes superseded and is
    /// removed right away when nothing references it.
    pub(crate) fn will_be_written(&mut self) -> (DataInstanceId, Vec<Renaming>) {
        if let Some(previous) = self.versions.get_mut(&self.current_version) {
            previous.superseded = true;
        }
        self.current_version += 1;
        let instance = DataInstanceId::new(self.data_id, self.current_version);
        self.versions
            .insert(self.current_version, DataVersion::to_be_written(instance));
        (instance, self.collect_removable())
    }

    /// A reader of `version` finished.
    pub(crate) fn version_has_been_read(&mut self, version: VersionId) -> Vec<Renaming> {
        match self.versions.get_mut(&version) {
            Some(v) if v.readers > 0 => v.readers -= 1,
            Some(_) => {
                warn!(data_id = %self.data_id, version, "read finished on a version without pending readers");
                return Vec::new();
            }
            None => {
                warn!(data_id = %self.data_id, version, "read finished on an unknown version");
                return Vec::new();
            }
        }
        if self.pending_readers() == 0 {
            self.release_delete_waiters();
        }
        self.collect_removable()
    }

    /// The writer of `version` finished.
    pub(crate) fn version_has_been_written(&mut self, version: VersionId) -> Vec<Renaming> {
        match self.versions.get_mut(&version) {
            Some(v) => v.pending_write = false,
            None => {
                warn!(data_id = %self.data_id, version, "write finished on an unknown version");
                return Vec::new();
            }
        }
        self.collect_removable()
    }

    pub(crate) fn block_deletions(&mut self) {
        self.deletion_blocks += 1;
    }

    /// Lift one deletion block; versions that became removable meanwhile go.
    pub(crate) fn unblock_deletions(&mut self) -> Vec<Renaming> {
        if self.deletion_blocks == 0 {
            warn!(data_id = %self.data_id, "unblocking deletions on a datum that was not blocked");
            return Vec::new();
        }
        self.deletion_blocks -= 1;
        self.collect_removable()
    }

    /// Park `waiter` until no version has pending readers.
    pub(crate) fn wait_until_ready_to_delete(&mut self, waiter: Reply<()>) {
        if self.pending_readers() == 0 {
            waiter.send(());
        } else {
            debug!(data_id = %self.data_id, readers = self.pending_readers(), "deletion waits for readers");
            self.delete_waiters.push(waiter);
        }
    }

    /// Mark every version for removal. Versions still referenced are removed
    /// once their last access finishes.
    pub(crate) fn delete(&mut self) -> Vec<Renaming> {
        self.deleted = true;
        for version in self.versions.values_mut() {
            version.superseded = true;
        }
        self.collect_removable()
    }

    fn release_delete_waiters(&mut self) {
        for waiter in self.delete_waiters.drain(..) {
            waiter.send(());
        }
    }

    fn collect_removable(&mut self) -> Vec<Renaming> {
        if self.deletion_blocks > 0 {
            return Vec::new();
        }
        let removable: Vec<VersionId> = self
            .versions
            .values()
            .filter(|v| v.is_removable())
            .map(|v| v.version_id())
            .collect();
        removable
            .into_iter()
            .filter_map(|id| self.versions.remove(&id))
            .map(|v| {
                debug!(renaming = %v.renaming(), "version removed");
                v.renaming()
            })
            .collect()
    }
}
