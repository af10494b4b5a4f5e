//! Storage Collaborator
//!
//! The version store decides *which* renamings exist; a [`DataBackend`]
//! knows *where* their bytes are. Every side effect the store has on
//! physical storage goes through this trait, so the engine can be driven by
//! an in-process table in tests and by a transfer layer in production.

use serde::Serialize;

use super::id::{DataId, DataInstanceId, Renaming};
use super::location::DataLocation;
use super::ObjectValue;
use crate::error::Result;
use crate::reply::Reply;

/// Order to copy the bytes of `source` to `target`.
///
/// When `completion` is set the backend answers it once the copy finished
/// (or failed); fire-and-forget transfers leave it empty.
#[derive(Debug)]
pub struct FileTransfer {
    pub source: Renaming,
    pub target: DataLocation,
    pub completion: Option<Reply<Result<DataLocation>>>,
}

impl FileTransfer {
    pub fn new(source: Renaming, target: DataLocation) -> Self {
        Self {
            source,
            target,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Reply<Result<DataLocation>>) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// A written file whose final value is being copied back to where the
/// application expects it. The datum stays deletion-blocked until released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultFile {
    pub data_id: DataId,
    pub instance: DataInstanceId,
    /// Newest renaming the backend still held when the copy was ordered.
    pub source: Renaming,
    pub original_location: DataLocation,
}

/// Physical storage as seen by the engine.
///
/// Called only from the request processor thread.
pub trait DataBackend: Send {
    /// Bind `renaming` to a file location.
    fn register_location(&mut self, renaming: &Renaming, location: &DataLocation);

    /// Bind `renaming` to an in-memory value.
    fn register_value(&mut self, renaming: &Renaming, value: ObjectValue);

    /// Bind `renaming` to an externally managed persistent object.
    fn register_persistent(&mut self, renaming: &Renaming, psco_id: &str);

    /// Forget `renaming` and release whatever backs it.
    fn remove_data(&mut self, renaming: &Renaming);

    /// Whether any copy of `renaming` is still held.
    fn exists(&self, renaming: &Renaming) -> bool;

    /// Start copying a renaming to a location. Must not block.
    fn transfer_file(&mut self, transfer: FileTransfer);

    /// Retrieve the value bound to `renaming`. Must not block; the value is
    /// delivered on `reply`.
    fn fetch_object(&mut self, renaming: &Renaming, reply: Reply<Result<ObjectValue>>);
}
