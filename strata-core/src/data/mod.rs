//! Data Versioning
//!
//! Everything the engine knows about the values tasks exchange:
//!
//! - [`id`]: data, instance and renaming identifiers
//! - [`location`]: file locations and their canonical keys
//! - [`access`]: access modes and the descriptors handed back per access
//! - [`info`]: one logical datum and its versions
//! - [`store`]: the [`VersionStore`] owning all of them
//! - [`backend`]: the storage collaborator the store drives
//!
//! This module depends on no other engine component.

pub mod access;
pub mod backend;
pub mod id;
pub mod info;
pub mod location;
pub mod store;

pub use access::{AccessDescriptor, AccessMode, AccessParams};
pub use backend::{DataBackend, FileTransfer, ResultFile};
pub use id::{DataId, DataInstanceId, Renaming, VersionId};
pub use info::{DataInfo, DataKind, DataVersion};
pub use location::DataLocation;
pub use store::VersionStore;

/// Identity code of an in-memory or persistent object.
pub type ObjectCode = u64;

/// Serialized form of an in-memory object value.
pub type ObjectValue = serde_json::Value;
