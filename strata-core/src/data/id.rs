//! Data Identifiers
//!
//! A logical datum is identified by a [`DataId`]. Each of its snapshots is a
//! [`DataInstanceId`] (datum + version), and every instance has a
//! [`Renaming`] naming its backing storage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a logical datum.
///
/// Assigned by the version store on first access and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataId(u32);

impl DataId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DataId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version number of a datum. Starts at 1 and only grows.
pub type VersionId = u32;

/// One version of one datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataInstanceId {
    data_id: DataId,
    version_id: VersionId,
}

impl DataInstanceId {
    pub fn new(data_id: DataId, version_id: VersionId) -> Self {
        Self {
            data_id,
            version_id,
        }
    }

    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    pub fn version_id(&self) -> VersionId {
        self.version_id
    }

    /// Storage name bound to this instance.
    pub fn renaming(&self) -> Renaming {
        Renaming(format!("d{}v{}", self.data_id, self.version_id))
    }
}

impl fmt::Display for DataInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}v{}", self.data_id, self.version_id)
    }
}

/// Opaque storage identifier of a data instance, formatted `d<data>v<version>`.
///
/// Collaborators must treat it as an opaque key; only this module parses it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Renaming(String);

impl Renaming {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the instance this renaming was built from.
    pub fn parse(&self) -> Option<DataInstanceId> {
        let rest = self.0.strip_prefix('d')?;
        let (data, version) = rest.split_once('v')?;
        let data = data.parse::<u32>().ok()?;
        let version = version.parse::<VersionId>().ok()?;
        Some(DataInstanceId::new(DataId(data), version))
    }

    /// Renaming of the version right before this one, if there is one.
    pub fn previous_version(&self) -> Option<Renaming> {
        let instance = self.parse()?;
        if instance.version_id <= 1 {
            return None;
        }
        Some(DataInstanceId::new(instance.data_id, instance.version_id - 1).renaming())
    }
}

impl fmt::Display for Renaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Renaming {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Renaming {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
