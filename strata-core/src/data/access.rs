//! Data Accesses
//!
//! An access is described twice: by the caller, as [`AccessParams`] (what is
//! touched and how), and by the version store in return, as an
//! [`AccessDescriptor`] (which versions the access observes).

use serde::{Deserialize, Serialize};

use super::id::{DataId, DataInstanceId, Renaming, VersionId};
use super::location::DataLocation;
use super::ObjectCode;
use super::ObjectValue;

/// How an access affects a datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read-only.
    R,
    /// Write-only. The prior value is never observed.
    W,
    /// Read then write.
    RW,
}

impl AccessMode {
    pub fn reads(&self) -> bool {
        matches!(self, Self::R | Self::RW)
    }

    pub fn writes(&self) -> bool {
        matches!(self, Self::W | Self::RW)
    }
}

/// Versions observed by one access.
///
/// Only the read-write variant carries two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessDescriptor {
    Read { read: DataInstanceId },
    Write { written: DataInstanceId },
    ReadWrite {
        read: DataInstanceId,
        written: DataInstanceId,
    },
}

impl AccessDescriptor {
    pub fn data_id(&self) -> DataId {
        match self {
            Self::Read { read } => read.data_id(),
            Self::Write { written } => written.data_id(),
            Self::ReadWrite { written, .. } => written.data_id(),
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self {
            Self::Read { .. } => AccessMode::R,
            Self::Write { .. } => AccessMode::W,
            Self::ReadWrite { .. } => AccessMode::RW,
        }
    }

    /// Instance read by this access, if it reads.
    pub fn read_instance(&self) -> Option<DataInstanceId> {
        match self {
            Self::Read { read } | Self::ReadWrite { read, .. } => Some(*read),
            Self::Write { .. } => None,
        }
    }

    /// Instance produced by this access, if it writes.
    pub fn written_instance(&self) -> Option<DataInstanceId> {
        match self {
            Self::Write { written } | Self::ReadWrite { written, .. } => Some(*written),
            Self::Read { .. } => None,
        }
    }

    pub fn read_version(&self) -> Option<VersionId> {
        self.read_instance().map(|i| i.version_id())
    }

    pub fn written_version(&self) -> Option<VersionId> {
        self.written_instance().map(|i| i.version_id())
    }

    /// Renaming the accessing side must end up holding: the written one for
    /// write-bearing accesses, the read one otherwise.
    pub fn target_renaming(&self) -> Renaming {
        match self {
            Self::Read { read } => read.renaming(),
            Self::Write { written } | Self::ReadWrite { written, .. } => written.renaming(),
        }
    }
}

/// A request to access a datum, as issued by the application side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccessParams {
    File {
        mode: AccessMode,
        location: DataLocation,
    },
    Object {
        mode: AccessMode,
        code: ObjectCode,
        value: Option<ObjectValue>,
    },
    Persistent {
        mode: AccessMode,
        code: ObjectCode,
        psco_id: String,
    },
}

impl AccessParams {
    pub fn mode(&self) -> AccessMode {
        match self {
            Self::File { mode, .. } | Self::Object { mode, .. } | Self::Persistent { mode, .. } => {
                *mode
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(data: u32, version: VersionId) -> DataInstanceId {
        DataInstanceId::new(DataId::from(data), version)
    }

    #[test]
    fn read_write_carries_both_versions() {
        let access = AccessDescriptor::ReadWrite {
            read: instance(1, 2),
            written: instance(1, 3),
        };
        assert_eq!(access.mode(), AccessMode::RW);
        assert_eq!(access.read_version(), Some(2));
        assert_eq!(access.written_version(), Some(3));
        assert_eq!(access.target_renaming().as_str(), "d1v3");
    }

    #[test]
    fn write_has_no_prior_version() {
        let access = AccessDescriptor::Write {
            written: instance(5, 1),
        };
        assert_eq!(access.read_instance(), None);
        assert_eq!(access.data_id(), DataId::from(5));
    }

    #[test]
    fn modes() {
        assert!(AccessMode::R.reads() && !AccessMode::R.writes());
        assert!(!AccessMode::W.reads() && AccessMode::W.writes());
        assert!(AccessMode::RW.reads() && AccessMode::RW.writes());
    }
}
