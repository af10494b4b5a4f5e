//! Data Locations
//!
//! A [`DataLocation`] names a file on a host. Files are keyed in the version
//! store by their location key, which is built from a lexically normalized
//! path so that `a/./b` and `a/c/../b` resolve to the same datum.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataLocation {
    host: String,
    path: PathBuf,
}

impl DataLocation {
    pub fn new(host: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            host: host.into(),
            path: normalize(path.as_ref()),
        }
    }

    /// A location on the application host.
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self::new("localhost", path)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Canonical key used to look the datum up.
    pub fn location_key(&self) -> String {
        format!("{}:{}", self.host, self.path.display())
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location_key())
    }
}

/// Lexical normalization; the file system is never consulted.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
