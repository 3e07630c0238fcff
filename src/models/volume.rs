//! Mounted volume descriptor

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A mountable storage unit as reported by the platform.
///
/// Identity is the mount path: two descriptors with the same path are the
/// same volume even if their name or flags changed between enumerations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Mount point / drive root
    pub path: PathBuf,
    /// Display name (volume label)
    pub name: String,
    /// Whether the volume was writable when it was discovered
    pub writable: bool,
    /// Internal disk (`true`) or removable/external (`false`)
    pub internal: bool,
}

impl Volume {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, writable: bool, internal: bool) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            writable,
            internal,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name to show the user; falls back to the last path component
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Hidden volumes are never offered for testing
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

impl PartialEq for Volume {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Volume {}

impl Hash for Volume {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}
