//! Volume catalog
//!
//! Keeps the list of testable volumes and their test states in sync with
//! what the platform reports, without disturbing states of volumes that
//! are still mounted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{Volume, VolumeTestState};

pub mod system;

pub use system::SystemVolumes;

/// Firmware, recovery and swap volumes that are never offered for testing
pub const RESERVED_VOLUME_NAMES: &[&str] = &[
    "Preboot",
    "Recovery",
    "VM",
    "Update",
    "xarts",
    "iSCPreboot",
    "Hardware",
    "EFI",
    "efi",
];

/// Firmware and boot partitions, never offered for testing
pub const RESERVED_MOUNT_POINTS: &[&str] = &["/boot", "/boot/efi", "/efi"];

/// Source of mounted volumes (the platform enumeration API)
pub trait VolumeSource: Send {
    /// Currently mounted volumes; an empty list is valid
    fn enumerate(&self) -> Vec<Volume>;
}

impl<F> VolumeSource for F
where
    F: Fn() -> Vec<Volume> + Send,
{
    fn enumerate(&self) -> Vec<Volume> {
        self()
    }
}

/// A volume and the state of its most recent test
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub volume: Volume,
    pub state: VolumeTestState,
}

impl CatalogEntry {
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            state: VolumeTestState::new(),
        }
    }
}

/// Whether a volume name is on the fixed reserved list
pub fn is_reserved(name: &str) -> bool {
    RESERVED_VOLUME_NAMES.contains(&name)
}

/// Whether a mount point is a firmware or boot partition
pub fn is_reserved_mount(path: &Path) -> bool {
    RESERVED_MOUNT_POINTS.iter().any(|p| path == Path::new(p))
}

pub struct VolumeCatalog {
    source: Box<dyn VolumeSource>,
    entries: Vec<CatalogEntry>,
}

impl VolumeCatalog {
    /// Create an empty catalog; call [`refresh`](Self::refresh) to populate it
    pub fn new(source: impl VolumeSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            entries: Vec::new(),
        }
    }

    /// Re-enumerate volumes.
    ///
    /// Entries for volumes that are still present are kept as they are,
    /// state included. New volumes start `Idle`; vanished ones are dropped.
    pub fn refresh(&mut self) -> &[CatalogEntry] {
        let mut previous: HashMap<PathBuf, CatalogEntry> = self
            .entries
            .drain(..)
            .map(|entry| (entry.volume.path.clone(), entry))
            .collect();
        let mut seen = HashSet::new();
        let mut refreshed = Vec::new();

        for volume in self.source.enumerate() {
            if volume.is_hidden() || is_reserved(&volume.name) || is_reserved_mount(&volume.path) {
                debug!(name = %volume.name, "skipping system volume");
                continue;
            }
            if !seen.insert(volume.path.clone()) {
                continue;
            }

            let entry = previous
                .remove(&volume.path)
                .unwrap_or_else(|| CatalogEntry::new(volume));
            refreshed.push(entry);
        }

        for path in previous.keys() {
            debug!(path = %path.display(), "volume no longer mounted");
        }

        self.entries = refreshed;
        &self.entries
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, path: &Path) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.volume.path == path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut CatalogEntry> {
        self.entries.iter_mut().find(|e| e.volume.path == path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
