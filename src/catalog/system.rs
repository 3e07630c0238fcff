//! Mounted volume enumeration for the running platform.
//!
//! Best effort: whatever the OS reports is turned into [`Volume`]s and the
//! catalog does the filtering. Nothing here creates files.
use std::path::{Path, PathBuf};

use crate::catalog::{is_reserved_mount, VolumeSource};
use crate::models::Volume;

/// [`VolumeSource`] backed by the operating system's mount table
#[derive(Debug, Clone, Default)]
pub struct SystemVolumes;

impl SystemVolumes {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeSource for SystemVolumes {
    fn enumerate(&self) -> Vec<Volume> {
        let volumes = enumerate_volumes();
        tracing::debug!(count = volumes.len(), "enumerated volumes");
        volumes
    }
}

// Filesystems that never back a physical disk.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

const SYSTEM_MOUNT_PREFIXES: &[&str] = &["/proc", "/sys", "/dev"];
const EXTERNAL_MOUNT_PREFIXES: &[&str] = &["/media", "/run/media", "/mnt"];

/// Parse a `/proc/mounts`-style mount table
pub fn parse_mount_table(content: &str) -> Vec<Volume> {
    let mut volumes = Vec::new();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (mount_point, fs_type, options) = (fields[1], fields[2], fields[3]);

        if PSEUDO_FILESYSTEMS.contains(&fs_type) {
            continue;
        }

        let path = PathBuf::from(unescape_mount_path(mount_point));
        if SYSTEM_MOUNT_PREFIXES.iter().any(|p| path.starts_with(p)) || is_reserved_mount(&path) {
            continue;
        }
        // /run holds runtime state; removable media below /run/media is real.
        if path.starts_with("/run") && !path.starts_with("/run/media") {
            continue;
        }

        let writable = options.split(',').all(|opt| opt != "ro");
        let internal = !EXTERNAL_MOUNT_PREFIXES.iter().any(|p| path.starts_with(p));
        let name = mount_name(&path);

        volumes.push(Volume::new(path, name, writable, internal));
    }

    volumes
}

/// Mount tables escape whitespace as octal (`\040` for a space)
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let is_escape = bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b));
        if is_escape {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn mount_name(path: &Path) -> String {
    if path == Path::new("/") {
        return "Root".to_string();
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn enumerate_volumes() -> Vec<Volume> {
    match std::fs::read_to_string("/proc/mounts") {
        Ok(content) => parse_mount_table(&content)
            .into_iter()
            .filter(|v| v.path.is_dir())
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "unable to read /proc/mounts");
            Vec::new()
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn enumerate_volumes() -> Vec<Volume> {
    let entries = match std::fs::read_dir("/Volumes") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "unable to list /Volumes");
            return Vec::new();
        }
    };

    let root = std::fs::canonicalize("/").unwrap_or_else(|_| PathBuf::from("/"));
    let mut volumes = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        // The boot volume appears in /Volumes as a symlink to "/".
        let internal = std::fs::canonicalize(&path).map(|p| p == root).unwrap_or(false);
        let writable = !metadata.permissions().readonly();
        volumes.push(Volume::new(path, name, writable, internal));
    }
    volumes.sort_by(|a, b| b.internal.cmp(&a.internal).then(a.name.cmp(&b.name)));
    volumes
}

#[cfg(windows)]
fn enumerate_volumes() -> Vec<Volume> {
    const DRIVE_REMOVABLE: u32 = 2;
    const DRIVE_REMOTE: u32 = 4;
    const DRIVE_CDROM: u32 = 5;

    extern "system" {
        fn GetLogicalDrives() -> u32;
        fn GetDriveTypeW(root_path_name: *const u16) -> u32;
    }

    let mut volumes = Vec::new();
    let mask = unsafe { GetLogicalDrives() };
    for i in 0..26u8 {
        if mask & (1 << i) == 0 {
            continue;
        }
        let letter = (b'A' + i) as char;
        let root = format!("{}:\\", letter);
        let path = PathBuf::from(&root);
        if !path.exists() {
            continue;
        }

        let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
        let drive_type = unsafe { GetDriveTypeW(wide.as_ptr()) };
        if drive_type == DRIVE_REMOTE {
            continue;
        }

        let name = format!("Local Disk ({}:)", letter);
        let internal = drive_type != DRIVE_REMOVABLE;
        let writable = drive_type != DRIVE_CDROM;
        volumes.push(Volume::new(path, name, writable, internal));
    }
    volumes
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    windows
)))]
fn enumerate_volumes() -> Vec<Volume> {
    vec![Volume::new("/", "Root", true, true)]
}
