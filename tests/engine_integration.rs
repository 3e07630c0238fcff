use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ssdspeed::bench::{BenchmarkEngine, ChannelSink, NullSink};
use ssdspeed::config::SpeedTestConfig;
use ssdspeed::io::{CacheBypass, DiskIO, PlatformDiskIO, UncachedFile};
use ssdspeed::{SpeedTestError, TestStatus, Volume, VolumeTestState, TEMP_FILE_PREFIX};
use tempfile::tempdir;

const TOTAL: u64 = 1024 * 1024;
const CHUNK: u64 = 64 * 1024;

fn config(fallback: &Path) -> SpeedTestConfig {
    SpeedTestConfig::new()
        .with_total_size(TOTAL)
        .with_chunk_size(CHUNK)
        .with_fallback_dir(fallback)
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Wraps the platform I/O to inject write failures and truncated reads
#[derive(Default)]
struct FaultyDiskIO {
    inner: PlatformDiskIO,
    writes_before_failure: Option<usize>,
    read_limit: Option<u64>,
    removals: Arc<AtomicUsize>,
}

struct FaultyFile {
    inner: Box<dyn UncachedFile>,
    writes_left: Option<usize>,
    read_left: Option<u64>,
}

impl DiskIO for FaultyDiskIO {
    fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
        Ok(Box::new(FaultyFile {
            inner: self.inner.open_uncached_write(path)?,
            writes_left: self.writes_before_failure,
            read_left: None,
        }))
    }

    fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
        Ok(Box::new(FaultyFile {
            inner: self.inner.open_uncached_read(path)?,
            writes_left: None,
            read_left: self.read_limit,
        }))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_file(path)
    }
}

impl UncachedFile for FaultyFile {
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
            }
            *left -= 1;
        }
        self.inner.write_chunk(buf)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read_chunk(buf)?;
        match self.read_left.as_mut() {
            None => Ok(n),
            Some(left) => {
                let n = (n as u64).min(*left);
                *left -= n;
                Ok(n as usize)
            }
        }
    }

    fn sync_all(&mut self) -> io::Result<()> {
        self.inner.sync_all()
    }

    fn cache_bypass(&self) -> CacheBypass {
        self.inner.cache_bypass()
    }
}

#[test]
fn test_successful_run_reports_progress_and_speeds() {
    let volume_dir = tempdir().unwrap();
    let fallback = tempdir().unwrap();
    let engine = BenchmarkEngine::new(config(fallback.path())).unwrap();
    let volume = Volume::new(volume_dir.path(), "Scratch", true, true);

    let (mut sink, mut rx) = ChannelSink::new();
    let mut state = VolumeTestState::new();
    let summary = engine
        .run_test(&volume, &mut state, &mut sink)
        .unwrap()
        .expect("idle volume should run");

    let updates: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(updates.iter().all(|u| u.volume == volume));
    assert_eq!(updates.first().unwrap().state.status, TestStatus::Testing);

    let progress: Vec<f64> = updates.iter().map(|u| u.state.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*progress.last().unwrap(), 1.0);

    // Write speed is known before the read phase starts.
    let first_read_progress = updates
        .iter()
        .position(|u| u.state.progress > 0.5)
        .unwrap();
    assert!(updates[first_read_progress].state.write_speed_mbps > 0.0);
    assert_eq!(updates[first_read_progress].state.read_speed_mbps, 0.0);

    assert_eq!(state.status, TestStatus::Success);
    assert!(state.write_speed_mbps > 0.0);
    assert!(state.read_speed_mbps > 0.0);
    assert!(!summary.used_fallback);
    assert!(summary.write.finished_at >= summary.write.started_at);
    assert!(summary.read.started_at >= summary.write.finished_at);
    assert!(!summary.file_path.exists());
    assert_eq!(file_count(volume_dir.path()), 0);
}

#[test]
fn test_temp_file_is_named_and_placed_on_volume_root() {
    let volume_dir = tempdir().unwrap();
    let fallback = tempdir().unwrap();
    let engine = BenchmarkEngine::new(config(fallback.path())).unwrap();
    let volume = Volume::new(volume_dir.path(), "Scratch", true, true);

    let mut seen = None;
    engine
        .execute(&volume, &mut |_| {
            if seen.is_none() {
                seen = std::fs::read_dir(volume_dir.path())
                    .unwrap()
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .next();
            }
        })
        .unwrap();

    let name = seen.expect("test file should exist during the run");
    assert!(name.starts_with(TEMP_FILE_PREFIX));
    assert_eq!(file_count(volume_dir.path()), 0);
}

#[test]
fn test_unwritable_root_uses_fallback_directory() {
    let parent = tempdir().unwrap();
    let fallback = tempdir().unwrap();
    let missing_root = parent.path().join("unmounted");
    let engine = BenchmarkEngine::new(config(fallback.path())).unwrap();
    let volume = Volume::new(&missing_root, "Gone", true, false);

    let mut state = VolumeTestState::new();
    let summary = engine
        .run_test(&volume, &mut state, &mut NullSink)
        .unwrap()
        .unwrap();

    assert!(summary.used_fallback);
    assert!(summary.file_path.starts_with(fallback.path()));
    assert_eq!(state.status, TestStatus::Success);
    assert_eq!(file_count(fallback.path()), 0);
    assert!(!missing_root.exists());
}

/// Read-only directories do not stop root, which bypasses permission bits.
#[cfg(unix)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(unix)]
fn set_mode(dir: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(unix)]
#[test]
fn test_read_only_root_uses_fallback_directory() {
    if running_as_root() {
        return;
    }
    let root = tempdir().unwrap();
    let fallback = tempdir().unwrap();
    set_mode(root.path(), 0o555);

    let engine = BenchmarkEngine::new(config(fallback.path())).unwrap();
    let volume = Volume::new(root.path(), "ReadOnly", false, false);
    let mut state = VolumeTestState::new();
    let result = engine.run_test(&volume, &mut state, &mut NullSink);
    set_mode(root.path(), 0o755);

    let summary = result.unwrap().unwrap();
    assert!(summary.used_fallback);
    assert!(summary.file_path.starts_with(fallback.path()));
    assert_eq!(state.status, TestStatus::Success);
    assert_eq!(file_count(root.path()), 0);
    assert_eq!(file_count(fallback.path()), 0);
}

#[cfg(unix)]
#[test]
fn test_read_only_root_and_fallback() {
    if running_as_root() {
        return;
    }
    let root = tempdir().unwrap();
    let fallback = tempdir().unwrap();
    set_mode(root.path(), 0o555);
    set_mode(fallback.path(), 0o555);

    let engine = BenchmarkEngine::new(config(fallback.path())).unwrap();
    let volume = Volume::new(root.path(), "ReadOnly", false, false);
    let mut state = VolumeTestState::new();
    let result = engine.run_test(&volume, &mut state, &mut NullSink);
    set_mode(root.path(), 0o755);
    set_mode(fallback.path(), 0o755);

    let err = result.unwrap_err();
    assert!(matches!(err, SpeedTestError::Io { op: "open", .. }));
    assert_eq!(
        err.io_error().map(|e| e.kind()),
        Some(io::ErrorKind::PermissionDenied)
    );
    assert_eq!(state.status, TestStatus::Error);
    assert_eq!(file_count(root.path()), 0);
    assert_eq!(file_count(fallback.path()), 0);
}

#[test]
fn test_root_and_fallback_unavailable() {
    let parent = tempdir().unwrap();
    let engine = BenchmarkEngine::new(config(&parent.path().join("no-fallback"))).unwrap();
    let volume = Volume::new(parent.path().join("no-root"), "Gone", true, false);

    let mut state = VolumeTestState::new();
    let err = engine
        .run_test(&volume, &mut state, &mut NullSink)
        .unwrap_err();

    assert!(matches!(err, SpeedTestError::Io { op: "open", .. }));
    assert_eq!(state.status, TestStatus::Error);
    assert_eq!(state.error_message.as_deref(), Some(err.to_string().as_str()));
    assert_eq!(state.write_speed_mbps, 0.0);
    assert_eq!(state.read_speed_mbps, 0.0);
    assert_eq!(file_count(parent.path()), 0);
}

#[test]
fn test_fallback_equal_to_root_is_unavailable() {
    let parent = tempdir().unwrap();
    let root = parent.path().join("no-root");
    let engine = BenchmarkEngine::new(config(&root)).unwrap();
    let volume = Volume::new(&root, "Gone", true, false);

    let err = engine.execute(&volume, &mut |_| {}).unwrap_err();
    assert!(matches!(err, SpeedTestError::VolumeUnavailable { .. }));
}

#[test]
fn test_write_failure_cleans_up() {
    let volume_dir = tempdir().unwrap();
    let removals = Arc::new(AtomicUsize::new(0));
    let disk_io = Arc::new(FaultyDiskIO {
        writes_before_failure: Some(3),
        removals: Arc::clone(&removals),
        ..Default::default()
    });
    let engine = BenchmarkEngine::with_disk_io(config(volume_dir.path()), disk_io).unwrap();
    let volume = Volume::new(volume_dir.path(), "Scratch", true, true);

    let mut state = VolumeTestState::new();
    let err = engine
        .run_test(&volume, &mut state, &mut NullSink)
        .unwrap_err();

    assert!(matches!(err, SpeedTestError::Io { op: "write", .. }));
    assert_eq!(state.status, TestStatus::Error);
    assert!(state.error_message.unwrap().contains("injected write failure"));
    assert!((state.progress - 3.0 / 32.0).abs() < 1e-12);
    assert_eq!(state.write_speed_mbps, 0.0);
    assert!(removals.load(Ordering::SeqCst) >= 1);
    assert_eq!(file_count(volume_dir.path()), 0);
}

#[test]
fn test_short_read_measures_bytes_actually_read() {
    let volume_dir = tempdir().unwrap();
    let disk_io = Arc::new(FaultyDiskIO {
        read_limit: Some(CHUNK + CHUNK / 2),
        ..Default::default()
    });
    let engine = BenchmarkEngine::with_disk_io(config(volume_dir.path()), disk_io).unwrap();
    let volume = Volume::new(volume_dir.path(), "Scratch", true, true);

    let mut state = VolumeTestState::new();
    let summary = engine
        .run_test(&volume, &mut state, &mut NullSink)
        .unwrap()
        .unwrap();

    assert_eq!(summary.bytes_written, TOTAL);
    assert_eq!(summary.bytes_read, CHUNK + CHUNK / 2);
    assert_eq!(state.status, TestStatus::Success);
    assert_eq!(state.progress, 1.0);
    assert!(state.read_speed_mbps > 0.0);
    assert_eq!(file_count(volume_dir.path()), 0);
}

#[test]
fn test_empty_read_is_an_error() {
    let volume_dir = tempdir().unwrap();
    let disk_io = Arc::new(FaultyDiskIO {
        read_limit: Some(0),
        ..Default::default()
    });
    let engine = BenchmarkEngine::with_disk_io(config(volume_dir.path()), disk_io).unwrap();
    let volume = Volume::new(volume_dir.path(), "Scratch", true, true);

    let mut state = VolumeTestState::new();
    let err = engine
        .run_test(&volume, &mut state, &mut NullSink)
        .unwrap_err();

    assert!(matches!(err, SpeedTestError::EmptyRead { .. }));
    assert_eq!(state.status, TestStatus::Error);
    // The write phase completed before the failure.
    assert!(state.write_speed_mbps > 0.0);
    assert_eq!(file_count(volume_dir.path()), 0);
}

#[test]
fn test_rerun_after_error_resets_state() {
    let volume_dir = tempdir().unwrap();
    let missing = volume_dir.path().join("later");
    let engine = BenchmarkEngine::new(config(&volume_dir.path().join("nope"))).unwrap();
    let volume = Volume::new(&missing, "Later", true, false);

    let mut state = VolumeTestState::new();
    assert!(engine.run_test(&volume, &mut state, &mut NullSink).is_err());
    assert_eq!(state.status, TestStatus::Error);

    std::fs::create_dir(&missing).unwrap();
    let (mut sink, mut rx) = ChannelSink::new();
    engine
        .run_test(&volume, &mut state, &mut sink)
        .unwrap()
        .unwrap();

    let first = rx.try_recv().unwrap();
    assert_eq!(first.state.status, TestStatus::Testing);
    assert_eq!(first.state.progress, 0.0);
    assert!(first.state.error_message.is_none());

    assert_eq!(state.status, TestStatus::Success);
    assert!(state.error_message.is_none());
}
