//! Benchmark engine
//!
//! Runs one write-then-read pass against a volume: choose where the test
//! file goes, write it in fixed-size chunks with the page cache bypassed,
//! flush it, read it back, delete it, and report progress and speeds as
//! [`RunEvent`]s along the way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bench::sink::ProgressSink;
use crate::config::SpeedTestConfig;
use crate::io::buffer::AlignedBuffer;
use crate::io::disk::{create_disk_io, temp_file_name, CacheBypass, DiskIO, TempFile, UncachedFile};
use crate::models::{RunEvent, Volume, VolumeTestState};
use crate::util::units::calculate_throughput_mbps;
use crate::{Result, SpeedTestError};

/// Wall-clock bounds and monotonic duration of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl PhaseTiming {
    /// MB/s for `bytes` moved during this phase
    pub fn throughput_mbps(&self, bytes: u64) -> f64 {
        calculate_throughput_mbps(bytes, self.elapsed)
    }
}

struct Stopwatch {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Stopwatch {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    fn finish(self) -> PhaseTiming {
        PhaseTiming {
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.start.elapsed(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub volume: Volume,
    /// Where the (now deleted) test file lived
    pub file_path: PathBuf,
    /// The volume root refused the file and the fallback directory was used
    pub used_fallback: bool,
    pub cache_bypass: CacheBypass,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub write: PhaseTiming,
    pub read: PhaseTiming,
    pub write_speed_mbps: f64,
    pub read_speed_mbps: f64,
}

struct Measurements {
    write: PhaseTiming,
    read: PhaseTiming,
    bytes_read: u64,
}

struct Target {
    guard: TempFile,
    file: Box<dyn UncachedFile>,
    used_fallback: bool,
}

/// Sequential write/read benchmark for a single volume
pub struct BenchmarkEngine {
    config: SpeedTestConfig,
    disk_io: Arc<dyn DiskIO>,
}

impl BenchmarkEngine {
    /// Engine using the platform's uncached file I/O
    pub fn new(config: SpeedTestConfig) -> Result<Self> {
        Self::with_disk_io(config, create_disk_io())
    }

    /// Engine using a caller-supplied file I/O implementation
    pub fn with_disk_io(config: SpeedTestConfig, disk_io: Arc<dyn DiskIO>) -> Result<Self> {
        config.validate()?;
        usize::try_from(config.chunk_size).map_err(|_| {
            SpeedTestError::Config(format!(
                "Chunk size {} does not fit in memory on this platform",
                config.chunk_size
            ))
        })?;

        Ok(Self { config, disk_io })
    }

    pub fn config(&self) -> &SpeedTestConfig {
        &self.config
    }

    /// Run a benchmark and record it in `state`, forwarding every change
    /// to `sink`.
    ///
    /// Blocks until the run is over. Returns `Ok(None)` without touching
    /// anything if `state` is already `Testing`. On failure the error is
    /// also recorded in `state`.
    pub fn run_test(
        &self,
        volume: &Volume,
        state: &mut VolumeTestState,
        sink: &mut dyn ProgressSink,
    ) -> Result<Option<RunSummary>> {
        if state.is_testing() {
            debug!(volume = %volume.path.display(), "run already in progress, ignoring request");
            return Ok(None);
        }

        let mut apply = |event: RunEvent| {
            state.apply(&event);
            sink.on_update(volume, state);
        };
        self.execute(volume, &mut apply).map(Some)
    }

    /// Run every phase, emitting events through `report`.
    ///
    /// The first event is always [`RunEvent::Started`] and the last is
    /// either [`RunEvent::Succeeded`] or [`RunEvent::Failed`].
    pub fn execute(&self, volume: &Volume, report: &mut dyn FnMut(RunEvent)) -> Result<RunSummary> {
        report(RunEvent::Started);
        info!(volume = %volume.path.display(), "starting speed test");

        let outcome = self.run_phases(volume, report);
        match &outcome {
            Ok(summary) => {
                info!(
                    volume = %volume.path.display(),
                    write_mbps = summary.write_speed_mbps,
                    read_mbps = summary.read_speed_mbps,
                    "speed test complete"
                );
                report(RunEvent::Succeeded);
            }
            Err(e) => {
                warn!(volume = %volume.path.display(), error = %e, "speed test failed");
                report(RunEvent::Failed(e.to_string()));
            }
        }
        outcome
    }

    fn run_phases(&self, volume: &Volume, report: &mut dyn FnMut(RunEvent)) -> Result<RunSummary> {
        let mut buffer = AlignedBuffer::random(self.config.chunk_size as usize)?;
        let Target {
            mut guard,
            file,
            used_fallback,
        } = self.open_target(volume)?;
        let cache_bypass = file.cache_bypass();
        let file_path = guard.path().to_path_buf();
        info!(path = %file_path.display(), ?cache_bypass, "test file created");

        let measured = self.measure(file, &file_path, &mut buffer, report);
        guard.cleanup();
        let measured = measured?;

        Ok(RunSummary {
            volume: volume.clone(),
            file_path,
            used_fallback,
            cache_bypass,
            bytes_written: self.config.total_size,
            bytes_read: measured.bytes_read,
            write_speed_mbps: measured.write.throughput_mbps(self.config.total_size),
            read_speed_mbps: measured.read.throughput_mbps(measured.bytes_read),
            write: measured.write,
            read: measured.read,
        })
    }

    fn measure(
        &self,
        file: Box<dyn UncachedFile>,
        path: &Path,
        buffer: &mut AlignedBuffer,
        report: &mut dyn FnMut(RunEvent),
    ) -> Result<Measurements> {
        let write = self.write_phase(file, path, buffer, report)?;
        report(RunEvent::WriteSpeed(write.throughput_mbps(self.config.total_size)));

        let (read, bytes_read) = self.read_phase(path, buffer, report)?;
        report(RunEvent::ReadSpeed(read.throughput_mbps(bytes_read)));

        Ok(Measurements {
            write,
            read,
            bytes_read,
        })
    }

    /// Create the test file, on the volume root if possible and in the
    /// fallback directory otherwise
    fn open_target(&self, volume: &Volume) -> Result<Target> {
        let name = temp_file_name();

        // Guard only what the exclusive create actually produced.
        let root_path = volume.path.join(&name);
        let root_err = match self.disk_io.open_uncached_write(&root_path) {
            Ok(file) => {
                return Ok(Target {
                    guard: TempFile::new(root_path, Arc::clone(&self.disk_io)),
                    file,
                    used_fallback: false,
                })
            }
            Err(e) => e,
        };

        let fallback_dir = match self.config.resolved_fallback_dir() {
            Some(dir) if dir != volume.path => dir,
            _ => {
                return Err(SpeedTestError::VolumeUnavailable {
                    path: volume.path.clone(),
                    reason: format!("root is not writable ({}) and no fallback directory exists", root_err),
                })
            }
        };
        warn!(
            volume = %volume.path.display(),
            error = %root_err,
            fallback = %fallback_dir.display(),
            "volume root not writable, using fallback directory"
        );

        let path = fallback_dir.join(&name);
        let file = self
            .disk_io
            .open_uncached_write(&path)
            .map_err(|e| SpeedTestError::io("open", &path, e))?;

        Ok(Target {
            guard: TempFile::new(path, Arc::clone(&self.disk_io)),
            file,
            used_fallback: true,
        })
    }

    /// Write phase: progress runs from 0 to 0.5. The timer covers the
    /// chunk writes, the flush to stable storage and the close.
    fn write_phase(
        &self,
        mut file: Box<dyn UncachedFile>,
        path: &Path,
        buffer: &AlignedBuffer,
        report: &mut dyn FnMut(RunEvent),
    ) -> Result<PhaseTiming> {
        let iterations = self.config.iterations();
        let steps = (iterations * 2) as f64;
        debug!(iterations, chunk_size = self.config.chunk_size, "write phase");

        let stopwatch = Stopwatch::start();
        for written in 1..=iterations {
            file.write_chunk(buffer.as_slice())
                .map_err(|e| SpeedTestError::io("write", path, e))?;
            report(RunEvent::Progress(written as f64 / steps));
        }
        file.sync_all()
            .map_err(|e| SpeedTestError::io("flush", path, e))?;
        drop(file);

        Ok(stopwatch.finish())
    }

    /// Read phase: progress runs from 0.5 towards 1. A short read is the
    /// end of the data; reading nothing at all is an error.
    fn read_phase(
        &self,
        path: &Path,
        buffer: &mut AlignedBuffer,
        report: &mut dyn FnMut(RunEvent),
    ) -> Result<(PhaseTiming, u64)> {
        let total = self.config.total_size;
        let mut file = self
            .disk_io
            .open_uncached_read(path)
            .map_err(|e| SpeedTestError::io("open", path, e))?;
        debug!(path = %path.display(), "read phase");

        let stopwatch = Stopwatch::start();
        let mut bytes_read = 0u64;
        while bytes_read < total {
            let n = file
                .read_chunk(buffer.as_mut_slice())
                .map_err(|e| SpeedTestError::io("read", path, e))?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            report(RunEvent::Progress(0.5 + bytes_read as f64 / (2.0 * total as f64)));
            if n < buffer.len() {
                debug!(bytes_read, expected = total, "short read, treating as end of data");
                break;
            }
        }
        drop(file);
        let timing = stopwatch.finish();

        if bytes_read == 0 {
            return Err(SpeedTestError::EmptyRead {
                path: path.to_path_buf(),
            });
        }
        Ok((timing, bytes_read))
    }
}
