//! Test coordinator
//!
//! Owns the volume catalog and dispatches benchmark runs onto Tokio's
//! blocking pool, one per volume. Runs report back over a channel and the
//! coordinator applies their events to the catalog on the caller's task,
//! so state is only ever mutated in one place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bench::engine::BenchmarkEngine;
use crate::bench::sink::ProgressSink;
use crate::catalog::{CatalogEntry, VolumeCatalog, VolumeSource};
use crate::models::{RunEvent, VolumeTestState};
use crate::{Result, SpeedTestError};

/// How often `next_update` checks for workers that died silently
const REAP_INTERVAL: Duration = Duration::from_millis(250);

/// Event tagged with the run that produced it
#[derive(Debug)]
struct WorkerMessage {
    volume: PathBuf,
    run_id: u64,
    event: RunEvent,
}

struct ActiveRun {
    run_id: u64,
    handle: JoinHandle<()>,
}

pub struct TestCoordinator {
    catalog: VolumeCatalog,
    engine: Arc<BenchmarkEngine>,
    sink: Box<dyn ProgressSink>,
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<WorkerMessage>,
    events_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    active: HashMap<PathBuf, ActiveRun>,
    /// Runs whose volume left the catalog mid-run. Their events are
    /// dropped, but the path stays blocked until the worker exits.
    draining: HashMap<PathBuf, JoinHandle<()>>,
    next_run_id: u64,
}

impl TestCoordinator {
    /// Must be called from within a Tokio runtime. The catalog starts
    /// empty until [`refresh_volumes`](Self::refresh_volumes) is called.
    pub fn new(
        engine: BenchmarkEngine,
        source: impl VolumeSource + 'static,
        sink: impl ProgressSink + 'static,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SpeedTestError::Worker(format!("no Tokio runtime available: {}", e)))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            catalog: VolumeCatalog::new(source),
            engine: Arc::new(engine),
            sink: Box::new(sink),
            runtime,
            events_tx,
            events_rx,
            active: HashMap::new(),
            draining: HashMap::new(),
            next_run_id: 0,
        })
    }

    pub fn engine(&self) -> &BenchmarkEngine {
        &self.engine
    }

    /// Re-enumerate volumes, keeping the state of any that remain.
    ///
    /// Runs on volumes that disappeared keep going in the background but
    /// their events are discarded. The volume cannot be tested again until
    /// such a run has exited, even if it is remounted.
    pub fn refresh_volumes(&mut self) -> &[CatalogEntry] {
        self.catalog.refresh();
        self.prune_draining();

        let removed: Vec<PathBuf> = self
            .active
            .keys()
            .filter(|path| !self.catalog.contains(path))
            .cloned()
            .collect();
        for path in removed {
            if let Some(run) = self.active.remove(&path) {
                warn!(volume = %path.display(), run_id = run.run_id, "volume removed during a run, discarding its results");
                self.draining.insert(path, run.handle);
            }
        }

        self.catalog.entries()
    }

    pub fn volumes(&self) -> &[CatalogEntry] {
        self.catalog.entries()
    }

    pub fn state(&self, path: &Path) -> Option<&VolumeTestState> {
        self.catalog.get(path).map(|e| &e.state)
    }

    pub fn is_testing(&self, path: &Path) -> bool {
        self.state(path).is_some_and(|s| s.is_testing())
    }

    /// Number of runs whose events are still being applied
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    /// Number of orphaned runs (volume removed mid-run) not yet exited
    pub fn draining_runs(&self) -> usize {
        self.draining.len()
    }

    /// Start a run on `path` in the background.
    ///
    /// Returns `Ok(false)` if the volume is already being tested, or if a
    /// run from before it was last removed is still winding down.
    pub fn run_test(&mut self, path: &Path) -> Result<bool> {
        self.prune_draining();
        let draining = self.draining.contains_key(path);

        let entry = self
            .catalog
            .get_mut(path)
            .ok_or_else(|| SpeedTestError::VolumeNotFound(path.to_path_buf()))?;
        if entry.state.is_testing() {
            debug!(volume = %path.display(), "run already in progress");
            return Ok(false);
        }
        if draining {
            debug!(volume = %path.display(), "previous run still finishing on this volume");
            return Ok(false);
        }

        entry.state.begin_run();
        self.sink.on_update(&entry.volume, &entry.state);
        let volume = entry.volume.clone();

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let engine = Arc::clone(&self.engine);
        let tx = self.events_tx.clone();
        let handle = self.runtime.spawn_blocking(move || {
            let path = volume.path.clone();
            let mut report = |event: RunEvent| {
                // The coordinator may be gone; the run still cleans up after itself.
                let _ = tx.send(WorkerMessage {
                    volume: path.clone(),
                    run_id,
                    event,
                });
            };
            let _ = engine.execute(&volume, &mut report);
        });

        info!(volume = %path.display(), run_id, "dispatched speed test");
        self.active.insert(path.to_path_buf(), ActiveRun { run_id, handle });
        Ok(true)
    }

    /// Start a run on every volume that is not already testing.
    /// Returns how many runs were started.
    pub fn run_all(&mut self) -> usize {
        let idle: Vec<PathBuf> = self
            .catalog
            .entries()
            .iter()
            .filter(|e| !e.state.is_testing())
            .map(|e| e.volume.path.clone())
            .collect();

        idle.iter()
            .filter(|path| matches!(self.run_test(path), Ok(true)))
            .count()
    }

    /// Apply every event that has already arrived without waiting.
    /// Returns the number of events applied.
    pub fn process_pending(&mut self) -> usize {
        // Collected before draining so a worker's final events are seen
        // before it is declared dead.
        let finished: Vec<(PathBuf, u64)> = self
            .active
            .iter()
            .filter(|(_, run)| run.handle.is_finished())
            .map(|(path, run)| (path.clone(), run.run_id))
            .collect();

        let mut applied = 0;
        while let Ok(message) = self.events_rx.try_recv() {
            if self.apply_message(message).is_some() {
                applied += 1;
            }
        }

        for (path, run_id) in finished {
            self.fail_abandoned(&path, run_id);
        }
        self.prune_draining();
        applied
    }

    /// Wait for the next event and apply it, returning the volume it
    /// changed. Returns `None` once no runs are active, every orphaned run
    /// has exited and nothing is left to apply.
    pub async fn next_update(&mut self) -> Option<PathBuf> {
        loop {
            if let Ok(message) = self.events_rx.try_recv() {
                if let Some(path) = self.apply_message(message) {
                    return Some(path);
                }
                continue;
            }
            if self.active.is_empty() {
                self.prune_draining();
                if self.draining.is_empty() {
                    return None;
                }
            }

            match tokio::time::timeout(REAP_INTERVAL, self.events_rx.recv()).await {
                Ok(Some(message)) => {
                    if let Some(path) = self.apply_message(message) {
                        return Some(path);
                    }
                }
                Ok(None) => return None,
                Err(_) => {
                    self.process_pending();
                }
            }
        }
    }

    /// Apply events until every run has finished
    pub async fn wait_for_idle(&mut self) {
        while self.next_update().await.is_some() {}
    }

    fn prune_draining(&mut self) {
        self.draining.retain(|path, handle| {
            let running = !handle.is_finished();
            if !running {
                debug!(volume = %path.display(), "orphaned run exited");
            }
            running
        });
    }

    fn apply_message(&mut self, message: WorkerMessage) -> Option<PathBuf> {
        let current = self.active.get(&message.volume).map(|run| run.run_id);
        if current != Some(message.run_id) {
            debug!(
                volume = %message.volume.display(),
                run_id = message.run_id,
                "dropping event from stale run"
            );
            return None;
        }

        let entry = self.catalog.get_mut(&message.volume)?;
        entry.state.apply(&message.event);
        self.sink.on_update(&entry.volume, &entry.state);

        if message.event.is_terminal() {
            self.active.remove(&message.volume);
        }
        Some(message.volume)
    }

    fn fail_abandoned(&mut self, path: &Path, run_id: u64) {
        if self.active.get(path).map(|run| run.run_id) != Some(run_id) {
            return;
        }
        self.active.remove(path);

        let Some(entry) = self.catalog.get_mut(path) else {
            return;
        };
        if entry.state.is_testing() {
            let error = SpeedTestError::Worker("run ended without reporting a result".to_string());
            warn!(volume = %path.display(), error = %error, "benchmark worker stopped");
            entry.state.apply(&RunEvent::Failed(error.to_string()));
            self.sink.on_update(&entry.volume, &entry.state);
        }
    }
}
