//! Per-volume test lifecycle state
//!
//! A `VolumeTestState` is a plain record. Runs never touch it directly:
//! they emit [`RunEvent`]s which the owning context applies in order.

use serde::{Deserialize, Serialize};

/// Status of the most recent run on a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestStatus {
    /// Never tested
    #[default]
    Idle,
    /// A run is in flight; further run requests are ignored
    Testing,
    /// Last run finished and both speeds are valid
    Success,
    /// Last run failed; see `error_message`
    Error,
}

impl TestStatus {
    /// Caption shown by front-ends
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Idle => "Ready",
            TestStatus::Testing => "Testing...",
            TestStatus::Success => "Complete",
            TestStatus::Error => "Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TestStatus::Success | TestStatus::Error)
    }
}

/// Updates produced by a run, in the order they happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    /// Setup reset: speeds and progress back to zero, status Testing
    Started,
    /// Overall completion in [0, 1]
    Progress(f64),
    /// Measured write throughput (MB/s)
    WriteSpeed(f64),
    /// Measured read throughput (MB/s)
    ReadSpeed(f64),
    Succeeded,
    /// Human-readable failure description
    Failed(String),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Succeeded | RunEvent::Failed(_))
    }
}

/// Mutable record of one volume's test lifecycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeTestState {
    pub status: TestStatus,
    pub write_speed_mbps: f64,
    pub read_speed_mbps: f64,
    pub progress: f64,
    /// Present iff `status == Error`
    pub error_message: Option<String>,
}

impl VolumeTestState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_testing(&self) -> bool {
        self.status == TestStatus::Testing
    }

    /// Reset every measurement and enter `Testing`
    pub fn begin_run(&mut self) {
        self.status = TestStatus::Testing;
        self.write_speed_mbps = 0.0;
        self.read_speed_mbps = 0.0;
        self.progress = 0.0;
        self.error_message = None;
    }

    /// Apply one run event
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started => self.begin_run(),
            RunEvent::Progress(value) => {
                // Progress only moves forward within a run.
                let value = value.clamp(0.0, 1.0);
                if value > self.progress {
                    self.progress = value;
                }
            }
            RunEvent::WriteSpeed(mbps) => self.write_speed_mbps = mbps.max(0.0),
            RunEvent::ReadSpeed(mbps) => self.read_speed_mbps = mbps.max(0.0),
            RunEvent::Succeeded => {
                self.status = TestStatus::Success;
                self.progress = 1.0;
                self.error_message = None;
            }
            RunEvent::Failed(message) => {
                self.status = TestStatus::Error;
                self.error_message = Some(message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = VolumeTestState::new();
        assert_eq!(state.status, TestStatus::Idle);
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.write_speed_mbps, 0.0);
        assert_eq!(state.read_speed_mbps, 0.0);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_successful_lifecycle() {
        let mut state = VolumeTestState::new();
        state.apply(&RunEvent::Started);
        assert!(state.is_testing());

        state.apply(&RunEvent::Progress(0.25));
        state.apply(&RunEvent::Progress(0.5));
        state.apply(&RunEvent::WriteSpeed(512.0));
        state.apply(&RunEvent::Progress(0.9));
        state.apply(&RunEvent::ReadSpeed(1024.0));
        state.apply(&RunEvent::Succeeded);

        assert_eq!(state.status, TestStatus::Success);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.write_speed_mbps, 512.0);
        assert_eq!(state.read_speed_mbps, 1024.0);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut state = VolumeTestState::new();
        state.apply(&RunEvent::Started);
        state.apply(&RunEvent::Progress(0.6));
        state.apply(&RunEvent::Progress(0.4));
        assert_eq!(state.progress, 0.6);

        state.apply(&RunEvent::Progress(7.0));
        assert_eq!(state.progress, 1.0);
    }

    #[test]
    fn test_rerun_after_error_resets() {
        let mut state = VolumeTestState::new();
        state.apply(&RunEvent::Started);
        state.apply(&RunEvent::Progress(0.3));
        state.apply(&RunEvent::WriteSpeed(200.0));
        state.apply(&RunEvent::Failed("disk full".to_string()));
        assert_eq!(state.status, TestStatus::Error);
        assert_eq!(state.error_message.as_deref(), Some("disk full"));

        state.begin_run();
        assert_eq!(state.status, TestStatus::Testing);
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.write_speed_mbps, 0.0);
        assert_eq!(state.read_speed_mbps, 0.0);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(TestStatus::Idle.label(), "Ready");
        assert_eq!(TestStatus::Testing.label(), "Testing...");
        assert!(TestStatus::Success.is_terminal());
        assert!(TestStatus::Error.is_terminal());
        assert!(!TestStatus::Testing.is_terminal());
    }
}
