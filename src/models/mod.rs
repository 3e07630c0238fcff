//! Data models module
//!
//! Volume descriptors and the per-volume test state record.

pub mod state;
pub mod volume;

pub use state::{RunEvent, TestStatus, VolumeTestState};
pub use volume::Volume;
