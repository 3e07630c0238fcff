//! Benchmark module
//!
//! Contains the sequential write/read engine, the sinks that receive its
//! progress, and the coordinator that runs it against catalog volumes.

pub mod coordinator;
pub mod engine;
pub mod sink;

pub use coordinator::TestCoordinator;
pub use engine::{BenchmarkEngine, PhaseTiming, RunSummary};
pub use sink::{ChannelSink, NullSink, ProgressSink, VolumeUpdate};
