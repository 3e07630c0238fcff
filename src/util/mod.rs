//! Utility functions module

pub mod units;

pub use units::{
    calculate_throughput_mbps, format_bytes, format_elapsed, format_speed, parse_bytes,
};
