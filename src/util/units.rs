//! Size and speed units
//!
//! Speeds are reported in MB/s where 1 MB = 1024 × 1024 bytes, for both
//! the write and the read figure.

use std::time::Duration;

/// Bytes per reported megabyte
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

const BINARY_UNITS: &[(&str, u64)] = &[
    ("TiB", 1 << 40),
    ("GiB", 1 << 30),
    ("MiB", 1 << 20),
    ("KiB", 1 << 10),
];

/// Throughput in MB/s for `bytes` moved in `elapsed`; zero when no time passed
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use ssdspeed::util::units::calculate_throughput_mbps;
///
/// let mbps = calculate_throughput_mbps(2 * 1024 * 1024 * 1024, Duration::from_secs(2));
/// assert!((mbps - 1024.0).abs() < 1e-9);
/// ```
pub fn calculate_throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / BYTES_PER_MB / secs
}

/// Render a size with the largest binary unit that keeps it ≥ 1
///
/// # Examples
/// ```
/// use ssdspeed::util::units::format_bytes;
///
/// assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GiB");
/// assert_eq!(format_bytes(512), "512 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    BINARY_UNITS
        .iter()
        .find(|(_, factor)| bytes >= *factor)
        .map(|(unit, factor)| format!("{:.1} {}", bytes as f64 / *factor as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}

/// Parse sizes such as `"64 MiB"`, `"2GiB"`, `"512k"` or `"4096"`.
///
/// Suffixes are binary (`K`/`KiB`/`KB` all mean 1024). Fractions are
/// accepted as long as the result is a whole number of bytes.
pub fn parse_bytes(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number = number.trim();

    let value: f64 = number
        .parse()
        .map_err(|_| format!("Invalid size: {}", input))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Invalid size: {}", input));
    }

    let factor: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(format!("Unknown unit: {}", other)),
    };

    let bytes = value * factor as f64;
    if bytes.fract() != 0.0 || bytes > u64::MAX as f64 {
        return Err(format!("Size is not a whole number of bytes: {}", input));
    }
    Ok(bytes as u64)
}

/// `"1234.5 MB/s"`
pub fn format_speed(mbps: f64) -> String {
    format!("{:.1} MB/s", mbps)
}

/// Short elapsed time, e.g. `"850ms"` or `"12.40s"`
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_throughput() {
        // 2 GiB written in exactly two seconds.
        let mbps = calculate_throughput_mbps(2_147_483_648, Duration::from_millis(2000));
        assert!((mbps - 1024.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        assert_eq!(calculate_throughput_mbps(4096, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.0 MiB");
        assert_eq!(format_bytes(1 << 40), "1.0 TiB");
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("4096").unwrap(), 4096);
        assert_eq!(parse_bytes("64 MiB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_bytes("2GiB").unwrap(), 2_147_483_648);
        assert_eq!(parse_bytes("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_bytes("1.5 MB").unwrap(), 1_572_864);

        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("lots").is_err());
        assert!(parse_bytes("-1 MiB").is_err());
        assert!(parse_bytes("3 XB").is_err());
        assert!(parse_bytes("0.3 B").is_err());
    }

    #[test]
    fn test_format_speed_and_elapsed() {
        assert_eq!(format_speed(1024.0), "1024.0 MB/s");
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
        assert_eq!(format_elapsed(Duration::from_millis(12_400)), "12.40s");
    }
}
