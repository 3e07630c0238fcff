//! Interactive terminal front-end
//!
//! Lists volumes, asks which to test and renders one progress bar per
//! volume while the coordinator runs them.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::bench::ProgressSink;
use crate::catalog::CatalogEntry;
use crate::config::SpeedTestConfig;
use crate::models::{TestStatus, Volume, VolumeTestState};
use crate::util::units::{format_bytes, format_speed, parse_bytes};

const BAR_LENGTH: u64 = 1000;

/// Renders state updates as `indicatif` progress bars
pub struct IndicatifSink {
    multi: MultiProgress,
    bars: HashMap<PathBuf, ProgressBar>,
}

impl IndicatifSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_for(&mut self, volume: &Volume) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(volume.path.clone()).or_insert_with(|| {
            let style = ProgressStyle::with_template(
                "{prefix:<24.bold} [{bar:30.cyan/blue}] {percent:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
            let bar = multi.add(ProgressBar::new(BAR_LENGTH));
            bar.set_style(style);
            bar.set_prefix(volume.display_name());
            bar
        })
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn on_update(&mut self, volume: &Volume, state: &VolumeTestState) {
        let bar = self.bar_for(volume);
        bar.set_position((state.progress * BAR_LENGTH as f64).round() as u64);

        match state.status {
            TestStatus::Idle => bar.set_message(state.status.label()),
            TestStatus::Testing => bar.set_message(speed_line(state)),
            TestStatus::Success => bar.finish_with_message(speed_line(state)),
            TestStatus::Error => bar.abandon_with_message(format!(
                "{}: {}",
                state.status.label(),
                state.error_message.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

fn speed_line(state: &VolumeTestState) -> String {
    format!(
        "write {}  read {}",
        format_speed(state.write_speed_mbps),
        format_speed(state.read_speed_mbps)
    )
}

/// Which volumes the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Zero-based index into the listed volumes
    One(usize),
}

/// Parse a 1-based volume number or `a` for all
pub fn parse_selection(input: &str, count: usize) -> Option<Selection> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("a") || input.eq_ignore_ascii_case("all") {
        return Some(Selection::All);
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(Selection::One(n - 1)),
        _ => None,
    }
}

/// Print a numbered volume list
pub fn print_volumes(entries: &[CatalogEntry]) {
    println!("Available volumes:");
    for (i, entry) in entries.iter().enumerate() {
        let volume = &entry.volume;
        println!(
            "{:>3}: {:<24} {:<9} {:<10} {}",
            i + 1,
            volume.display_name(),
            if volume.internal { "internal" } else { "external" },
            if volume.writable { "writable" } else { "read-only" },
            volume.path.display()
        );
    }
}

/// Print `label` and read one trimmed line from stdin
pub fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Prompt for size overrides. Empty or unparseable answers keep the
/// current value.
pub fn ask_config(mut config: SpeedTestConfig) -> io::Result<SpeedTestConfig> {
    let input = prompt(&format!(
        "Total size (default {}): ",
        format_bytes(config.total_size)
    ))?;
    if !input.is_empty() {
        match parse_bytes(&input) {
            Ok(size) => config.total_size = size,
            Err(e) => println!("{}, keeping {}", e, format_bytes(config.total_size)),
        }
    }

    let input = prompt(&format!(
        "Chunk size (default {}): ",
        format_bytes(config.chunk_size)
    ))?;
    if !input.is_empty() {
        match parse_bytes(&input) {
            Ok(size) => config.chunk_size = size,
            Err(e) => println!("{}, keeping {}", e, format_bytes(config.chunk_size)),
        }
    }

    Ok(config)
}

/// One line per tested volume with its final speeds or error
pub fn print_results<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) {
    println!();
    for entry in entries {
        let state = &entry.state;
        match state.status {
            TestStatus::Success => println!(
                "{:<24} write {:>12}  read {:>12}",
                entry.volume.display_name(),
                format_speed(state.write_speed_mbps),
                format_speed(state.read_speed_mbps)
            ),
            TestStatus::Error => println!(
                "{:<24} error: {}",
                entry.volume.display_name(),
                state.error_message.as_deref().unwrap_or("unknown error")
            ),
            status => println!("{:<24} {}", entry.volume.display_name(), status.label()),
        }
    }
}
