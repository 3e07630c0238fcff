use std::path::PathBuf;

use ssdspeed::catalog::{SystemVolumes, VolumeCatalog};
use ssdspeed::cli::{self, IndicatifSink, Selection};
use ssdspeed::config::SpeedTestConfig;
use ssdspeed::error::user_friendly_message;
use ssdspeed::{BenchmarkEngine, TestCoordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loaded = SpeedTestConfig::load();
    let level = loaded
        .as_ref()
        .map(|c| c.tracing_level())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load configuration, using defaults");
        SpeedTestConfig::default()
    });

    let mut catalog = VolumeCatalog::new(SystemVolumes::new());
    let entries = catalog.refresh();
    if entries.is_empty() {
        println!("No testable volumes found.");
        return Ok(());
    }
    cli::print_volumes(entries);

    let input = cli::prompt("Enter volume number, or 'a' for all: ")?;
    let selected: Vec<PathBuf> = match cli::parse_selection(&input, entries.len()) {
        Some(Selection::All) => entries.iter().map(|e| e.volume.path.clone()).collect(),
        Some(Selection::One(i)) => vec![entries[i].volume.path.clone()],
        None => {
            println!("Invalid selection: {}", input);
            return Ok(());
        }
    };

    let mut config = config;
    let input = cli::prompt(&format!(
        "Press Enter to test with {} in {} chunks, or 'c' to change: ",
        ssdspeed::util::format_bytes(config.total_size),
        ssdspeed::util::format_bytes(config.chunk_size)
    ))?;
    if input.eq_ignore_ascii_case("c") {
        config = cli::ask_config(config)?;
    }

    let engine = match BenchmarkEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}", user_friendly_message(&e));
            std::process::exit(1);
        }
    };

    let mut coordinator = TestCoordinator::new(engine, SystemVolumes::new(), IndicatifSink::new())?;
    coordinator.refresh_volumes();
    for path in &selected {
        if let Err(e) = coordinator.run_test(path) {
            eprintln!("{}", user_friendly_message(&e));
        }
    }
    coordinator.wait_for_idle().await;

    cli::print_results(
        coordinator
            .volumes()
            .iter()
            .filter(|e| selected.contains(&e.volume.path)),
    );
    Ok(())
}
