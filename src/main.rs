//! pix-cache - offline tooling for the decoded-image cache.
//!
//! The cache runs embedded in a renderer; this binary covers the chores
//! around it: benchmarking storage throughput (optionally seeding the
//! persisted history file) and checking preload manifests before they
//! ship.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pix_cache::{parse_manifest, Cli, Command, ThroughputTable};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let exit = match cli.command {
        Command::Bench {
            probe_file,
            history,
            max_chunk,
        } => run_bench(&probe_file, history.as_deref(), max_chunk),
        Command::Manifest { path, size_limit } => run_manifest(&path, size_limit),
    };
    std::process::exit(exit);
}

fn run_bench(probe_file: &std::path::Path, history: Option<&std::path::Path>, max_chunk: u64) -> i32 {
    info!("Benchmarking storage against {}", probe_file.display());

    let table = match ThroughputTable::benchmark(probe_file, max_chunk) {
        Ok(table) => table,
        Err(e) => {
            error!("Benchmark failed: {}", e);
            return 1;
        }
    };

    info!("Throughput table ({} samples):", table.samples().len());
    for sample in table.samples() {
        info!("  {:>10.3?}  ->  {:>8} bytes", sample.duration, sample.bytes);
    }

    if let Some(history_path) = history {
        match table.store(history_path, 0) {
            Ok(()) => info!("History written to {}", history_path.display()),
            Err(e) => {
                error!("Failed to write history: {}", e);
                return 1;
            }
        }
    }
    0
}

fn run_manifest(path: &std::path::Path, size_limit: u64) -> i32 {
    match parse_manifest(path, size_limit) {
        Ok(entries) => {
            info!("{}: {} entr(ies)", path.display(), entries.len());
            for entry in &entries {
                info!("  {}", entry.display());
            }
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}
