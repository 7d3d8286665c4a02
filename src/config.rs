//! Configuration for the cache and its companion CLI.
//!
//! The embedding renderer constructs a [`CacheConfig`] once and hands it
//! to [`crate::cache::CacheManager::new`]. Every knob has a default that
//! suits a small embedded target; the manifest paths and the memory limit
//! are the ones embedders usually set.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::throughput::DEFAULT_MAX_PROBE_SIZE;

// =============================================================================
// Default Values
// =============================================================================

/// Hard upper bound on pool capacity.
pub const MAX_CACHE_ENTRIES: u16 = 256;

/// Default pool capacity.
pub const DEFAULT_CAPACITY: u16 = 16;

/// Default retry budget per preload descriptor.
pub const DEFAULT_RETRY_BUDGET: u8 = 3;

/// Default upper bound on manifest file size; larger manifests are
/// rejected outright to protect the synchronous boot path.
pub const DEFAULT_MANIFEST_SIZE_LIMIT: u64 = 64 * 1024;

/// Suffix of cacheable source files, without the dot.
pub const SOURCE_SUFFIX: &str = "pxi";

// =============================================================================
// Cache Configuration
// =============================================================================

/// Background preload settings.
#[derive(Debug, Clone)]
pub struct PreloadSettings {
    /// Master switch; when off, both manifests are ignored.
    pub enabled: bool,

    /// Manifest of resources loaded synchronously before the UI starts.
    pub boot_manifest: Option<PathBuf>,

    /// Manifest of resources loaded incrementally in frame slack.
    pub idle_manifest: Option<PathBuf>,

    /// Manifests above this size are rejected, not parsed.
    pub manifest_size_limit: u64,

    /// Cap for one benchmark probe and thus for any preload chunk.
    pub max_chunk: u64,

    /// File the throughput benchmark reads; defaults to the first idle
    /// manifest entry when unset.
    pub probe_file: Option<PathBuf>,

    /// Persisted throughput history; benchmarked fresh when unset.
    pub history_file: Option<PathBuf>,

    /// Attempts granted to each idle descriptor before it is abandoned.
    pub retry_budget: u8,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            boot_manifest: None,
            idle_manifest: None,
            manifest_size_limit: DEFAULT_MANIFEST_SIZE_LIMIT,
            max_chunk: DEFAULT_MAX_PROBE_SIZE,
            probe_file: None,
            history_file: None,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

/// Top-level cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of slots in the pool; must be in `1..=MAX_CACHE_ENTRIES`.
    pub capacity: u16,

    /// Byte budget for pixel and staging buffers; `None` is unbounded.
    pub memory_limit: Option<usize>,

    /// Background preload settings.
    pub preload: PreloadSettings,
}

impl CacheConfig {
    pub fn new(capacity: u16) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Slots reserved for preload promotion: half the pool, so ad-hoc
    /// cache misses always keep slots of their own.
    pub fn preload_quota(&self) -> usize {
        self.capacity as usize / 2
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            memory_limit: None,
            preload: PreloadSettings::default(),
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// pix-cache - offline tooling for the decoded-image cache.
///
/// The cache itself is embedded in a renderer; this binary covers the two
/// operational chores around it: benchmarking storage throughput (and
/// seeding the persisted history file) and checking preload manifests.
#[derive(Parser, Debug)]
#[command(name = "pix-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Benchmark storage throughput against a representative file.
    Bench {
        /// File to read during the benchmark.
        #[arg(long, env = "PIXCACHE_PROBE_FILE")]
        probe_file: PathBuf,

        /// Write the resulting table to this history file.
        #[arg(long, env = "PIXCACHE_HISTORY_FILE")]
        history: Option<PathBuf>,

        /// Maximum single probe size in bytes.
        #[arg(long, default_value_t = DEFAULT_MAX_PROBE_SIZE)]
        max_chunk: u64,
    },

    /// Parse a preload manifest and print the resolved entries.
    Manifest {
        /// Manifest file to parse.
        path: PathBuf,

        /// Size limit applied before parsing.
        #[arg(long, default_value_t = DEFAULT_MANIFEST_SIZE_LIMIT)]
        size_limit: u64,
    },
}

/// Frame period matching a refresh rate, for embedders configuring the
/// frame coordinator from display metadata.
pub fn frame_period_for_fps(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / fps.max(1) as u64)
}
