//! Storage throughput estimation for preload admission control.
//!
//! The preloader must answer "how many bytes can I read inside this
//! frame's slack" before issuing a read it cannot abort. The answer comes
//! from a small sorted table of `(duration, bytes)` samples, built once by
//! benchmarking doubling read sizes against a representative file, or
//! restored from a persisted history file.
//!
//! The estimate is admission control only — never correctness. A wrong
//! table wastes slack or leaves it unused; it cannot corrupt a preload.
//!
//! # History File
//!
//! One generation byte, one sample-count byte, then each sample as
//! little-endian `duration_micros: u64` + `bytes: u64`. The generation is
//! a use counter: every trusted load rewrites the file with generation+1,
//! and a stored generation at or past [`HISTORY_EXPIRED_GENERATION`]
//! forces a fresh benchmark (storage performance drifts with media wear).

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Smallest benchmark probe in bytes.
pub const MIN_PROBE_SIZE: u64 = 512;

/// Default cap for a single probe read, and thus for any preload chunk.
pub const DEFAULT_MAX_PROBE_SIZE: u64 = 64 * 1024;

/// Stored generation at or past this value forces a re-benchmark.
pub const HISTORY_EXPIRED_GENERATION: u8 = 8;

/// One measured probe: `bytes` were reliably read within `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    pub duration: Duration,
    pub bytes: u64,
}

// =============================================================================
// Throughput Table
// =============================================================================

/// Sorted duration-to-bytes table for the backing storage.
///
/// Immutable once built; process-wide reuse is the embedder's choice.
#[derive(Debug, Clone)]
pub struct ThroughputTable {
    samples: Vec<ThroughputSample>,
}

impl ThroughputTable {
    /// Build a table from raw samples.
    ///
    /// Samples are sorted by duration; among equal durations only the
    /// largest byte count is kept, so lookups stay monotonic.
    pub fn from_samples(samples: impl IntoIterator<Item = (Duration, u64)>) -> Self {
        let mut samples: Vec<ThroughputSample> = samples
            .into_iter()
            .map(|(duration, bytes)| ThroughputSample { duration, bytes })
            .collect();
        samples.sort_by_key(|s| (s.duration, s.bytes));
        samples.dedup_by(|next, prev| {
            if next.duration == prev.duration {
                prev.bytes = prev.bytes.max(next.bytes);
                true
            } else {
                false
            }
        });
        // Timing noise can make a larger probe finish faster than a smaller
        // one; a longer wait must never report fewer achievable bytes.
        let mut floor = 0;
        for sample in &mut samples {
            floor = floor.max(sample.bytes);
            sample.bytes = floor;
        }
        Self { samples }
    }

    /// Benchmark the backing storage against a representative file.
    ///
    /// Probe sizes double from [`MIN_PROBE_SIZE`] to `max_probe`, each
    /// timed as one read from the start of the file. A probe that
    /// under-delivers (end of file) stops measuring; the remaining entries
    /// are extrapolated linearly from the last valid sample.
    pub fn benchmark(probe_file: &Path, max_probe: u64) -> std::io::Result<Self> {
        let max_probe = max_probe.max(MIN_PROBE_SIZE);
        let mut samples = Vec::new();
        let mut last_valid: Option<ThroughputSample> = None;

        let mut size = MIN_PROBE_SIZE;
        loop {
            let mut file = File::open(probe_file)?;
            let mut buf = vec![0u8; size as usize];

            let start = Instant::now();
            let read = read_up_to(&mut file, &mut buf)?;
            let duration = start.elapsed();

            if (read as u64) < size {
                // End of file: extrapolate the rest of the table from the
                // last sample that delivered fully.
                let base = last_valid.unwrap_or(ThroughputSample {
                    duration,
                    bytes: read.max(1) as u64,
                });
                while size <= max_probe {
                    let scaled = base.duration.as_nanos() as u64 * size / base.bytes.max(1);
                    samples.push((Duration::from_nanos(scaled), size));
                    size = size.saturating_mul(2);
                }
                break;
            }

            let sample = ThroughputSample {
                duration,
                bytes: size,
            };
            samples.push((sample.duration, sample.bytes));
            last_valid = Some(sample);

            if size >= max_probe {
                break;
            }
            size = size.saturating_mul(2).min(max_probe);
        }

        debug!(probes = samples.len(), "storage benchmark complete");
        Ok(Self::from_samples(samples))
    }

    /// Largest byte count achievable within `budget`.
    ///
    /// Binary search for the largest recorded duration at or below the
    /// budget; `0` when even the fastest sample does not fit, in which
    /// case the caller must terminate rather than read with no time bound.
    pub fn bytes_within(&self, budget: Duration) -> u64 {
        let idx = self.samples.partition_point(|s| s.duration <= budget);
        if idx == 0 {
            0
        } else {
            self.samples[idx - 1].bytes
        }
    }

    /// The sorted samples.
    pub fn samples(&self) -> &[ThroughputSample] {
        &self.samples
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load a table from a history file.
    ///
    /// Returns `None` when the stored generation is expired or the file is
    /// malformed — the caller should benchmark afresh.
    pub fn load(path: &Path) -> std::io::Result<Option<(Self, u8)>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        if data.len() < 2 {
            return Ok(None);
        }
        let generation = data[0];
        if generation >= HISTORY_EXPIRED_GENERATION {
            debug!(generation, "throughput history expired");
            return Ok(None);
        }

        let count = data[1] as usize;
        if data.len() != 2 + count * 16 {
            return Ok(None);
        }

        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            let base = 2 + i * 16;
            let micros = u64::from_le_bytes(data[base..base + 8].try_into().unwrap());
            let bytes = u64::from_le_bytes(data[base + 8..base + 16].try_into().unwrap());
            samples.push((Duration::from_micros(micros), bytes));
        }

        Ok(Some((Self::from_samples(samples), generation)))
    }

    /// Write the table with the given generation byte.
    pub fn store(&self, path: &Path, generation: u8) -> std::io::Result<()> {
        let mut out = Vec::with_capacity(2 + self.samples.len() * 16);
        out.push(generation);
        out.push(self.samples.len() as u8);
        for sample in &self.samples {
            out.extend_from_slice(&(sample.duration.as_micros() as u64).to_le_bytes());
            out.extend_from_slice(&sample.bytes.to_le_bytes());
        }
        File::create(path)?.write_all(&out)
    }

    /// Restore from history when fresh, otherwise benchmark and persist.
    ///
    /// A trusted load ages the file by rewriting it with generation + 1;
    /// a fresh benchmark resets it to generation 0.
    pub fn load_or_benchmark(
        probe_file: &Path,
        history: Option<&Path>,
        max_probe: u64,
    ) -> std::io::Result<Self> {
        if let Some(history_path) = history {
            match Self::load(history_path) {
                Ok(Some((table, generation))) => {
                    if let Err(e) = table.store(history_path, generation + 1) {
                        warn!(error = %e, "failed to age throughput history");
                    }
                    return Ok(table);
                }
                Ok(None) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "unreadable throughput history, re-benchmarking"),
            }
        }

        let table = Self::benchmark(probe_file, max_probe)?;
        if let Some(history_path) = history {
            if let Err(e) = table.store(history_path, 0) {
                warn!(error = %e, "failed to persist throughput history");
            }
        }
        Ok(table)
    }
}

/// Read until the buffer is full or the file ends.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// =============================================================================
// Tests
// =============================================================================
