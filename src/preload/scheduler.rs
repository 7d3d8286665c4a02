//! The preload scheduler: boot pass, budgeted steps, idle loop.
//!
//! Boot-listed resources are decoded synchronously before the UI starts.
//! Idle-listed resources are loaded by a background thread that spends
//! only the slack each frame grants it: one bounded lock acquisition, one
//! chunked read sized by the throughput table, then yield. Cancellation
//! granularity is "after the current chunk, before the next" — a read,
//! once issued, is never aborted mid-flight.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, PoolState, SlotBinding};
use crate::decode;
use crate::error::CacheError;
use crate::frame::FrameCoordinator;
use crate::source::{DrawStyle, ImageSource};
use crate::throughput::ThroughputTable;

use super::descriptor::{PreloadDescriptor, PreloadPhase};
use super::manifest::parse_manifest;
use super::PreloadState;

/// Result of one budgeted preload step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The descriptor is fully loaded and promoted (possibly before this
    /// call).
    Ended,

    /// The step gave up for this cycle: budget spent, no chunk fits, the
    /// descriptor is unassigned or its retries are exhausted.
    Terminated,

    /// A staging or promotion allocation did not fit the memory budget;
    /// the idle loop responds by pruning the rest of the list.
    NoMemory,
}

/// Read-only snapshot of one descriptor, for embedders and tests.
#[derive(Debug, Clone)]
pub struct PreloadProgress {
    pub path: std::path::PathBuf,
    pub phase: PreloadPhase,
    pub loaded: usize,
    pub total: Option<usize>,
    pub retries_left: u8,
    pub slot: Option<usize>,
}

impl CacheManager {
    // =========================================================================
    // Boot pass
    // =========================================================================

    /// Load everything preloading needs before the UI starts.
    ///
    /// Decodes each boot-manifest entry synchronously into a `persistent`
    /// slot, parses the idle manifest into descriptors, runs the one-time
    /// capacity evaluation that assigns each descriptor a slot up to the
    /// preload quota, and readies the throughput table (restored from
    /// history or benchmarked).
    pub fn preload_before_launch(&self) -> Result<(), CacheError> {
        let settings = self.config.preload.clone();
        if !settings.enabled {
            return Ok(());
        }

        if let Some(boot_path) = &settings.boot_manifest {
            let entries = parse_manifest(boot_path, settings.manifest_size_limit)?;
            self.load_boot_list(entries);
        }

        let mut idle_entries = Vec::new();
        if let Some(idle_path) = &settings.idle_manifest {
            idle_entries = parse_manifest(idle_path, settings.manifest_size_limit)?;
        }

        // The benchmark needs a representative file; the first idle entry
        // is as representative as it gets when none is configured.
        let probe = settings
            .probe_file
            .clone()
            .or_else(|| idle_entries.first().cloned());

        {
            let mut pool = self.pool.lock();
            let mut state = self.preload.lock();
            self.evaluate_capacity(&mut pool, &mut state, idle_entries, settings.retry_budget);
        }

        if let Some(probe) = probe {
            match ThroughputTable::load_or_benchmark(
                &probe,
                settings.history_file.as_deref(),
                settings.max_chunk,
            ) {
                Ok(table) => self.preload.lock().table = Some(table),
                Err(e) => warn!(error = %e, "throughput benchmark failed; idle preload will stall"),
            }
        }

        Ok(())
    }

    /// Decode the boot list synchronously into persistent slots.
    fn load_boot_list(&self, entries: Vec<std::path::PathBuf>) {
        let quota = self.config.preload_quota();
        let mut pool = self.pool.lock();

        for (index, path) in entries.iter().enumerate() {
            if index >= quota {
                warn!(
                    dropped = entries.len() - quota,
                    "boot manifest exceeds preload quota"
                );
                break;
            }
            let source = ImageSource::Path(path.clone());
            match self.open_locked(&mut pool, &source, DrawStyle::default()) {
                Ok(_) => {
                    if let Some(slot) = pool.slots.iter_mut().find(|s| s.holds(&source)) {
                        if let Some(binding) = slot.binding_mut() {
                            binding.persistent = true;
                        }
                    }
                    debug!(path = %path.display(), "boot resource loaded");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "boot resource failed to load")
                }
            }
        }
    }

    /// One-time capacity evaluation: reserve a slot per idle descriptor,
    /// up to the preload quota. Excess entries are dropped.
    fn evaluate_capacity(
        &self,
        pool: &mut PoolState,
        state: &mut PreloadState,
        entries: Vec<std::path::PathBuf>,
        retry_budget: u8,
    ) {
        let quota = self.config.preload_quota();
        let reserved = pool
            .slots
            .iter()
            .filter(|s| {
                s.binding()
                    .is_some_and(|b| b.persistent || b.preload_pending)
            })
            .count();
        let available = quota.saturating_sub(reserved);

        if entries.len() > available {
            warn!(
                dropped = entries.len() - available,
                quota, "idle manifest exceeds preload quota"
            );
        }

        for path in entries.into_iter().take(available) {
            let source = ImageSource::Path(path.clone());
            let duplicate = pool.slots.iter().any(|s| s.holds(&source))
                || state.descriptors.iter().any(|d| d.path == path);
            if duplicate {
                continue;
            }

            let Some(slot_idx) = pool.slots.iter().position(|s| s.is_empty()) else {
                warn!("no free slot for idle descriptor; dropping remainder");
                break;
            };

            pool.slots[slot_idx].bind(SlotBinding {
                source,
                header: None,
                style: DrawStyle::default(),
                pixels: None,
                session: None,
                life: 0,
                persistent: false,
                preload_pending: true,
                decode_cost: Duration::ZERO,
            });

            let mut descriptor = PreloadDescriptor::new(path, retry_budget);
            descriptor.slot = Some(slot_idx);
            state.descriptors.push(descriptor);
        }

        debug!(queued = state.descriptors.len(), "idle preload list ready");
    }

    // =========================================================================
    // Budgeted step
    // =========================================================================

    /// Run one budgeted preload step against descriptor `index`.
    ///
    /// Acquires both manager locks unconditionally; the background loop
    /// uses its own bounded-wait path instead.
    pub fn preload_step(&self, index: usize, budget: Duration) -> StepOutcome {
        let mut pool = self.pool.lock();
        let mut state = self.preload.lock();
        self.preload_step_locked(&mut pool, &mut state, index, budget)
    }

    pub(crate) fn preload_step_locked(
        &self,
        pool: &mut PoolState,
        state: &mut PreloadState,
        index: usize,
        budget: Duration,
    ) -> StepOutcome {
        let PreloadState { descriptors, table } = state;
        let Some(descriptor) = descriptors.get_mut(index) else {
            return StepOutcome::Terminated;
        };

        if descriptor.phase == PreloadPhase::Preloaded {
            return StepOutcome::Ended;
        }
        if budget.is_zero()
            || descriptor.slot.is_none()
            || descriptor.retries == 0
            || descriptor.phase == PreloadPhase::Failed
        {
            return StepOutcome::Terminated;
        }

        let start = Instant::now();

        // First touch: open the stream, learn the header and total size.
        if descriptor.session.is_none() {
            let source = ImageSource::Path(descriptor.path.clone());
            match decode::open(&source, DrawStyle::default()) {
                Ok(session) => {
                    let total = match session.payload_len() {
                        Ok(total) => total,
                        Err(e) => {
                            warn!(path = %descriptor.path.display(), error = %e, "preload stat failed");
                            self.fail_step(pool, descriptor);
                            return StepOutcome::Terminated;
                        }
                    };
                    descriptor.header = Some(*session.header());
                    descriptor.total = Some(total);
                    descriptor.session = Some(session);
                }
                Err(e) => {
                    warn!(path = %descriptor.path.display(), error = %e, "preload open failed");
                    self.fail_step(pool, descriptor);
                    return StepOutcome::Terminated;
                }
            }
        }

        // Stage lazily, and only once: the buffer survives retries so the
        // loaded byte count never goes backwards.
        if descriptor.staging.is_none() {
            let total = descriptor.total.unwrap_or(0);
            if !self.budget.try_reserve(total) {
                return StepOutcome::NoMemory;
            }
            descriptor.staging = Some(BytesMut::zeroed(total));
            descriptor.loaded = 0;
        }

        // Chunk loop: the first chunk is sized against the whole budget,
        // repeats against whatever of it remains.
        let mut window = budget;
        while !descriptor.is_complete() {
            let chunk = match table {
                Some(table) => table.bytes_within(window) as usize,
                None => 0,
            };
            if chunk == 0 {
                descriptor.read_cost += start.elapsed();
                return StepOutcome::Terminated;
            }

            let total = descriptor.total.unwrap_or(0);
            let n = chunk.min(total - descriptor.loaded);
            let offset = descriptor.loaded;

            let read = {
                let (Some(session), Some(staging)) =
                    (descriptor.session.as_mut(), descriptor.staging.as_mut())
                else {
                    return StepOutcome::Terminated;
                };
                session.read_payload_at(offset, &mut staging[offset..offset + n])
            };

            match read {
                Ok(()) => {
                    descriptor.loaded += n;
                    descriptor.phase = PreloadPhase::PartiallyLoaded;
                }
                Err(e) => {
                    warn!(path = %descriptor.path.display(), error = %e, "preload read failed");
                    descriptor.read_cost += start.elapsed();
                    self.fail_step(pool, descriptor);
                    return StepOutcome::Terminated;
                }
            }

            window = budget.saturating_sub(start.elapsed());
            if window.is_zero() && !descriptor.is_complete() {
                descriptor.read_cost += start.elapsed();
                return StepOutcome::Terminated;
            }
        }

        descriptor.read_cost += start.elapsed();

        // All bytes staged: hand the buffer to the bound slot.
        match self.promote_locked(pool, descriptor) {
            Ok(Some(_)) => StepOutcome::Ended,
            Ok(None) => StepOutcome::Terminated,
            Err(CacheError::OutOfMemory { .. }) => StepOutcome::NoMemory,
            Err(e) => {
                warn!(path = %descriptor.path.display(), error = %e, "preload promotion failed");
                StepOutcome::Terminated
            }
        }
    }

    /// Record a failed attempt and, on exhaustion, release everything the
    /// descriptor holds.
    fn fail_step(&self, pool: &mut PoolState, descriptor: &mut PreloadDescriptor) {
        if descriptor.record_failure() {
            self.abandon_descriptor(pool, descriptor);
        }
    }

    fn abandon_descriptor(&self, pool: &mut PoolState, descriptor: &mut PreloadDescriptor) {
        if let Some(staging) = descriptor.staging.take() {
            self.budget.release(staging.len());
        }
        if let Some(slot_idx) = descriptor.slot {
            if pool.slots[slot_idx]
                .binding()
                .is_some_and(|b| b.preload_pending)
            {
                pool.slots[slot_idx].clear();
            }
        }
        descriptor.phase = PreloadPhase::Failed;
        debug!(path = %descriptor.path.display(), "preload abandoned");
    }

    /// Abandon every not-yet-terminal descriptor from `from` onward.
    ///
    /// Invoked when staging ran out of memory: finishing the rest of the
    /// list would risk cache-wide exhaustion, so it is dropped for this
    /// run instead.
    pub(crate) fn prune_idle_from(
        &self,
        pool: &mut PoolState,
        state: &mut PreloadState,
        from: usize,
    ) {
        let mut pruned = 0;
        for descriptor in state.descriptors.iter_mut().skip(from) {
            if !descriptor.is_terminal() {
                self.abandon_descriptor(pool, descriptor);
                pruned += 1;
            }
        }
        if pruned > 0 {
            warn!(pruned, "pruned idle preload list after allocation failure");
        }
    }

    // =========================================================================
    // Idle loop
    // =========================================================================

    /// Install a throughput table directly, bypassing benchmark and
    /// history. Embedders with known storage characteristics use this;
    /// so do tests.
    pub fn set_throughput_table(&self, table: ThroughputTable) {
        self.preload.lock().table = Some(table);
    }

    /// Number of descriptors that still want work.
    pub fn idle_pending(&self) -> usize {
        self.preload
            .lock()
            .descriptors
            .iter()
            .filter(|d| d.is_runnable())
            .count()
    }

    /// Snapshot the idle list for diagnostics.
    pub fn preload_progress(&self) -> Vec<PreloadProgress> {
        self.preload
            .lock()
            .descriptors
            .iter()
            .map(|d| PreloadProgress {
                path: d.path.clone(),
                phase: d.phase(),
                loaded: d.loaded(),
                total: d.total(),
                retries_left: d.retries_left(),
                slot: d.slot(),
            })
            .collect()
    }

    /// The background task's main loop.
    ///
    /// Waits for the first completed frame, then spends each frame's grant
    /// walking the idle list: bounded lock acquisition (timeout = the
    /// remaining slack; a miss skips the cycle), one budgeted step,
    /// release, yield. Runs pass after pass — iteratively, whatever the
    /// retry pattern — until every descriptor is terminal or the
    /// coordinator shuts down.
    pub fn preload_when_idle(&self, frames: &FrameCoordinator) {
        if !frames.wait_first_frame() {
            return;
        }
        info!("idle preload starting");

        let mut last_seq = 0;
        loop {
            let Some(grant) = frames.wait_for_grant(last_seq) else {
                debug!("idle preload shut down");
                return;
            };
            last_seq = grant.seq;

            // Pass bookkeeping obeys the same bounded-wait discipline as
            // the steps: no unconditional wait in this context.
            let count = {
                let Some(state) = self.preload.try_lock_within(frames.remaining()) else {
                    continue;
                };
                if !state.descriptors.iter().any(|d| d.is_runnable()) {
                    info!("idle preload complete");
                    return;
                }
                state.descriptors.len()
            };

            for index in 0..count {
                let slack = frames.remaining();
                if slack.is_zero() {
                    break;
                }

                let Some(mut pool) = self.pool.try_lock_within(slack) else {
                    // The renderer kept the draw lock for our whole
                    // window; skip this cycle entirely.
                    break;
                };
                let Some(mut state) = self.preload.try_lock_within(frames.remaining()) else {
                    break;
                };

                if !state.descriptors.get(index).is_some_and(|d| d.is_runnable()) {
                    continue;
                }

                let outcome =
                    self.preload_step_locked(&mut pool, &mut state, index, frames.remaining());
                if outcome == StepOutcome::NoMemory {
                    self.prune_idle_from(&mut pool, &mut state, index);
                    break;
                }

                drop(state);
                drop(pool);
                thread::yield_now();
            }
        }
    }
}

/// Spawn the background preload thread.
///
/// The thread exits once every idle descriptor is terminal or when the
/// coordinator shuts down.
pub fn spawn_preloader(
    manager: Arc<CacheManager>,
    frames: Arc<FrameCoordinator>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || manager.preload_when_idle(&frames))
}

// =============================================================================
// Tests
// =============================================================================
