//! Cache manager: the single point of truth for "is resource X cached,
//! and if not, how do I get it cached safely and cheaply".
//!
//! The manager owns the fixed slot pool, both preload lists, the memory
//! budget and the two locks that mediate between the render context and
//! the background preloader:
//!
//! - the **draw lock** guards the slot pool. The render context acquires
//!   it unconditionally — per call through [`CacheManager::open`] and
//!   friends, or for a whole frame through [`CacheManager::begin_frame`].
//!   The preloader only ever takes it with a bounded wait.
//! - the **preload lock** guards the descriptor list and the active
//!   staging buffer, and is held for at most one chunked read.
//!
//! Lock order is draw before preload, everywhere.

use std::time::Instant;

use bytes::Bytes;
use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::config::{CacheConfig, MAX_CACHE_ENTRIES};
use crate::decode::{self, decoder_for, ImageHeader};
use crate::error::{CacheError, DecodeError};
use crate::preload::PreloadState;
use crate::source::{DrawStyle, ImageSource};
use crate::sync::SlackMutex;

use super::budget::MemoryBudget;
use super::policy::{CostAgingPolicy, EvictionPolicy};
use super::slot::{CacheSlot, SlotBinding};

/// A successfully opened resource: its header plus the shared pixel
/// buffer. Clones share the allocation, so repeated opens of a cached
/// source observe the same buffer identity.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub header: ImageHeader,
    pub pixels: Bytes,
}

/// The slot pool, guarded by the draw lock.
pub(crate) struct PoolState {
    pub(crate) slots: Vec<CacheSlot>,
}

/// Observable state of a bound slot, for embedders and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    /// Excluded from eviction.
    pub persistent: bool,

    /// The pixel buffer is fully present.
    pub fully_loaded: bool,
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Orchestrates the slot pool, eviction, decoding and preload promotion.
///
/// One manager per renderer process is the convention; the crate does not
/// enforce it.
pub struct CacheManager {
    pub(crate) config: CacheConfig,
    pub(crate) pool: SlackMutex<PoolState>,
    pub(crate) preload: SlackMutex<PreloadState>,
    pub(crate) budget: MemoryBudget,
    policy: Box<dyn EvictionPolicy>,
}

impl CacheManager {
    /// Build a manager with the default eviction policy.
    ///
    /// Fails when `config.capacity` is zero or above [`MAX_CACHE_ENTRIES`].
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_policy(config, Box::new(CostAgingPolicy::default()))
    }

    /// Build a manager with a custom eviction policy.
    pub fn with_policy(
        config: CacheConfig,
        policy: Box<dyn EvictionPolicy>,
    ) -> Result<Self, CacheError> {
        if config.capacity == 0 || config.capacity > MAX_CACHE_ENTRIES {
            return Err(CacheError::Capacity {
                requested: config.capacity,
                max: MAX_CACHE_ENTRIES,
            });
        }

        let slots = (0..config.capacity).map(|_| CacheSlot::default()).collect();
        let budget = MemoryBudget::new(config.memory_limit);

        Ok(Self {
            config,
            pool: SlackMutex::new(PoolState { slots }),
            preload: SlackMutex::new(PreloadState::new()),
            budget,
            policy,
        })
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.config.capacity as usize
    }

    /// Bytes currently committed to pixel and staging buffers.
    pub fn memory_used(&self) -> usize {
        self.budget.used()
    }

    /// Acquire the draw lock for one frame.
    ///
    /// The render context calls this at frame start — blocking until the
    /// preloader finishes its current chunk — and drops the pass at frame
    /// end. All cache operations during the frame go through the pass.
    pub fn begin_frame(&self) -> RenderPass<'_> {
        RenderPass {
            manager: self,
            pool: self.pool.lock(),
        }
    }

    // =========================================================================
    // Public operations (per-call locking)
    // =========================================================================

    /// Look up `source`, decoding it into a slot on a miss.
    pub fn open(&self, source: &ImageSource, style: DrawStyle) -> Result<ImageInfo, CacheError> {
        let mut pool = self.pool.lock();
        self.open_locked(&mut pool, source, style)
    }

    /// Release the slot bound to `source`. Idempotent: closing an unbound
    /// source is a no-op that still reports success.
    pub fn close(&self, source: &ImageSource) -> bool {
        let mut pool = self.pool.lock();
        self.close_locked(&mut pool, source)
    }

    /// The header of `source`, without guaranteeing pixels.
    ///
    /// Served from the bound slot when there is one; otherwise the
    /// container prefix is read directly, without consuming a slot, so
    /// layout code sizing a view cannot trigger eviction.
    pub fn image_header(&self, source: &ImageSource) -> Option<ImageHeader> {
        let mut pool = self.pool.lock();
        self.header_locked(&mut pool, source)
    }

    /// Bind `source` to a slot with an open stream but no pixels yet.
    ///
    /// The render path uses this to draw an image it cannot afford to
    /// decode this frame: the header sizes the view and [`Self::read_line`]
    /// streams scanlines. A later [`Self::open`] completes the decode in
    /// place.
    pub fn open_streaming(
        &self,
        source: &ImageSource,
        style: DrawStyle,
    ) -> Result<ImageHeader, CacheError> {
        let mut pool = self.pool.lock();
        self.open_streaming_locked(&mut pool, source, style)
    }

    /// Read `length` pixels of row `y` from a bound source into `buf`.
    ///
    /// Copies from the cached buffer when the source is fully decoded,
    /// streams through the slot's open session otherwise.
    pub fn read_line(
        &self,
        source: &ImageSource,
        y: u16,
        length: u16,
        buf: &mut [u8],
    ) -> Result<(), CacheError> {
        let mut pool = self.pool.lock();
        self.read_line_locked(&mut pool, source, y, length, buf)
    }

    /// Observable state of the slot bound to `source`, if any.
    pub fn slot_status(&self, source: &ImageSource) -> Option<SlotStatus> {
        let pool = self.pool.lock();
        pool.slots
            .iter()
            .find(|s| s.holds(source))
            .and_then(|s| s.binding())
            .map(|b| SlotStatus {
                persistent: b.persistent,
                fully_loaded: b.pixels.is_some(),
            })
    }

    /// Clear every binding and all preload state. Previous buffer handles
    /// stay alive but the pool starts over.
    pub fn reset(&self) {
        let mut pool = self.pool.lock();
        let mut preload = self.preload.lock();

        for slot in &mut pool.slots {
            let freed = slot.clear();
            if freed > 0 {
                self.budget.release(freed);
            }
        }
        for descriptor in &mut preload.descriptors {
            if let Some(staging) = descriptor.staging.take() {
                self.budget.release(staging.len());
            }
        }
        preload.descriptors.clear();
        debug!("cache reset");
    }

    // =========================================================================
    // Lookup and decode
    // =========================================================================

    pub(crate) fn open_locked(
        &self,
        pool: &mut PoolState,
        source: &ImageSource,
        style: DrawStyle,
    ) -> Result<ImageInfo, CacheError> {
        // 1. Hit among bound slots.
        if let Some(idx) = pool.slots.iter().position(|s| s.holds(source)) {
            return self.serve_hit(pool, idx, source);
        }

        // 2. A fully staged but unpromoted preload can be served without
        // decoding.
        {
            let mut preload = self.preload.lock();
            if let Some(pos) = preload
                .descriptors
                .iter()
                .position(|d| d.matches(source) && d.is_complete() && !d.is_terminal())
            {
                if let Some(info) = self.promote_locked(pool, &mut preload.descriptors[pos])? {
                    trace!(source = %source, "promoted preload on open");
                    return Ok(info);
                }
            }
        }

        // 3. Miss: age the survivors, evict a victim, decode.
        trace!(source = %source, "cache miss");
        self.age_pool(pool);
        let victim = self.select_victim(pool)?;
        self.decode_into_slot(pool, victim, source, style)
    }

    fn serve_hit(
        &self,
        pool: &mut PoolState,
        idx: usize,
        source: &ImageSource,
    ) -> Result<ImageInfo, CacheError> {
        enum HitKind {
            Ready,
            Streaming,
            Pending,
        }

        let kind = match pool.slots[idx].binding() {
            Some(b) if b.preload_pending => HitKind::Pending,
            Some(b) if b.header.is_some() && b.pixels.is_some() => HitKind::Ready,
            Some(b) if b.header.is_some() && b.session.is_some() => HitKind::Streaming,
            _ => HitKind::Pending,
        };

        match kind {
            HitKind::Pending => Err(CacheError::NotReady(source.display_id())),
            // Header-only streaming binding: finish the decode in place.
            HitKind::Streaming => self.finish_streaming_decode(pool, idx, source),
            HitKind::Ready => {
                let Some(binding) = pool.slots[idx].binding_mut() else {
                    return Err(CacheError::NotReady(source.display_id()));
                };
                binding.life = self.policy.on_hit(binding.life, binding.decode_cost);
                trace!(source = %source, slot = idx, life = binding.life, "cache hit");
                match (binding.header, &binding.pixels) {
                    (Some(header), Some(pixels)) => Ok(ImageInfo {
                        header,
                        pixels: pixels.clone(),
                    }),
                    _ => Err(CacheError::NotReady(source.display_id())),
                }
            }
        }
    }

    /// Complete the decode of a slot bound via [`CacheManager::open_streaming`].
    fn finish_streaming_decode(
        &self,
        pool: &mut PoolState,
        idx: usize,
        source: &ImageSource,
    ) -> Result<ImageInfo, CacheError> {
        let Some(header) = pool.slots[idx].binding().and_then(|b| b.header) else {
            return Err(CacheError::NotReady(source.display_id()));
        };
        let size = header.pixel_data_size();
        self.reserve_with_prune(pool, size, Some(source))?;

        let Some(binding) = pool.slots[idx].binding_mut() else {
            self.budget.release(size);
            return Err(CacheError::NotReady(source.display_id()));
        };
        let Some(mut session) = binding.session.take() else {
            self.budget.release(size);
            return Err(CacheError::NotReady(source.display_id()));
        };

        let start = Instant::now();
        match decoder_for(&header).read_to_cache(&mut session) {
            Ok(pixels) => {
                binding.pixels = Some(pixels.clone());
                binding.decode_cost = start.elapsed();
                binding.session = None;
                Ok(ImageInfo { header, pixels })
            }
            Err(e) => {
                // Keep the stream: the caller can still scanline-stream.
                binding.session = Some(session);
                self.budget.release(size);
                Err(self.map_decode_err(source, e))
            }
        }
    }

    fn decode_into_slot(
        &self,
        pool: &mut PoolState,
        victim: usize,
        source: &ImageSource,
        style: DrawStyle,
    ) -> Result<ImageInfo, CacheError> {
        let freed = pool.slots[victim].clear();
        if freed > 0 {
            self.budget.release(freed);
            debug!(slot = victim, freed, "evicted slot");
        }

        let start = Instant::now();
        let mut session =
            decode::open(source, style).map_err(|e| self.map_decode_err(source, e))?;
        let header = *session.header();
        let size = header.pixel_data_size();

        self.reserve_with_prune(pool, size, Some(source))?;

        let decoder = decoder_for(&header);
        let pixels = match decoder.read_to_cache(&mut session) {
            Ok(pixels) => pixels,
            Err(e) => {
                self.budget.release(size);
                return Err(self.map_decode_err(source, e));
            }
        };
        decoder.close(&mut session);
        let decode_cost = start.elapsed();

        pool.slots[victim].bind(SlotBinding {
            source: source.clone(),
            header: Some(header),
            style,
            pixels: Some(pixels.clone()),
            session: None,
            life: self.policy.initial_life(),
            persistent: false,
            preload_pending: false,
            decode_cost,
        });
        debug!(source = %source, slot = victim, bytes = size, ?decode_cost, "decoded into slot");

        Ok(ImageInfo { header, pixels })
    }

    pub(crate) fn close_locked(&self, pool: &mut PoolState, source: &ImageSource) -> bool {
        match pool.slots.iter().position(|s| s.holds(source)) {
            Some(idx) => {
                let freed = pool.slots[idx].clear();
                if freed > 0 {
                    self.budget.release(freed);
                }
                trace!(source = %source, slot = idx, "closed");
                true
            }
            None => true,
        }
    }

    pub(crate) fn header_locked(
        &self,
        pool: &mut PoolState,
        source: &ImageSource,
    ) -> Option<ImageHeader> {
        if let Some(slot) = pool.slots.iter().find(|s| s.holds(source)) {
            if let Some(header) = slot.binding().and_then(|b| b.header) {
                return Some(header);
            }
        }
        decode::open(source, DrawStyle::default())
            .ok()
            .map(|session| *session.header())
    }

    fn open_streaming_locked(
        &self,
        pool: &mut PoolState,
        source: &ImageSource,
        style: DrawStyle,
    ) -> Result<ImageHeader, CacheError> {
        if let Some(idx) = pool.slots.iter().position(|s| s.holds(source)) {
            let Some(binding) = pool.slots[idx].binding() else {
                return Err(CacheError::NotReady(source.display_id()));
            };
            if binding.preload_pending {
                return Err(CacheError::NotReady(source.display_id()));
            }
            if let Some(header) = binding.header {
                return Ok(header);
            }
            return Err(CacheError::NotReady(source.display_id()));
        }

        self.age_pool(pool);
        let victim = self.select_victim(pool)?;
        let freed = pool.slots[victim].clear();
        if freed > 0 {
            self.budget.release(freed);
        }

        let start = Instant::now();
        let session = decode::open(source, style).map_err(|e| self.map_decode_err(source, e))?;
        let header = *session.header();

        pool.slots[victim].bind(SlotBinding {
            source: source.clone(),
            header: Some(header),
            style,
            pixels: None,
            session: Some(session),
            life: self.policy.initial_life(),
            persistent: false,
            preload_pending: false,
            decode_cost: start.elapsed(),
        });
        debug!(source = %source, slot = victim, "opened for streaming");

        Ok(header)
    }

    fn read_line_locked(
        &self,
        pool: &mut PoolState,
        source: &ImageSource,
        y: u16,
        length: u16,
        buf: &mut [u8],
    ) -> Result<(), CacheError> {
        let Some(idx) = pool.slots.iter().position(|s| s.holds(source)) else {
            return Err(CacheError::NotReady(source.display_id()));
        };
        let Some(binding) = pool.slots[idx].binding_mut() else {
            return Err(CacheError::NotReady(source.display_id()));
        };
        let Some(header) = binding.header else {
            return Err(CacheError::NotReady(source.display_id()));
        };

        if let Some(pixels) = &binding.pixels {
            // Fully cached: copy the row out of the shared buffer.
            if y >= header.height || length > header.width {
                return Err(CacheError::Format(DecodeError::LineOutOfBounds {
                    y,
                    length,
                    width: header.width,
                    height: header.height,
                }));
            }
            let byte_len = length as usize * header.color_mode.bytes_per_pixel();
            if buf.len() < byte_len {
                return Err(CacheError::Format(DecodeError::Truncated {
                    expected: byte_len,
                    actual: buf.len(),
                }));
            }
            let offset = y as usize * header.line_stride();
            buf[..byte_len].copy_from_slice(&pixels[offset..offset + byte_len]);
            return Ok(());
        }

        match binding.session.as_mut() {
            Some(session) => decoder_for(&header)
                .read_line(session, y, length, buf)
                .map_err(|e| self.map_decode_err(source, e)),
            None => Err(CacheError::NotReady(source.display_id())),
        }
    }

    // =========================================================================
    // Eviction and recovery
    // =========================================================================

    /// Decay every non-persistent bound slot by one aging step.
    fn age_pool(&self, pool: &mut PoolState) {
        for slot in &mut pool.slots {
            if !slot.evictable() {
                continue;
            }
            if let Some(binding) = slot.binding_mut() {
                binding.life = self.policy.on_age(binding.life);
            }
        }
    }

    /// Pick the slot a miss will decode into: the first empty slot, else
    /// the lowest-life evictable slot, pool-index order breaking ties.
    fn select_victim(&self, pool: &PoolState) -> Result<usize, CacheError> {
        if let Some(idx) = pool.slots.iter().position(|s| s.is_empty()) {
            return Ok(idx);
        }

        pool.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.evictable())
            .min_by_key(|(idx, slot)| (slot.binding().map_or(u32::MAX, |b| b.life), *idx))
            .map(|(idx, _)| idx)
            .ok_or(CacheError::OutOfMemory {
                requested: 0,
                available: self.budget.available(),
            })
    }

    /// Reserve `size` bytes, freeing at most one slot to make room.
    ///
    /// The prune victim is the globally least-recently-used evictable slot
    /// that holds pixels and is not the slot being (re)filled.
    pub(crate) fn reserve_with_prune(
        &self,
        pool: &mut PoolState,
        size: usize,
        exclude: Option<&ImageSource>,
    ) -> Result<(), CacheError> {
        if self.budget.try_reserve(size) {
            return Ok(());
        }

        let target = pool
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.evictable()
                    && slot.binding().is_some_and(|b| b.pixels.is_some())
                    && exclude.map_or(true, |src| !slot.holds(src))
            })
            .min_by_key(|(idx, slot)| (slot.binding().map_or(u32::MAX, |b| b.life), *idx))
            .map(|(idx, _)| idx);

        if let Some(idx) = target {
            let freed = pool.slots[idx].clear();
            if freed > 0 {
                self.budget.release(freed);
            }
            warn!(slot = idx, freed, "pruned slot to satisfy allocation");
            if self.budget.try_reserve(size) {
                return Ok(());
            }
        }

        Err(CacheError::OutOfMemory {
            requested: size,
            available: self.budget.available(),
        })
    }

    // =========================================================================
    // Preload promotion
    // =========================================================================

    /// Move a fully staged descriptor's bytes into its bound slot.
    ///
    /// Returns `Ok(None)` when the descriptor cannot be promoted (slot
    /// rebound elsewhere, or nothing staged) and the caller should fall
    /// back to a synchronous decode.
    pub(crate) fn promote_locked(
        &self,
        pool: &mut PoolState,
        descriptor: &mut crate::preload::PreloadDescriptor,
    ) -> Result<Option<ImageInfo>, CacheError> {
        let (Some(slot_idx), Some(header)) = (descriptor.slot, descriptor.header) else {
            return Ok(None);
        };
        let source = ImageSource::Path(descriptor.path.clone());

        // An explicit close may have released the reservation and eviction
        // rebound the slot; the staged bytes are then abandoned.
        if !(pool.slots[slot_idx].is_empty() || pool.slots[slot_idx].holds(&source)) {
            warn!(source = %source, slot = slot_idx, "preload slot was rebound, abandoning");
            if let Some(staging) = descriptor.staging.take() {
                self.budget.release(staging.len());
            }
            descriptor.phase = crate::preload::PreloadPhase::Failed;
            descriptor.session = None;
            return Ok(None);
        }

        let Some(staging) = descriptor.staging.take() else {
            return Ok(None);
        };
        let staged_len = staging.len();

        let pixels = if header.compressed {
            let size = header.pixel_data_size();
            if let Err(e) = self.reserve_with_prune(pool, size, Some(&source)) {
                descriptor.staging = Some(staging);
                return Err(e);
            }
            match decode::decode_runs(&staging, size) {
                Ok(decoded) => {
                    self.budget.release(staged_len);
                    decoded.freeze()
                }
                Err(e) => {
                    self.budget.release(size);
                    self.budget.release(staged_len);
                    descriptor.phase = crate::preload::PreloadPhase::Failed;
                    descriptor.session = None;
                    return Err(self.map_decode_err(&source, e));
                }
            }
        } else {
            // The staging reservation carries over as the pixel reservation.
            staging.freeze()
        };

        descriptor.session = None;
        descriptor.phase = crate::preload::PreloadPhase::Preloaded;

        pool.slots[slot_idx].bind(SlotBinding {
            source,
            header: Some(header),
            style: DrawStyle::default(),
            pixels: Some(pixels.clone()),
            session: None,
            life: self.policy.initial_life(),
            persistent: true,
            preload_pending: false,
            decode_cost: descriptor.read_cost,
        });
        debug!(path = %descriptor.path.display(), slot = slot_idx, "preload promoted");

        Ok(Some(ImageInfo { header, pixels }))
    }

    pub(crate) fn map_decode_err(&self, source: &ImageSource, e: DecodeError) -> CacheError {
        match e {
            DecodeError::Io(cause) => CacheError::Io {
                source_id: source.display_id(),
                cause,
            },
            other => CacheError::Format(other),
        }
    }
}

// =============================================================================
// Render Pass
// =============================================================================

/// The draw lock, held for one frame.
///
/// Obtained from [`CacheManager::begin_frame`]; every cache operation the
/// renderer performs while drawing goes through this pass, and dropping it
/// at frame end releases the lock for the preloader.
pub struct RenderPass<'a> {
    manager: &'a CacheManager,
    pool: MutexGuard<'a, PoolState>,
}

impl RenderPass<'_> {
    pub fn open(&mut self, source: &ImageSource, style: DrawStyle) -> Result<ImageInfo, CacheError> {
        self.manager.open_locked(&mut self.pool, source, style)
    }

    pub fn close(&mut self, source: &ImageSource) -> bool {
        self.manager.close_locked(&mut self.pool, source)
    }

    pub fn image_header(&mut self, source: &ImageSource) -> Option<ImageHeader> {
        self.manager.header_locked(&mut self.pool, source)
    }

    pub fn open_streaming(
        &mut self,
        source: &ImageSource,
        style: DrawStyle,
    ) -> Result<ImageHeader, CacheError> {
        self.manager
            .open_streaming_locked(&mut self.pool, source, style)
    }

    pub fn read_line(
        &mut self,
        source: &ImageSource,
        y: u16,
        length: u16,
        buf: &mut [u8],
    ) -> Result<(), CacheError> {
        self.manager
            .read_line_locked(&mut self.pool, source, y, length, buf)
    }
}

// =============================================================================
// Tests
// =============================================================================
