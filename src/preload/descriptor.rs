//! Bookkeeping for one background-loaded resource.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;

use crate::decode::{DecodeSession, ImageHeader};
use crate::source::ImageSource;

/// Load progress of a preload descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPhase {
    /// Queued; no bytes read yet.
    NotStarted,

    /// Some payload bytes are staged.
    PartiallyLoaded,

    /// Fully staged and promoted into its cache slot.
    Preloaded,

    /// Retry budget exhausted; skipped until the cache is reset.
    Failed,
}

/// A resource queued for background loading.
///
/// The staging buffer is exclusively owned here until promotion, at which
/// point it moves into the bound cache slot and only bookkeeping remains.
pub struct PreloadDescriptor {
    pub(crate) path: PathBuf,
    pub(crate) slot: Option<usize>,
    pub(crate) header: Option<ImageHeader>,
    pub(crate) loaded: usize,
    pub(crate) total: Option<usize>,
    pub(crate) staging: Option<BytesMut>,
    pub(crate) session: Option<DecodeSession>,
    pub(crate) retries: u8,
    pub(crate) phase: PreloadPhase,
    /// Wall time spent reading chunks, reported as the slot's decode cost.
    pub(crate) read_cost: Duration,
}

impl PreloadDescriptor {
    pub fn new(path: PathBuf, retries: u8) -> Self {
        Self {
            path,
            slot: None,
            header: None,
            loaded: 0,
            total: None,
            staging: None,
            session: None,
            retries,
            phase: PreloadPhase::NotStarted,
            read_cost: Duration::ZERO,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> PreloadPhase {
        self.phase
    }

    /// Assigned slot index; `None` until the capacity evaluation pass.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn retries_left(&self) -> u8 {
        self.retries
    }

    /// Whether this descriptor names the given source.
    pub fn matches(&self, source: &ImageSource) -> bool {
        source.as_path().is_some_and(|p| p == self.path)
    }

    /// All payload bytes are staged (promotion may still be pending).
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|t| self.loaded >= t)
    }

    /// Nothing more will ever happen to this descriptor.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, PreloadPhase::Preloaded | PreloadPhase::Failed)
    }

    /// Whether an idle pass should attempt a step.
    pub fn is_runnable(&self) -> bool {
        !self.is_terminal() && self.slot.is_some() && self.retries > 0
    }

    /// Record one failed attempt; exhausting the budget is permanent.
    ///
    /// Returns `true` when the budget is now exhausted. The caller owns
    /// the cleanup of the staging buffer (it is accounted in the memory
    /// budget). The stream is dropped either way; a surviving descriptor
    /// reopens it on the next attempt and resumes the staged byte count.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.session = None;
        self.retries = self.retries.saturating_sub(1);
        if self.retries == 0 {
            self.phase = PreloadPhase::Failed;
            true
        } else {
            false
        }
    }
}
