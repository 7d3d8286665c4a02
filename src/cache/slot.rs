//! One pooled entry of decoded image data.
//!
//! A slot is either empty or bound to exactly one source. A binding may be
//! in three shapes:
//!
//! - header + pixels: fully cached, the common case;
//! - header + open decode session, no pixels: the render path is streaming
//!   this source line by line (or only its header was requested so far);
//! - source only, no pixels: the background preloader has reserved this
//!   slot and is filling a staging buffer for it.
//!
//! Pixel buffers are [`Bytes`]: handing one out clones the handle, not the
//! allocation, so repeated opens observe the same buffer identity.

use std::time::Duration;

use bytes::Bytes;

use crate::decode::{DecodeSession, ImageHeader};
use crate::source::{DrawStyle, ImageSource};

/// The binding of a slot to one source.
pub struct SlotBinding {
    /// The resource this slot holds.
    pub source: ImageSource,

    /// Parsed header; absent only for preload reservations that have not
    /// read the container yet.
    pub header: Option<ImageHeader>,

    /// Style supplied at open; decode-time context, not identity.
    pub style: DrawStyle,

    /// The decoded pixel buffer, once fully produced.
    pub pixels: Option<Bytes>,

    /// Open stream while this source is being line-streamed; released
    /// once fully cached.
    pub session: Option<DecodeSession>,

    /// Recency score driving eviction.
    pub life: u32,

    /// Excluded from eviction (boot-loaded or promoted preloads).
    pub persistent: bool,

    /// Reserved by the preloader; not evictable, not yet readable.
    pub preload_pending: bool,

    /// How long the decode took; scales the per-hit recency boost.
    pub decode_cost: Duration,
}

/// One entry of the fixed slot pool.
#[derive(Default)]
pub struct CacheSlot {
    binding: Option<SlotBinding>,
}

impl CacheSlot {
    pub fn is_empty(&self) -> bool {
        self.binding.is_none()
    }

    pub fn binding(&self) -> Option<&SlotBinding> {
        self.binding.as_ref()
    }

    pub fn binding_mut(&mut self) -> Option<&mut SlotBinding> {
        self.binding.as_mut()
    }

    /// Whether this slot holds `source`.
    pub fn holds(&self, source: &ImageSource) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| b.source.same_resource(source))
    }

    /// Whether the eviction scan may select this slot.
    pub fn evictable(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| !b.persistent && !b.preload_pending)
    }

    pub fn bind(&mut self, binding: SlotBinding) {
        self.binding = Some(binding);
    }

    /// Clear the binding, dropping any session handle.
    ///
    /// Returns the pixel bytes that were held, so the caller can return
    /// them to the memory budget.
    pub fn clear(&mut self) -> usize {
        match self.binding.take() {
            Some(binding) => binding.pixels.map_or(0, |p| p.len()),
            None => 0,
        }
    }
}
