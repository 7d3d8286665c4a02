//! # pix-cache
//!
//! A budget-aware decoded-image cache for embedded UI renderers that must
//! produce frames on a fixed time budget.
//!
//! The crate solves two coupled problems: it avoids re-decoding the same
//! resource on every draw by caching decoded pixel buffers in a fixed
//! slot pool with a recency/eviction policy, and it hides decode latency
//! by loading resources in a background task that only runs inside the
//! slack of each frame's time budget, coordinated with the render thread
//! through budget-aware locking.
//!
//! ## Features
//!
//! - **Fixed slot pool**: bounded capacity, cost-weighted LRU eviction,
//!   persistent slots exempt from eviction
//! - **Frame-slack preloading**: a background thread loads manifest-listed
//!   resources one bounded chunked read at a time, never delaying a frame
//! - **Throughput estimation**: a benchmarked (and optionally persisted)
//!   table sizes each preload chunk to the time actually available
//! - **Scanline streaming**: images too large to decode within a frame can
//!   be drawn row by row while the cache fills in the background
//!
//! ## Architecture
//!
//! - [`cache`] - slot pool, eviction policy, memory budget, manager
//! - [`decode`] - container headers and the raw/RLE decoder variants
//! - [`preload`] - manifests, descriptors, the idle scheduler
//! - [`throughput`] - storage benchmark and persisted history
//! - [`frame`] - frame-budget coordination with the render loop
//! - [`config`] - configuration types and the CLI surface
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use pix_cache::{
//!     spawn_preloader, CacheConfig, CacheManager, DrawStyle, FrameCoordinator, ImageSource,
//! };
//!
//! let mut config = CacheConfig::new(32);
//! config.preload.idle_manifest = Some("assets/preload.txt".into());
//!
//! let cache = Arc::new(CacheManager::new(config).unwrap());
//! cache.preload_before_launch().unwrap();
//!
//! let frames = Arc::new(FrameCoordinator::default());
//! let preloader = spawn_preloader(cache.clone(), frames.clone());
//!
//! // Render loop.
//! for _ in 0..3 {
//!     frames.on_frame_start();
//!     let start = Instant::now();
//!     {
//!         let mut pass = cache.begin_frame();
//!         if let Ok(image) = pass.open(&ImageSource::path("assets/icon.pxi"), DrawStyle::default()) {
//!             // blit image.pixels ...
//!         }
//!     }
//!     frames.on_frame_end(start.elapsed());
//!     std::thread::sleep(Duration::from_millis(16));
//! }
//!
//! frames.shutdown();
//! preloader.join().unwrap();
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod preload;
pub mod source;
pub mod sync;
pub mod throughput;

// Re-export commonly used types
pub use cache::{
    CacheManager, CostAgingPolicy, EvictionPolicy, ImageInfo, MemoryBudget, RenderPass, SlotStatus,
};
pub use config::{
    CacheConfig, Cli, Command, PreloadSettings, DEFAULT_CAPACITY, MAX_CACHE_ENTRIES, SOURCE_SUFFIX,
};
pub use decode::{
    decoder_for, is_pxi_header, ColorMode, DecodeSession, Decoder, ImageHeader, RawDecoder,
    RleDecoder, HEADER_SIZE,
};
pub use error::{CacheError, DecodeError, ManifestError};
pub use frame::{FrameCoordinator, FrameGrant, DEFAULT_FRAME_PERIOD, DEFAULT_SLACK_RESERVE};
pub use preload::{
    parse_manifest, spawn_preloader, PreloadPhase, PreloadProgress, StepOutcome,
};
pub use source::{DrawStyle, ImageSource, MemorySource};
pub use sync::SlackMutex;
pub use throughput::{
    ThroughputSample, ThroughputTable, DEFAULT_MAX_PROBE_SIZE, HISTORY_EXPIRED_GENERATION,
};
