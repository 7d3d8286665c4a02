//! Background preloading: manifests, descriptors and the idle scheduler.
//!
//! Two ordered lists drive preloading. The boot list is decoded eagerly
//! and synchronously before the UI starts; the idle list is loaded
//! incrementally by a background task that only runs inside each frame's
//! slack, one bounded chunked read at a time.

mod descriptor;
mod manifest;
mod scheduler;

pub use descriptor::{PreloadDescriptor, PreloadPhase};
pub use manifest::parse_manifest;
pub use scheduler::{spawn_preloader, PreloadProgress, StepOutcome};

use crate::throughput::ThroughputTable;

/// State guarded by the preload lock: the idle descriptor list and the
/// throughput table the steps consult.
pub(crate) struct PreloadState {
    pub(crate) descriptors: Vec<PreloadDescriptor>,
    pub(crate) table: Option<ThroughputTable>,
}

impl PreloadState {
    pub(crate) fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            table: None,
        }
    }
}
