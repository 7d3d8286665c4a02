//! Image source identity.
//!
//! A resource enters the cache either as a filesystem path or as an
//! in-memory descriptor handed over by the embedding application (for
//! baked-in assets). The cache keys slots on source identity: exact path
//! equality for files, descriptor id equality for memory sources.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// An in-memory image container.
///
/// The id is assigned by the embedder and is the descriptor's identity;
/// two descriptors with the same id are the same resource regardless of
/// the buffer they carry.
#[derive(Debug, Clone)]
pub struct MemorySource {
    /// Embedder-assigned identity.
    pub id: u32,

    /// The complete container bytes (header + payload).
    pub data: Bytes,
}

impl MemorySource {
    pub fn new(id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// Identifies one image resource.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A container file on the backing storage.
    Path(PathBuf),

    /// A baked-in container in memory.
    Memory(MemorySource),
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    pub fn memory(id: u32, data: impl Into<Bytes>) -> Self {
        ImageSource::Memory(MemorySource::new(id, data))
    }

    /// Whether two sources name the same resource.
    pub fn same_resource(&self, other: &ImageSource) -> bool {
        match (self, other) {
            (ImageSource::Path(a), ImageSource::Path(b)) => a == b,
            (ImageSource::Memory(a), ImageSource::Memory(b)) => a.id == b.id,
            _ => false,
        }
    }

    /// The filesystem path, for path sources.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ImageSource::Path(p) => Some(p.as_path()),
            ImageSource::Memory(_) => None,
        }
    }

    /// A short identifier for diagnostics and error messages.
    pub fn display_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(p) => write!(f, "{}", p.display()),
            ImageSource::Memory(m) => write!(f, "mem:{}", m.id),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

/// A render style forwarded to the decode session.
///
/// The cache does not key slots on style; it is decode-time context only
/// (an `Alpha8` source is tinted with `recolor` as it is expanded by the
/// blitter downstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawStyle {
    /// RGBA tint applied to alpha-only sources.
    pub recolor: [u8; 4],
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            recolor: [0xFF, 0xFF, 0xFF, 0xFF],
        }
    }
}
