use thiserror::Error;

/// Errors surfaced by the cache manager.
///
/// No operation panics or aborts the caller: every failure is reported
/// through this enum and the worst outcome is a resource failing to render.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The source is bound to a slot that is still being preloaded.
    ///
    /// The caller may fall back to the line-streaming decode path or render
    /// a placeholder and retry on a later frame.
    #[error("resource is still preloading: {0}")]
    NotReady(String),

    /// Open/read/stat failure on the backing source.
    #[error("I/O error on {source_id}: {cause}")]
    Io {
        source_id: String,
        #[source]
        cause: std::io::Error,
    },

    /// The pixel or staging buffer did not fit the memory budget, and the
    /// single prune-and-retry recovery also failed.
    #[error("out of memory: {requested} bytes requested, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// The header declares a format the pipeline does not support.
    #[error(transparent)]
    Format(#[from] DecodeError),

    /// Pool capacity outside `(0, MAX_CACHE_ENTRIES]`.
    #[error("invalid cache capacity {requested}: must be in 1..={max}")]
    Capacity { requested: u16, max: u16 },

    /// A preload manifest could not be used.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Errors from header parsing and pixel decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// I/O error while reading the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The first bytes are not the `PXI1` container magic.
    #[error("bad container magic: expected PXI1, got {0:02X?}")]
    BadMagic([u8; 4]),

    /// The header color mode byte is not one the pipeline supports.
    #[error("unsupported color mode: {0}")]
    UnsupportedColorMode(u8),

    /// Header declares zero-sized dimensions.
    #[error("degenerate image dimensions: {width}x{height}")]
    EmptyImage { width: u16, height: u16 },

    /// The payload ended before the declared pixel count was produced.
    #[error("truncated payload: got {actual} of {expected} bytes")]
    Truncated { expected: usize, actual: usize },

    /// A run-length control sequence decodes past the declared size.
    #[error("corrupt run at payload offset {offset}")]
    CorruptRun { offset: usize },

    /// Line reads are only possible on uncompressed sources.
    #[error("line read unsupported for compressed payload")]
    LineUnsupported,

    /// A line read addressed pixels outside the image.
    #[error("line read out of bounds: row {y}, {length} pixels, image is {width}x{height}")]
    LineOutOfBounds {
        y: u16,
        length: u16,
        width: u16,
        height: u16,
    },
}

/// Errors from preload manifest parsing.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("cannot read manifest {path}: {cause}")]
    Io {
        path: String,
        #[source]
        cause: std::io::Error,
    },

    /// The manifest exceeds the configured size limit and is treated as
    /// terminal rather than parsed.
    #[error("manifest {path} is {size} bytes, limit is {limit}")]
    TooLarge {
        path: String,
        size: u64,
        limit: u64,
    },
}
