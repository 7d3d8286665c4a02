//! Decoder abstraction: source identifier in, header and pixel bytes out.
//!
//! The cache core stays codec-agnostic. A [`DecodeSession`] wraps an open
//! source (file handle or in-memory buffer) together with its parsed
//! header; the [`Decoder`] capability trait produces pixels from it. The
//! concrete decoder is a fixed variant selected from the header via
//! [`decoder_for`] — raw payloads and run-length payloads are the only
//! formats the pipeline speaks.
//!
//! One decoder instance serves every source of its format; all mutable
//! state lives in the session.

mod header;
mod raw;
mod rle;

pub use header::{is_pxi_header, ColorMode, ImageHeader, HEADER_SIZE, PXI_MAGIC};
pub use raw::RawDecoder;
pub use rle::{encode_runs, RleDecoder};

pub(crate) use rle::decode_runs;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::DecodeError;
use crate::source::{DrawStyle, ImageSource};

// =============================================================================
// Decode Session
// =============================================================================

/// The open stream behind a session.
enum SessionInput {
    /// An open container file.
    File(File),

    /// A baked-in container buffer.
    Memory(Bytes),

    /// Stream released by [`DecodeSession::close`].
    Closed,
}

/// An open source plus its parsed header.
///
/// Holds the stream for the duration of decoding; [`DecodeSession::close`]
/// releases it and is safe to call repeatedly.
pub struct DecodeSession {
    header: ImageHeader,
    style: DrawStyle,
    input: SessionInput,
    source_id: String,
}

impl DecodeSession {
    /// The parsed container header.
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// The draw style supplied at open.
    pub fn style(&self) -> &DrawStyle {
        &self.style
    }

    /// Identifier of the source, for diagnostics.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether the stream has been released.
    pub fn is_closed(&self) -> bool {
        matches!(self.input, SessionInput::Closed)
    }

    /// Total payload bytes following the header on the backing source.
    ///
    /// For raw payloads this equals [`ImageHeader::pixel_data_size`]; for
    /// compressed payloads it is the encoded size.
    pub fn payload_len(&self) -> Result<usize, DecodeError> {
        match &self.input {
            SessionInput::File(file) => {
                let total = file.metadata()?.len() as usize;
                Ok(total.saturating_sub(HEADER_SIZE))
            }
            SessionInput::Memory(data) => Ok(data.len().saturating_sub(HEADER_SIZE)),
            SessionInput::Closed => Ok(0),
        }
    }

    /// Read exactly `buf.len()` payload bytes starting `offset` bytes past
    /// the header. Short sources report truncation.
    pub(crate) fn read_payload_at(
        &mut self,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), DecodeError> {
        let absolute = HEADER_SIZE + offset;
        match &mut self.input {
            SessionInput::File(file) => {
                file.seek(SeekFrom::Start(absolute as u64))?;
                file.read_exact(buf).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        DecodeError::Truncated {
                            expected: buf.len(),
                            actual: 0,
                        }
                    } else {
                        DecodeError::Io(e)
                    }
                })
            }
            SessionInput::Memory(data) => {
                let end = absolute + buf.len();
                if end > data.len() {
                    return Err(DecodeError::Truncated {
                        expected: buf.len(),
                        actual: data.len().saturating_sub(absolute),
                    });
                }
                buf.copy_from_slice(&data[absolute..end]);
                Ok(())
            }
            SessionInput::Closed => Err(DecodeError::Truncated {
                expected: buf.len(),
                actual: 0,
            }),
        }
    }

    /// Release the stream handle. Idempotent.
    pub fn close(&mut self) {
        self.input = SessionInput::Closed;
    }
}

/// Open a source: open the stream, read and validate the header.
///
/// Fails with `Io` when the source cannot be opened and with a format
/// error when the header is not a supported container.
pub fn open(source: &ImageSource, style: DrawStyle) -> Result<DecodeSession, DecodeError> {
    let source_id = source.display_id();
    match source {
        ImageSource::Path(path) => {
            let mut file = File::open(path)?;
            let mut prefix = [0u8; HEADER_SIZE];
            file.read_exact(&mut prefix).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    DecodeError::Truncated {
                        expected: HEADER_SIZE,
                        actual: 0,
                    }
                } else {
                    DecodeError::Io(e)
                }
            })?;
            let header = ImageHeader::parse(&prefix)?;
            Ok(DecodeSession {
                header,
                style,
                input: SessionInput::File(file),
                source_id,
            })
        }
        ImageSource::Memory(mem) => {
            let header = ImageHeader::parse(&mem.data)?;
            Ok(DecodeSession {
                header,
                style,
                input: SessionInput::Memory(mem.data.clone()),
                source_id,
            })
        }
    }
}

// =============================================================================
// Decoder Trait
// =============================================================================

/// Capability interface turning an open session into pixel bytes.
///
/// Implementations are stateless across sources; one instance is reused
/// for every source of its format family.
pub trait Decoder: Send + Sync {
    /// Decode the entire resource into one buffer.
    ///
    /// On any read or decompress failure the partially written buffer is
    /// freed and an error returned — a half-initialized buffer never
    /// escapes.
    fn read_to_cache(&self, session: &mut DecodeSession) -> Result<Bytes, DecodeError>;

    /// Read exactly `length` pixels of row `y` into `buf`.
    ///
    /// Used by the render path to stream a not-yet-cached image one
    /// scanline at a time. `buf` must hold at least
    /// `length * bytes_per_pixel` bytes.
    fn read_line(
        &self,
        session: &mut DecodeSession,
        y: u16,
        length: u16,
        buf: &mut [u8],
    ) -> Result<(), DecodeError>;

    /// Release the session's stream. Safe on an already-closed session.
    fn close(&self, session: &mut DecodeSession) {
        session.close();
    }
}

/// Select the decoder variant for a parsed header.
pub fn decoder_for(header: &ImageHeader) -> &'static dyn Decoder {
    if header.compressed {
        &RleDecoder
    } else {
        &RawDecoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_container(width: u16, height: u16) -> Vec<u8> {
        let header = ImageHeader {
            width,
            height,
            color_mode: ColorMode::Alpha8,
            compressed: false,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend(std::iter::repeat(0xAB).take(header.pixel_data_size()));
        bytes
    }

    #[test]
    fn test_open_memory_source() {
        let source = ImageSource::memory(1, raw_container(4, 2));
        let session = open(&source, DrawStyle::default()).unwrap();
        assert_eq!(session.header().width, 4);
        assert_eq!(session.payload_len().unwrap(), 8);
        assert!(!session.is_closed());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let source = ImageSource::memory(1, vec![0u8; 32]);
        assert!(matches!(
            open(&source, DrawStyle::default()),
            Err(DecodeError::BadMagic(_))
        ));
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let source = ImageSource::path("/nonexistent/resource.pxi");
        assert!(matches!(
            open(&source, DrawStyle::default()),
            Err(DecodeError::Io(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let source = ImageSource::memory(1, raw_container(2, 2));
        let mut session = open(&source, DrawStyle::default()).unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(session.payload_len().unwrap(), 0);
    }

    #[test]
    fn test_decoder_selection_follows_header() {
        let raw = ImageHeader {
            width: 1,
            height: 1,
            color_mode: ColorMode::Alpha8,
            compressed: false,
        };
        let rle = ImageHeader {
            compressed: true,
            ..raw
        };
        // Identity of the selected variant is observable through behavior:
        // the RLE decoder refuses line reads, the raw decoder does not.
        let source = ImageSource::memory(1, {
            let mut bytes = raw.encode().to_vec();
            bytes.push(0x11);
            bytes
        });
        let mut session = open(&source, DrawStyle::default()).unwrap();
        let mut buf = [0u8; 1];
        assert!(decoder_for(&raw)
            .read_line(&mut session, 0, 1, &mut buf)
            .is_ok());
        assert!(matches!(
            decoder_for(&rle).read_line(&mut session, 0, 1, &mut buf),
            Err(DecodeError::LineUnsupported)
        ));
    }

    #[test]
    fn test_read_payload_past_end_is_truncated() {
        let source = ImageSource::memory(1, raw_container(2, 1));
        let mut session = open(&source, DrawStyle::default()).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            session.read_payload_at(0, &mut buf),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
