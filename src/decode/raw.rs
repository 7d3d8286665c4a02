//! Decoder for raw (uncompressed) payloads.
//!
//! The payload is the pixel buffer verbatim, which makes two access paths
//! possible: one bulk read for full caching, and seek-based single-row
//! reads for streaming a not-yet-cached image under a frame deadline.

use bytes::{Bytes, BytesMut};

use crate::error::DecodeError;

use super::{DecodeSession, Decoder};

/// Decoder for containers whose payload is the pixel buffer itself.
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn read_to_cache(&self, session: &mut DecodeSession) -> Result<Bytes, DecodeError> {
        let expected = session.header().pixel_data_size();

        let mut pixels = BytesMut::zeroed(expected);
        session.read_payload_at(0, &mut pixels)?;
        Ok(pixels.freeze())
    }

    fn read_line(
        &self,
        session: &mut DecodeSession,
        y: u16,
        length: u16,
        buf: &mut [u8],
    ) -> Result<(), DecodeError> {
        let header = *session.header();
        if y >= header.height || length > header.width {
            return Err(DecodeError::LineOutOfBounds {
                y,
                length,
                width: header.width,
                height: header.height,
            });
        }

        let byte_len = length as usize * header.color_mode.bytes_per_pixel();
        if buf.len() < byte_len {
            return Err(DecodeError::Truncated {
                expected: byte_len,
                actual: buf.len(),
            });
        }

        let offset = y as usize * header.line_stride();
        session.read_payload_at(offset, &mut buf[..byte_len])
    }
}
