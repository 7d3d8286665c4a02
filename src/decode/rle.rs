//! Decoder for run-length encoded payloads.
//!
//! The payload is a sequence of PackBits-shaped runs: a control byte `n`
//! below `0x80` copies the `n + 1` literal bytes that follow; `n` at or
//! above `0x80` repeats the single next byte `n - 0x7F` times. Decoding
//! must land exactly on the pixel size the header declares — anything
//! else is corruption.
//!
//! There is no random access into a run stream, so line reads are
//! refused; callers stream compressed sources by caching them first.

use bytes::{Bytes, BytesMut};

use crate::error::DecodeError;

use super::{DecodeSession, Decoder};

/// Decoder for containers with a run-length encoded payload.
pub struct RleDecoder;

impl Decoder for RleDecoder {
    fn read_to_cache(&self, session: &mut DecodeSession) -> Result<Bytes, DecodeError> {
        let expected = session.header().pixel_data_size();
        let encoded_len = session.payload_len()?;

        let mut encoded = vec![0u8; encoded_len];
        session.read_payload_at(0, &mut encoded)?;

        decode_runs(&encoded, expected).map(BytesMut::freeze)
    }

    fn read_line(
        &self,
        _session: &mut DecodeSession,
        _y: u16,
        _length: u16,
        _buf: &mut [u8],
    ) -> Result<(), DecodeError> {
        Err(DecodeError::LineUnsupported)
    }
}

/// Expand a run stream into exactly `expected` bytes.
///
/// A run that would overshoot `expected` is corruption; an input that
/// ends early is truncation. Errors drop the partial output buffer.
pub(crate) fn decode_runs(encoded: &[u8], expected: usize) -> Result<BytesMut, DecodeError> {
    let mut out = BytesMut::with_capacity(expected);
    let mut pos = 0;

    while pos < encoded.len() && out.len() < expected {
        let control = encoded[pos];
        if control < 0x80 {
            let run_len = control as usize + 1;
            let start = pos + 1;
            let end = start + run_len;
            if end > encoded.len() {
                return Err(DecodeError::Truncated {
                    expected,
                    actual: out.len(),
                });
            }
            if out.len() + run_len > expected {
                return Err(DecodeError::CorruptRun { offset: pos });
            }
            out.extend_from_slice(&encoded[start..end]);
            pos = end;
        } else {
            let repeat = control as usize - 0x7F;
            if pos + 1 >= encoded.len() {
                return Err(DecodeError::Truncated {
                    expected,
                    actual: out.len(),
                });
            }
            if out.len() + repeat > expected {
                return Err(DecodeError::CorruptRun { offset: pos });
            }
            let value = encoded[pos + 1];
            out.extend(std::iter::repeat(value).take(repeat));
            pos += 2;
        }
    }

    if out.len() != expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Encode bytes into the run stream the decoder expects.
///
/// Greedy: repeated bytes become repeat runs, everything else literal
/// runs. Used by fixture generation and the CLI, not by the cache core.
pub fn encode_runs(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        // Measure the repeat run at pos.
        let value = data[pos];
        let mut run = 1;
        while pos + run < data.len() && data[pos + run] == value && run < 128 {
            run += 1;
        }

        if run >= 2 {
            out.push(0x7F + run as u8);
            out.push(value);
            pos += run;
        } else {
            // Collect literals until the next repeat run (or 128 bytes).
            let start = pos;
            pos += 1;
            while pos < data.len() && pos - start < 128 {
                let ahead = data[pos];
                if pos + 1 < data.len() && data[pos + 1] == ahead {
                    break;
                }
                pos += 1;
            }
            out.push((pos - start - 1) as u8);
            out.extend_from_slice(&data[start..pos]);
        }
    }

    out
}
