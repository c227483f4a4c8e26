//! Tunnel stream framing
//!
//! Every unit of link-layer traffic on the tunnel is carried as a frame: a
//! 4-byte big-endian payload length followed by the payload bytes.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Largest declared length the decoder accepts before treating the stream as corrupt
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer holds {available} bytes, frame header needs {HEADER_SIZE}")]
    IncompleteHeader { available: usize },

    #[error("frame declares {declared} payload bytes but only {available} are buffered")]
    Truncated { declared: u32, available: usize },

    #[error("frame declares {declared} payload bytes, limit is {MAX_FRAME_LEN}")]
    Oversized { declared: u32 },
}

/// Frame a payload for the tunnel
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split `data` into chunks of at most `mtu` bytes and frame each one
pub fn encode_chunked(data: &[u8], mtu: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
    data.chunks(mtu.max(1)).map(encode)
}

/// Decode the frame at the start of `buf`
///
/// Returns the declared length and the payload slice. Any bytes after the
/// payload are left untouched.
pub fn decode(buf: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::IncompleteHeader {
            available: buf.len(),
        });
    }

    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let end = usize::try_from(declared)
        .ok()
        .and_then(|len| len.checked_add(HEADER_SIZE))
        .ok_or(FrameError::Oversized { declared })?;
    if buf.len() < end {
        return Err(FrameError::Truncated {
            declared,
            available: buf.len() - HEADER_SIZE,
        });
    }

    Ok((declared, &buf[HEADER_SIZE..end]))
}

/// Incremental frame reassembler for the inbound tunnel stream
///
/// Reads from the TLS stream do not line up with frame boundaries, so bytes
/// are buffered until a whole frame is available.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    frames: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the tunnel
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete payload, or `None` until more bytes arrive
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let header = decode(&self.buf).map(|(declared, _)| declared);
        match header {
            Ok(declared) => {
                self.buf.advance(HEADER_SIZE);
                self.frames += 1;
                Ok(Some(self.buf.split_to(declared as usize).freeze()))
            }
            Err(FrameError::Truncated { declared, .. }) if declared as usize > MAX_FRAME_LEN => {
                Err(FrameError::Oversized { declared })
            }
            Err(FrameError::IncompleteHeader { .. }) | Err(FrameError::Truncated { .. }) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of frames decoded so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }
}
