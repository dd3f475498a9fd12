//! Wire messages and length-prefixed framing.
//!
//! Every message in either direction is a frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | JSON payload (len bytes)  |
//! +----------------+---------------------------+
//! ```
//!
//! Payloads are internally tagged (`{"type":"submit_event", ...}`) so the
//! variant is self-describing. The protocol is one request and one response
//! per connection.

use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use maillog_core::Event;

use crate::error::TransportError;

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Largest payload accepted or produced (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Client → daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    SubmitEvent { event: Event },
    GetStatus,
}

/// Daemon → client. One variant per [`Request`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    SubmitEvent { success: bool },
    GetStatus { success: bool, events: Vec<Event> },
}

impl Response {
    /// The unsuccessful reply of the same variant.
    pub fn failure(&self) -> Response {
        match self {
            Response::SubmitEvent { .. } => Response::SubmitEvent { success: false },
            Response::GetStatus { .. } => Response::GetStatus {
                success: false,
                events: Vec::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Pure encode / decode
// ---------------------------------------------------------------------------

/// Serialize `message` and prepend its big-endian length.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(message).map_err(TransportError::Encode)?;
    check_len(payload.len())?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    // check_len guarantees the length fits in a u32.
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Deserialize a frame payload (without its prefix).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(payload).map_err(TransportError::Malformed)
}

fn check_len(len: usize) -> Result<usize, TransportError> {
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

fn map_read_err(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::UnexpectedEof => TransportError::ShortRead,
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(err),
    }
}

fn map_write_err(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(err),
    }
}

// ---------------------------------------------------------------------------
// Async codec (daemon side)
// ---------------------------------------------------------------------------

/// Length-prefixed JSON codec for `tokio_util::codec::Framed`.
///
/// Decodes frames into `T`; encodes any serializable message. The length
/// limit applies both ways.
#[derive(Debug)]
pub struct FrameCodec<T> {
    max_len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: max_len.min(MAX_FRAME_LEN),
            _marker: PhantomData,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn check_len(&self, len: usize) -> Result<usize, TransportError> {
        if len > self.max_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        Ok(len)
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FrameCodec<T> {
    fn clone(&self) -> Self {
        Self::with_max_len(self.max_len)
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, TransportError> {
        if src.len() < PREFIX_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        self.check_len(len)?;

        if src.len() < PREFIX_LEN + len {
            src.reserve(PREFIX_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(PREFIX_LEN);
        let payload = src.split_to(len);
        decode_payload(&payload).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<T>, TransportError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(TransportError::ShortRead),
        }
    }
}

impl<T, M: Serialize> Encoder<M> for FrameCodec<T> {
    type Error = TransportError;

    fn encode(&mut self, message: M, dst: &mut BytesMut) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(&message).map_err(TransportError::Encode)?;
        let len = self.check_len(payload.len())?;

        // Nothing is written on error, so the caller may encode a smaller reply.
        dst.reserve(PREFIX_LEN + len);
        dst.put_u32(len as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blocking (client side)
// ---------------------------------------------------------------------------

pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut prefix = [0u8; PREFIX_LEN];
    reader.read_exact(&mut prefix).map_err(map_read_err)?;
    let len = check_len(u32::from_be_bytes(prefix) as usize)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(map_read_err)?;
    Ok(payload)
}

pub fn write_frame_blocking<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), TransportError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).map_err(map_write_err)?;
    writer.flush().map_err(map_write_err)?;
    Ok(())
}
