//! Frame assembler for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management and tracks the read
//! state machine for one frame:
//! - `AwaitingPrefix`: fewer than 4 bytes buffered
//! - `AwaitingPayload`: prefix decoded, payload incomplete
//! - `FrameReady`: prefix + exactly `L` payload bytes buffered
//!
//! One assembler handles exactly one frame; the connection is
//! single-shot by design, so there is no multi-frame extraction loop.
//!
//! # Example
//!
//! ```
//! use framelink::protocol::{encode, FrameAssembler, ReadState};
//!
//! let mut assembler = FrameAssembler::new();
//! assert_eq!(assembler.state(), ReadState::AwaitingPrefix);
//!
//! assembler.extend_from_slice(&encode(b"ping"));
//! assert_eq!(assembler.state(), ReadState::FrameReady);
//! assert_eq!(&assembler.take_payload()[..], b"ping");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire::{self, DEFAULT_MAX_FRAME_LEN, PREFIX_LEN};
use crate::error::{FramelinkError, Result};

/// Read state for the in-progress frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Fewer than 4 bytes buffered.
    AwaitingPrefix,
    /// Prefix decoded, waiting for payload bytes.
    AwaitingPayload,
    /// A complete frame is buffered.
    FrameReady,
}

/// Buffer for assembling one incoming frame from fragmented reads.
pub struct FrameAssembler {
    /// Accumulated bytes (prefix + payload so far).
    buf: BytesMut,
    /// Maximum allowed declared payload length.
    max_frame_len: u32,
}

impl FrameAssembler {
    /// Create a new assembler with the default frame length limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a new assembler with a custom frame length limit.
    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(PREFIX_LEN),
            max_frame_len,
        }
    }

    /// Current read state, derived from the buffered bytes.
    pub fn state(&self) -> ReadState {
        match wire::declared_len(&self.buf) {
            None => ReadState::AwaitingPrefix,
            Some(_) if wire::decode_progress(&self.buf) > 0 => ReadState::AwaitingPayload,
            Some(_) => ReadState::FrameReady,
        }
    }

    /// How many more bytes the next read must supply, 0 when complete.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the decoded prefix declares a payload
    /// larger than the configured maximum. The check runs as soon as the
    /// prefix is readable, before any payload is buffered.
    pub fn bytes_needed(&self) -> Result<usize> {
        if let Some(declared) = wire::declared_len(&self.buf) {
            if declared > self.max_frame_len {
                return Err(FramelinkError::Protocol(format!(
                    "declared frame length {} exceeds maximum {}",
                    declared, self.max_frame_len
                )));
            }
        }
        Ok(wire::decode_progress(&self.buf))
    }

    /// Append bytes read from the socket.
    pub fn extend_from_slice(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes (prefix included).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the completed payload, resetting the assembler.
    ///
    /// Returns an empty `Bytes` if no complete frame is buffered.
    pub fn take_payload(&mut self) -> Bytes {
        if self.state() != ReadState::FrameReady {
            return Bytes::new();
        }
        let _ = self.buf.split_to(PREFIX_LEN);
        self.buf.split().freeze()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}
