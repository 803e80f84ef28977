//! Protocol module - wire format and frame assembly.
//!
//! This module implements the binary protocol, free of any I/O:
//! - 4-byte Big Endian length-prefix encoding/decoding
//! - Frame assembler for accumulating partial reads

mod assembler;
mod wire;

pub use assembler::{FrameAssembler, ReadState};
pub use wire::{
    declared_len, decode_progress, encode, extract_payload, DEFAULT_MAX_FRAME_LEN, PREFIX_LEN,
};
