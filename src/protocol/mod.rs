//! Protocol module - envelope codec and stream framing.
//!
//! This module implements the text protocol spoken with the peer:
//! - `{op, id, body}` envelope encoding/decoding
//! - Frame buffer for extracting JSON values from partial reads

mod envelope;
mod frame_buffer;

pub use envelope::{value_to_line, CorrelationId, Envelope, Op};
pub use frame_buffer::{Frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
