//! Frame buffer for accumulating partial reads of a JSON value stream.
//!
//! Uses `bytes::BytesMut` for buffer management. Values may be separated by
//! newlines or simply concatenated; any self-delimiting JSON sequence is
//! accepted. Bytes that do not parse as JSON are reported as
//! [`Frame::Garbage`] and skipped through the end of the line the parser
//! failed on, so the stream can resynchronize.
//!
//! # Example
//!
//! ```
//! use io_transactor::protocol::{Frame, FrameBuffer};
//! use serde_json::json;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the input stream
//! assert!(buffer.push(b"{\"op\":").unwrap().is_empty());
//! let frames = buffer.push(b"\"stop\"}\n").unwrap();
//!
//! assert_eq!(frames, vec![Frame::Value(json!({"op": "stop"}))]);
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;

use crate::error::{Result, TransactorError};

/// Default maximum size of a single inbound value (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One unit extracted from the input stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete JSON value.
    Value(Value),
    /// Bytes that are not JSON, with the parser's complaint.
    Garbage(String),
}

/// Buffer for accumulating incoming bytes and extracting complete values.
pub struct FrameBuffer {
    /// Accumulated bytes from reads.
    buffer: BytesMut,
    /// Newlines still to discard after garbage.
    skip_lines: usize,
    /// Progress through the value at the front of the buffer.
    scan: Scan,
    /// Maximum allowed size of a value still being received.
    max_frame_size: usize,
    #[cfg(test)]
    parse_attempts: usize,
}

/// Tracks nesting over bytes already seen so a partial value is only
/// re-parsed when new input could complete it.
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    /// Bytes of the buffer already scanned; 0 means never parsed.
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Advance over `bytes`, returning true if a value may have ended or
    /// a line was completed.
    fn feed(&mut self, bytes: &[u8]) -> bool {
        let mut boundary = false;
        for &b in bytes {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    boundary |= self.depth == 0;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    boundary |= self.depth == 0;
                }
                b'\n' => boundary = true,
                b if b.is_ascii_whitespace() => boundary |= self.depth == 0,
                _ => {}
            }
        }
        self.pos += bytes.len();
        boundary
    }
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            skip_lines: 0,
            scan: Scan::default(),
            max_frame_size,
            #[cfg(test)]
            parse_attempts: 0,
        }
    }

    /// Change the limit for values still being received.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns [`TransactorError::FrameTooLarge`] if an incomplete value
    /// outgrows the limit.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a value (or garbage) was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the pending value is too large
    ///
    /// A partial value is parsed again only once a newline or a closing
    /// bracket or quote at the top level arrives, so a large value costs
    /// one scan of each chunk rather than a parse per read.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.skip_lines > 0 && !self.discard_lines() {
            return Ok(None);
        }
        if !self.skip_whitespace() {
            return Ok(None);
        }

        let fresh = self.scan.pos == 0;
        let start = self.scan.pos.min(self.buffer.len());
        let boundary = self.scan.feed(&self.buffer[start..]);
        if !fresh && !boundary {
            return self.need_more();
        }

        #[cfg(test)]
        {
            self.parse_attempts += 1;
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                // A number running into the end of the buffer may still grow.
                if value.is_number() && consumed == self.buffer.len() {
                    return self.need_more();
                }
                self.consume(consumed);
                Ok(Some(Frame::Value(value)))
            }
            Some(Err(e)) if e.is_eof() => self.need_more(),
            Some(Err(e)) => {
                // Discard through the end of the line the error is on.
                self.skip_lines = e.line().max(1);
                self.scan = Scan::default();
                Ok(Some(Frame::Garbage(e.to_string())))
            }
            None => Ok(None),
        }
    }

    /// Drain what remains once the input has reached end of stream.
    ///
    /// A trailing number is accepted as complete; anything unparseable is
    /// returned as garbage. Call until it returns `None`.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.skip_lines > 0 && !self.discard_lines() {
            return None;
        }
        if !self.skip_whitespace() {
            return None;
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.consume(consumed);
                Some(Frame::Value(value))
            }
            Some(Err(e)) => {
                self.clear();
                Some(Frame::Garbage(e.to_string()))
            }
            None => None,
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.skip_lines = 0;
        self.scan = Scan::default();
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
        self.scan = Scan::default();
    }

    fn need_more(&self) -> Result<Option<Frame>> {
        if self.buffer.len() > self.max_frame_size {
            return Err(TransactorError::FrameTooLarge {
                limit: self.max_frame_size,
            });
        }
        Ok(None)
    }

    /// Returns false if the last line to discard hasn't ended yet.
    fn discard_lines(&mut self) -> bool {
        let mut from = 0;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            self.skip_lines -= 1;
            if self.skip_lines == 0 {
                self.consume(end + 1);
                return true;
            }
            from = end + 1;
        }
        self.buffer.clear();
        false
    }

    /// Returns false if nothing but whitespace is buffered.
    fn skip_whitespace(&mut self) -> bool {
        match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(0) => true,
            Some(start) => {
                self.consume(start);
                true
            }
            None => {
                self.buffer.clear();
                self.scan = Scan::default();
                false
            }
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(frames: Vec<Frame>) -> Vec<Value> {
        frames
            .into_iter()
            .map(|f| match f {
                Frame::Value(v) => v,
                Frame::Garbage(e) => panic!("unexpected garbage: {}", e),
            })
            .collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"{\"op\":\"stop\"}\n").unwrap();

        assert_eq!(values(frames), vec![json!({"op": "stop"})]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_values_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"{\"a\":1}\n[2]\n\"three\"\n").unwrap();

        assert_eq!(values(frames), vec![json!({"a": 1}), json!([2]), json!("three")]);
    }

    #[test]
    fn test_concatenated_values_without_newlines() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"{\"a\":1}{\"b\":2}  {\"c\":3}").unwrap();

        assert_eq!(values(frames), vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]);
    }

    #[test]
    fn test_fragmented_value() {
        let mut buffer = FrameBuffer::new();
        let bytes = b"{\"op\":\"request\",\"id\":1,\"body\":{\"x\":1}}\n";

        assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
        assert!(buffer.push(&bytes[5..20]).unwrap().is_empty());
        assert_eq!(buffer.len(), 20);

        let frames = buffer.push(&bytes[20..]).unwrap();
        assert_eq!(
            values(frames),
            vec![json!({"op": "request", "id": 1, "body": {"x": 1}})]
        );
    }

    #[test]
    fn test_number_waits_for_delimiter() {
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(b"4").unwrap().is_empty());
        assert!(buffer.push(b"2").unwrap().is_empty());

        let frames = buffer.push(b"\n").unwrap();
        assert_eq!(values(frames), vec![json!(42)]);
    }

    #[test]
    fn test_finish_accepts_trailing_number() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"17").unwrap().is_empty());

        assert_eq!(buffer.finish(), Some(Frame::Value(json!(17))));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_finish_reports_truncated_value() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"{\"op\":").unwrap().is_empty());

        assert!(matches!(buffer.finish(), Some(Frame::Garbage(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_garbage_skips_to_next_line() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"not json at all {\"a\":1}\n{\"b\":2}\n").unwrap();

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Garbage(_)));
        assert_eq!(frames[1], Frame::Value(json!({"b": 2})));
    }

    #[test]
    fn test_garbage_line_split_across_pushes() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(b"oops {\"a\"").unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Garbage(_)));

        // Still inside the bad line.
        assert!(buffer.push(b":1}").unwrap().is_empty());

        let frames = buffer.push(b"\n[1]\n").unwrap();
        assert_eq!(values(frames), vec![json!([1])]);
    }

    #[test]
    fn test_garbage_skips_through_error_line() {
        let mut buffer = FrameBuffer::new();
        // The value breaks on its third line; the complete-looking second
        // line belongs to it and must not be read on its own.
        let frames = buffer
            .push(b"{\"a\":\n{\"op\":\"stop\"}\n oops\n{\"b\":2}\n")
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Garbage(_)));
        assert_eq!(frames[1], Frame::Value(json!({"b": 2})));
    }

    #[test]
    fn test_error_line_split_across_pushes() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"[1,\n[2]\n").unwrap().is_empty());

        let frames = buffer.push(b"x\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Garbage(_)));

        let frames = buffer.push(b"[3]\n").unwrap();
        assert_eq!(values(frames), vec![json!([3])]);
    }

    #[test]
    fn test_large_value_parsed_once_complete() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"{\"items\":[").unwrap().is_empty());
        for i in 0..1000 {
            let chunk = format!("{{\"n\":{},\"s\":\"x}}]\\\"\"}},", i);
            assert!(buffer.push(chunk.as_bytes()).unwrap().is_empty());
        }
        let frames = buffer.push(b"null]}\n").unwrap();

        let parsed = values(frames);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["items"].as_array().unwrap().len(), 1001);
        assert_eq!(parsed[0]["items"][999]["s"], "x}]\"");
        // One attempt on the first chunk, one once the closing brace arrives.
        assert_eq!(buffer.parse_attempts, 2);
    }

    #[test]
    fn test_concatenated_values_across_pushes() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"{\"a\":").unwrap().is_empty());

        let frames = buffer.push(b"1}{\"b\"").unwrap();
        assert_eq!(values(frames), vec![json!({"a": 1})]);

        let frames = buffer.push(b":2}").unwrap();
        assert_eq!(values(frames), vec![json!({"b": 2})]);
    }

    #[test]
    fn test_whitespace_only() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"  \n\r\n\t").unwrap().is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buffer = FrameBuffer::with_max_frame_size(16);
        let result = buffer.push(b"{\"key\":\"a long unterminated string");

        assert!(matches!(
            result,
            Err(TransactorError::FrameTooLarge { limit: 16 })
        ));
    }

    #[test]
    fn test_complete_value_over_limit_is_accepted() {
        // The limit only bounds values still being received.
        let mut buffer = FrameBuffer::with_max_frame_size(4);
        let frames = buffer.push(b"[1,2,3,4,5]\n").unwrap();
        assert_eq!(values(frames), vec![json!([1, 2, 3, 4, 5])]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new();
        buffer.push(b"junk").unwrap();
        buffer.clear();

        let frames = buffer.push(b"{}\n").unwrap();
        assert_eq!(values(frames), vec![json!({})]);
    }
}
