//! Transport module - the byte streams the background loop owns.
//!
//! Provides:
//! - [`Transport::stdio`] - standard input/output (the default)
//! - [`Transport::new`] - any `AsyncRead`/`AsyncWrite` pair, e.g. a
//!   `tokio::io::duplex` pipe in tests
//!
//! A transport moves into the background thread on `start()` and comes back
//! when the loop exits, together with any bytes already read but not yet
//! parsed, so a restarted loop resumes where the last one stopped.

mod stdio;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::FrameBuffer;

/// Boxed input stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed output stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Input and output streams plus the input's parse buffer.
pub struct Transport {
    pub(crate) reader: BoxReader,
    pub(crate) writer: BoxWriter,
    pub(crate) frames: FrameBuffer,
}

impl Transport {
    /// Wrap an arbitrary reader/writer pair.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            frames: FrameBuffer::new(),
        }
    }

    /// Number of input bytes read but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("buffered", &self.frames.len())
            .finish_non_exhaustive()
    }
}
