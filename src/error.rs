//! Error types for io-transactor.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by owner-supplied handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for all transactor operations.
#[derive(Debug, Error)]
pub enum TransactorError {
    /// I/O error while reading or writing the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound value that is not a valid envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An incomplete inbound value grew past the configured limit.
    #[error("Inbound value exceeds {limit} bytes without completing")]
    FrameTooLarge {
        /// The configured maximum.
        limit: usize,
    },

    /// A request or message handler returned an error.
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    /// A request or message handler panicked on the background thread.
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// The background loop is not running, so nothing can be sent.
    #[error("Transactor is not running")]
    NotRunning,

    /// The transactor was never started.
    #[error("Transactor was never started")]
    NotStarted,

    /// Too many outbound envelopes are queued.
    #[error("Outbound queue is full ({0} pending)")]
    Backpressure(usize),

    /// `send` was called on a transactor dispatching raw messages.
    #[error("send() requires envelope mode")]
    SendUnsupported,

    /// The custom transport was lost by a previous run and cannot be reopened.
    #[error("Transport is unavailable")]
    TransportUnavailable,

    /// `start` was called by a handler on the background loop.
    #[error("start() cannot be called from the background loop")]
    StartFromLoop,

    /// Failed to set up the background thread or its runtime.
    #[error("Setup failed: {0}")]
    Setup(#[source] std::io::Error),

    /// The background loop terminated abnormally.
    #[error("Background loop failed: {0}")]
    LoopFailed(#[source] Arc<TransactorError>),
}

impl TransactorError {
    /// Wrap an owner handler error.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        TransactorError::Handler(err.into())
    }
}

/// Result type alias using TransactorError.
pub type Result<T> = std::result::Result<T, TransactorError>;
