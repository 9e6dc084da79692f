//! # io-transactor
//!
//! Transact correlated JSON requests and replies with a single peer over
//! standard input/output.
//!
//! A background thread owns the streams. It answers the peer's requests
//! through an owner-supplied handler and routes the peer's responses to the
//! promises created by [`Transactor::send`]. Stopping is always prompt: the
//! loop waits on a cancellation channel alongside input readiness.
//!
//! ## Wire format
//!
//! One JSON value per line:
//!
//! ```text
//! {"op":"request","id":100001,"body":<any JSON>}
//! {"op":"response","id":100001,"body":<any JSON>}
//! {"op":"stop"}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use io_transactor::Transactor;
//! use serde_json::Value;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transactor = Transactor::builder()
//!         .on_request(|body: Value| Ok::<_, std::io::Error>(body))
//!         .start()?;
//!
//!     // Returns when the peer sends {"op":"stop"} or closes stdin.
//!     transactor.wait_until_exited()?;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod transactor;
mod worker;

pub use correlation::Reply;
pub use error::{Result, TransactorError};
pub use handler::{Flow, MessageHandler, RequestHandler};
pub use protocol::{CorrelationId, Envelope};
pub use transactor::{Transactor, TransactorBuilder, TransactorConfig, DEFAULT_READ_BUFFER_SIZE};
pub use worker::{WorkerState, THREAD_NAME};
