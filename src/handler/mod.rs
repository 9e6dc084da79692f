//! Handler module - the owner's extension points.
//!
//! Provides:
//! - [`RequestHandler`] - answers inbound `request` envelopes
//! - [`MessageHandler`] - sees every inbound value and decides whether the
//!   session keeps running
//!
//! Handlers run on the background loop's thread, one call at a time. A
//! handler that blocks stalls all other traffic.
//!
//! # Example
//!
//! ```
//! use io_transactor::handler::{RequestHandler, TypedHandler};
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Add { a: i64, b: i64 }
//!
//! #[derive(Serialize)]
//! struct Sum { sum: i64 }
//!
//! let handler = TypedHandler::new(|req: Add| Ok::<_, std::io::Error>(Sum { sum: req.a + req.b }));
//! let reply = handler.on_request(json!({"a": 2, "b": 3})).unwrap();
//! assert_eq!(reply, json!({"sum": 5}));
//! ```

mod message;
mod request;

pub use message::{Flow, MessageFn, MessageHandler};
pub use request::{Echo, HandlerResult, RequestHandler, TypedHandler};
