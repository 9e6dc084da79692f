//! Message handlers for the single-direction mode.
//!
//! Every inbound JSON value is handed to the handler as-is, with no
//! envelope decoding. The returned [`Flow`] decides what is written back and
//! whether the loop keeps running.

use std::marker::PhantomData;

use serde_json::Value;

use super::request::HandlerResult;
use crate::error::BoxError;

/// What the loop does after a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Write the value as a reply and keep reading.
    Continue(Value),
    /// End the session cleanly without writing anything.
    Stop,
}

/// Sees each inbound value and decides whether the session continues.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. An error ends the session.
    fn on_message(&self, msg: Value) -> HandlerResult<Flow>;
}

/// Adapts a closure into a [`MessageHandler`].
pub struct MessageFn<F, E> {
    handler: F,
    _phantom: PhantomData<fn() -> E>,
}

impl<F, E> MessageFn<F, E>
where
    F: Fn(Value) -> Result<Flow, E> + Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, E> MessageHandler for MessageFn<F, E>
where
    F: Fn(Value) -> Result<Flow, E> + Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    fn on_message(&self, msg: Value) -> HandlerResult<Flow> {
        (self.handler)(msg).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exit_on_cmd() -> MessageFn<impl Fn(Value) -> Result<Flow, BoxError>, BoxError> {
        MessageFn::new(|msg: Value| {
            if msg["cmd"] == "exit" {
                return Ok(Flow::Stop);
            }
            Ok(Flow::Continue(msg))
        })
    }

    #[test]
    fn test_continue_echoes() {
        let handler = exit_on_cmd();
        assert_eq!(
            handler.on_message(json!({"cmd": "ping"})).unwrap(),
            Flow::Continue(json!({"cmd": "ping"}))
        );
    }

    #[test]
    fn test_stop() {
        let handler = exit_on_cmd();
        assert_eq!(handler.on_message(json!({"cmd": "exit"})).unwrap(), Flow::Stop);
    }

    #[test]
    fn test_error() {
        let handler = MessageFn::new(|_| Err::<Flow, _>("nope"));
        assert_eq!(handler.on_message(json!(1)).unwrap_err().to_string(), "nope");
    }
}
