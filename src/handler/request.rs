//! Request handlers for envelope mode.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::BoxError;

/// Result type for handler functions.
pub type HandlerResult<T> = std::result::Result<T, BoxError>;

/// Answers an inbound request body with a response body.
///
/// Implement this on your own type when the handler carries state; use
/// [`TypedHandler`] to wrap a closure.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request. An error ends the session.
    fn on_request(&self, body: Value) -> HandlerResult<Value>;
}

/// Wrapper that deserializes the body before calling the closure and
/// serializes what it returns.
///
/// A body that doesn't deserialize into `T` is a handler error.
pub struct TypedHandler<F, T, R, E> {
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, E)>,
}

impl<F, T, R, E> TypedHandler<F, T, R, E>
where
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
    E: Into<BoxError> + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, E> RequestHandler for TypedHandler<F, T, R, E>
where
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
    E: Into<BoxError> + 'static,
{
    fn on_request(&self, body: Value) -> HandlerResult<Value> {
        let parsed: T = serde_json::from_value(body)?;
        let reply = match (self.handler)(parsed) {
            Ok(reply) => reply,
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::to_value(reply)?)
    }
}

/// Answers every request with its own body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl RequestHandler for Echo {
    fn on_request(&self, body: Value) -> HandlerResult<Value> {
        Ok(body)
    }
}
