//! The `{op, id, body}` envelope exchanged with the peer.
//!
//! Canonical encodings, one per line:
//!
//! ```text
//! {"op":"request","id":100001,"body":<any JSON>}
//! {"op":"response","id":100001,"body":<any JSON>}
//! {"op":"stop"}
//! ```
//!
//! # Example
//!
//! ```
//! use io_transactor::protocol::{CorrelationId, Envelope};
//! use serde_json::json;
//!
//! let env = Envelope::decode(json!({"op": "request", "id": 7, "body": [1, 2]})).unwrap();
//! assert_eq!(env, Envelope::Request { id: CorrelationId(7), body: json!([1, 2]) });
//!
//! let line = env.to_line().unwrap();
//! assert_eq!(&line[..], b"{\"op\":\"request\",\"id\":7,\"body\":[1,2]}\n");
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, TransactorError};

/// Integer tying a `response` envelope to the `request` that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub i64);

impl CorrelationId {
    /// The id that follows this one.
    #[inline]
    pub fn next(self) -> Self {
        CorrelationId(self.0 + 1)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Operation code carried in the `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Request,
    Response,
    Stop,
}

impl Op {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Request => "request",
            Op::Response => "response",
            Op::Stop => "stop",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire envelope.
///
/// Field order of the derived `Serialize` impl is the canonical wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Envelope {
    /// The peer asks us (or we ask the peer) for an answer.
    Request { id: CorrelationId, body: Value },
    /// Answer to a request with the same id.
    Response { id: CorrelationId, body: Value },
    /// End the session.
    Stop,
}

impl Envelope {
    /// Decode an envelope from a parsed JSON value.
    ///
    /// Non-objects, a missing or unknown `op`, and (except for `stop`) a
    /// missing `body` or non-integer `id` are all reported as
    /// [`TransactorError::MalformedEnvelope`].
    pub fn decode(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(TransactorError::MalformedEnvelope(format!(
                "expected an object, got {}",
                kind_of(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| TransactorError::MalformedEnvelope(e.to_string()))
    }

    /// Structural encoding as a JSON value.
    ///
    /// Object keys in a [`Value`] carry no order; use [`Envelope::to_line`]
    /// for the canonical byte form.
    pub fn encode(&self) -> Value {
        match self {
            Envelope::Request { id, body } => json!({ "op": "request", "id": id, "body": body }),
            Envelope::Response { id, body } => json!({ "op": "response", "id": id, "body": body }),
            Envelope::Stop => json!({ "op": "stop" }),
        }
    }

    /// Serialize to the canonical `{op, id, body}` byte form with a
    /// trailing newline.
    pub fn to_line(&self) -> Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// The operation code.
    pub fn op(&self) -> Op {
        match self {
            Envelope::Request { .. } => Op::Request,
            Envelope::Response { .. } => Op::Response,
            Envelope::Stop => Op::Stop,
        }
    }

    /// The correlation id, absent for `stop`.
    pub fn id(&self) -> Option<CorrelationId> {
        match self {
            Envelope::Request { id, .. } | Envelope::Response { id, .. } => Some(*id),
            Envelope::Stop => None,
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Serialize any JSON value as a single newline-terminated line.
pub fn value_to_line(value: &Value) -> Result<Bytes> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}
