//! Correlation registry: makes promises for outbound requests and keeps
//! them when the matching response arrives.
//!
//! Ids start at a nominal value (so they don't collide with the small ids a
//! human types while testing by hand) and increase by one per request.
//!
//! # Example
//!
//! ```
//! use io_transactor::correlation::Correlations;
//! use serde_json::json;
//!
//! let registry = Correlations::new();
//! let reply = registry.make_promise();
//! assert_eq!(reply.id().0, 100001);
//!
//! assert!(registry.keep(reply.id(), json!({"a": 2})));
//! assert_eq!(reply.wait(), json!({"a": 2}));
//!
//! // Stale or unknown ids are dropped.
//! assert!(!registry.keep(reply.id(), json!(null)));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::promise::{promise_pair, Promise, Reply};
use crate::protocol::CorrelationId;

/// First id issued by a default registry.
pub const DEFAULT_FIRST_ID: CorrelationId = CorrelationId(100001);

struct Table {
    /// The id of the next promise we will make.
    next_id: CorrelationId,
    /// Promises made but not yet kept.
    pending: HashMap<CorrelationId, Promise<Value>>,
}

/// Registry mapping pending correlation ids to their promises.
///
/// Safe to share between the owner's threads (making promises) and the
/// background loop (keeping them).
pub struct Correlations {
    table: Mutex<Table>,
}

impl Correlations {
    /// Create a registry issuing ids from [`DEFAULT_FIRST_ID`].
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_FIRST_ID)
    }

    /// Create a registry issuing ids from `first`.
    pub fn starting_at(first: CorrelationId) -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: first,
                pending: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and register a pending promise under it.
    pub fn make_promise(&self) -> Reply<Value> {
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id = id.next();

        let (promise, reply) = promise_pair(id);
        table.pending.insert(id, promise);
        reply
    }

    /// Keep the promise registered under `id`.
    ///
    /// The entry is removed in the same critical section as the lookup, so
    /// a promise can't be kept twice. Returns `false` for an unknown id.
    pub fn keep(&self, id: CorrelationId, value: Value) -> bool {
        let promise = self.lock().pending.remove(&id);
        match promise {
            Some(promise) => promise.keep(value),
            None => false,
        }
    }

    /// Drop a pending promise without keeping it.
    ///
    /// Waiters on the matching [`Reply`] will never be woken; use this after
    /// giving up on a request. Returns `false` if nothing was pending.
    pub fn forget(&self, id: CorrelationId) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    /// Number of promises still pending.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// The id the next promise will get.
    pub fn next_id(&self) -> CorrelationId {
        self.lock().next_id
    }
}

impl Default for Correlations {
    fn default() -> Self {
        Self::new()
    }
}
