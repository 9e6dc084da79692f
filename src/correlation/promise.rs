//! Single-assignment value cell shared between one writer and many waiters.
//!
//! A [`Promise`] is the write side, a [`Reply`] the read side. The first
//! call to [`Promise::keep`] wins; later calls are ignored.
//!
//! # Example
//!
//! ```
//! use io_transactor::correlation::promise_pair;
//! use io_transactor::protocol::CorrelationId;
//!
//! let (promise, reply) = promise_pair(CorrelationId(1));
//! let waiter = std::thread::spawn(move || reply.wait());
//!
//! assert!(promise.keep("done"));
//! assert_eq!(waiter.join().unwrap(), "done");
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::CorrelationId;

struct Shared<T> {
    id: CorrelationId,
    /// `None` while pending, `Some` once kept. Never reset.
    value: Mutex<Option<T>>,
    /// Unblocks all threads in `wait`.
    kept: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // The slot is written in a single assignment, so a poisoned lock
        // still guards a consistent value.
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write side of the pair.
pub struct Promise<T = Value> {
    shared: Arc<Shared<T>>,
}

/// Read side of the pair.
///
/// Cheap to clone; every clone observes the same value.
pub struct Reply<T = Value> {
    shared: Arc<Shared<T>>,
}

/// Create a pending promise and its reply handle.
pub fn promise_pair<T>(id: CorrelationId) -> (Promise<T>, Reply<T>) {
    let shared = Arc::new(Shared {
        id,
        value: Mutex::new(None),
        kept: Condvar::new(),
    });
    (
        Promise {
            shared: shared.clone(),
        },
        Reply { shared },
    )
}

impl<T> Promise<T> {
    /// Correlation id this promise answers.
    #[inline]
    pub fn id(&self) -> CorrelationId {
        self.shared.id
    }

    /// Keep the promise, waking every waiter.
    ///
    /// Returns `false` (and drops `value`) if it was already kept.
    pub fn keep(&self, value: T) -> bool {
        let mut slot = self.shared.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.shared.kept.notify_all();
        true
    }

    /// True iff. the promise has been kept.
    pub fn is_kept(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl<T> Reply<T> {
    /// Correlation id of the request this reply answers.
    #[inline]
    pub fn id(&self) -> CorrelationId {
        self.shared.id
    }

    /// True iff. the promise has been kept.
    pub fn is_kept(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl<T: Clone> Reply<T> {
    /// Block until the promise is kept, then return its value.
    ///
    /// Returns immediately if already kept. Blocks forever if the peer
    /// never answers; use [`Reply::wait_timeout`] to bound the wait.
    pub fn wait(&self) -> T {
        let mut slot = self.shared.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .shared
                .kept
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Reply::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .shared
                .kept
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The value if already kept, without blocking.
    pub fn try_peek(&self) -> Option<T> {
        self.shared.lock().clone()
    }
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("id", &self.shared.id)
            .field("kept", &self.is_kept())
            .finish()
    }
}
