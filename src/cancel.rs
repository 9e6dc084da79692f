//! Cancellation channel between the owner and the background loop.
//!
//! A level-triggered, single-shot stop signal. Once requested it stays
//! requested; the loop multiplexes [`CancelListener::requested`] with input
//! readiness so a blocked read never delays shutdown. The owner never
//! touches loop state and the loop never calls back into the owner.
//!
//! # Example
//!
//! ```
//! use io_transactor::cancel::cancel_channel;
//!
//! let (signal, listener) = cancel_channel();
//! assert!(!listener.is_requested());
//!
//! signal.request_stop();
//! signal.request_stop(); // harmless
//! assert!(listener.is_requested());
//! ```

use std::sync::Arc;

use tokio::sync::watch;

/// Create a fresh, unsignaled channel. One per run of the loop.
pub fn cancel_channel() -> (CancelSignal, CancelListener) {
    let (tx, rx) = watch::channel(false);
    (CancelSignal { tx: Arc::new(tx) }, CancelListener { rx })
}

/// Owner side. Cheap to clone.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// Ask the loop to stop. Idempotent.
    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    /// True once a stop has been requested.
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Loop side.
pub struct CancelListener {
    rx: watch::Receiver<bool>,
}

impl CancelListener {
    /// True once a stop has been requested. Non-blocking.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested, immediately if it already
    /// was. Also resolves if every [`CancelSignal`] is gone.
    ///
    /// Cancel safe.
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
