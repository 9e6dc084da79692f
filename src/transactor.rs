//! Transactor builder and owner-facing lifecycle.
//!
//! The [`TransactorBuilder`] provides a fluent API for choosing the handler,
//! transport and limits. The [`Transactor`] manages the lifecycle:
//! 1. `start()` spawns the background loop on its own thread
//! 2. the loop answers requests and keeps promises for `send()`
//! 3. `stop()` signals the cancellation channel and joins the thread
//!
//! # Example
//!
//! ```no_run
//! use io_transactor::Transactor;
//! use serde_json::{json, Value};
//!
//! let transactor = Transactor::builder()
//!     .on_request(|body: Value| Ok::<_, std::io::Error>(json!({ "echo": body })))
//!     .start()?;
//!
//! // Ask the peer something and block for the answer.
//! let answer = transactor.send(json!({"q": 1}))?.wait();
//! println!("{}", answer);
//!
//! transactor.stop();
//! # Ok::<(), io_transactor::TransactorError>(())
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cancel::{cancel_channel, CancelSignal};
use crate::correlation::{Correlations, Reply, DEFAULT_FIRST_ID};
use crate::error::{BoxError, Result, TransactorError};
use crate::handler::{Echo, Flow, MessageFn, MessageHandler, RequestHandler, TypedHandler};
use crate::protocol::{CorrelationId, Envelope, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::Transport;
use crate::worker::{Dispatch, ExitLatch, Worker, WorkerState};
use crate::writer::{outbound_queue, OutboundLine, WriterHandle, DEFAULT_MAX_PENDING_WRITES};

/// Default size of each read from the input stream.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Tunables for a transactor.
#[derive(Debug, Clone)]
pub struct TransactorConfig {
    /// First correlation id issued by `send`.
    pub first_correlation_id: CorrelationId,
    /// Bytes requested per read from the input stream.
    pub read_buffer_size: usize,
    /// Largest inbound value that may be buffered while incomplete.
    pub max_frame_size: usize,
    /// Lines `send` may queue before it is refused.
    pub max_pending_writes: usize,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            first_correlation_id: DEFAULT_FIRST_ID,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_pending_writes: DEFAULT_MAX_PENDING_WRITES,
        }
    }
}

/// Builder for configuring and creating a [`Transactor`].
pub struct TransactorBuilder {
    config: TransactorConfig,
    dispatch: Option<Dispatch>,
    transport: Option<Transport>,
}

impl TransactorBuilder {
    /// Create a new builder: stdio transport, echo handler, default limits.
    pub fn new() -> Self {
        Self {
            config: TransactorConfig::default(),
            dispatch: None,
            transport: None,
        }
    }

    /// Answer inbound requests with a closure.
    ///
    /// The body is deserialized into `T` and the result serialized back;
    /// use `serde_json::Value` for both to work with raw JSON.
    pub fn on_request<F, T, R, E>(self, handler: F) -> Self
    where
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
        E: Into<BoxError> + 'static,
    {
        self.request_handler(TypedHandler::new(handler))
    }

    /// Answer inbound requests with a handler object.
    pub fn request_handler(mut self, handler: impl RequestHandler) -> Self {
        self.dispatch = Some(Dispatch::Envelope(Box::new(handler)));
        self
    }

    /// Skip envelope decoding and hand every inbound value to a closure.
    ///
    /// A transactor in this mode cannot `send`.
    pub fn on_message<F, E>(self, handler: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Flow, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        self.message_handler(MessageFn::new(handler))
    }

    /// Skip envelope decoding and hand every inbound value to a handler.
    pub fn message_handler(mut self, handler: impl MessageHandler) -> Self {
        self.dispatch = Some(Dispatch::Message(Box::new(handler)));
        self
    }

    /// Use the given streams instead of stdin/stdout.
    pub fn transport<R, W>(mut self, reader: R, writer: W) -> Self
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        self.transport = Some(Transport::new(reader, writer));
        self
    }

    /// Set the first correlation id issued by `send`.
    ///
    /// Default: 100001
    pub fn first_correlation_id(mut self, id: i64) -> Self {
        self.config.first_correlation_id = CorrelationId(id);
        self
    }

    /// Set the size of each read from the input stream.
    ///
    /// Default: 64KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the largest incomplete inbound value that may be buffered.
    ///
    /// Exceeding it ends the session with
    /// [`TransactorError::FrameTooLarge`]. Default: 16MB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set how many lines `send` may queue.
    ///
    /// Default: 1024
    pub fn max_pending_writes(mut self, limit: usize) -> Self {
        self.config.max_pending_writes = limit;
        self
    }

    /// Build without starting.
    pub fn build(self) -> Transactor {
        let reopen_stdio = self.transport.is_none();
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| Dispatch::Envelope(Box::new(Echo)));

        Transactor {
            correlations: Arc::new(Correlations::starting_at(self.config.first_correlation_id)),
            config: self.config,
            dispatch: Arc::new(dispatch),
            latch: Arc::new(ExitLatch::new()),
            transport: Arc::new(Mutex::new(self.transport)),
            reopen_stdio,
            outbound: Mutex::new(None),
            signal: Mutex::new(None),
            join_handle: Mutex::new(None),
        }
    }

    /// Build and start.
    pub fn start(self) -> Result<Transactor> {
        let transactor = self.build();
        transactor.start()?;
        Ok(transactor)
    }
}

impl Default for TransactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reaches the current loop without waiting on a join.
struct LoopSignal {
    thread: ThreadId,
    cancel: CancelSignal,
}

/// Transacts JSON requests and replies with a single peer.
///
/// All methods take `&self`; share it between threads with an `Arc`.
/// Dropping the transactor stops it.
pub struct Transactor {
    config: TransactorConfig,
    dispatch: Arc<Dispatch>,
    correlations: Arc<Correlations>,
    latch: Arc<ExitLatch>,
    /// Parked here between runs.
    transport: Arc<Mutex<Option<Transport>>>,
    /// Whether a missing transport may be replaced by stdio.
    reopen_stdio: bool,
    /// Queue into the running loop; `None` when stopped.
    outbound: Mutex<Option<WriterHandle>>,
    /// Set from spawn until the thread is joined. Never held across a join,
    /// so the loop itself can always reach it.
    signal: Mutex<Option<LoopSignal>>,
    /// Serializes start/stop on owner threads and is held while joining.
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transactor {
    /// Create a new builder.
    pub fn builder() -> TransactorBuilder {
        TransactorBuilder::new()
    }

    /// Start the background loop.
    ///
    /// A running loop is stopped first, so this doubles as restart. Returns
    /// as soon as the thread is spawned.
    ///
    /// # Errors
    ///
    /// [`TransactorError::Setup`] if the runtime or thread can't be
    /// created, [`TransactorError::TransportUnavailable`] if a custom
    /// transport was lost, [`TransactorError::StartFromLoop`] if called
    /// from a handler.
    pub fn start(&self) -> Result<()> {
        if self.on_loop_thread() {
            return Err(TransactorError::StartFromLoop);
        }
        let mut join_handle = lock(&self.join_handle);
        self.stop_locked(&mut join_handle);

        {
            let mut slot = lock(&self.transport);
            if slot.is_none() {
                if !self.reopen_stdio {
                    return Err(TransactorError::TransportUnavailable);
                }
                *slot = Some(Transport::stdio());
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransactorError::Setup)?;

        let (cancel, listener) = cancel_channel();
        let (writer, queue) = outbound_queue(self.config.max_pending_writes);
        let worker = Worker {
            dispatch: self.dispatch.clone(),
            correlations: self.correlations.clone(),
            cancel: listener,
            outbound: queue,
            read_buffer_size: self.config.read_buffer_size,
            max_frame_size: self.config.max_frame_size,
        };

        self.latch.begin();
        let thread = match worker.spawn(runtime, self.transport.clone(), self.latch.clone()) {
            Ok(thread) => thread,
            Err(e) => {
                self.latch.abort();
                return Err(TransactorError::Setup(e));
            }
        };

        *lock(&self.outbound) = Some(writer);
        *lock(&self.signal) = Some(LoopSignal {
            thread: thread.thread().id(),
            cancel,
        });
        *join_handle = Some(thread);
        Ok(())
    }

    /// Stop the background loop and wait for its thread to finish.
    ///
    /// No-op if not running. Returns even if the loop is blocked waiting
    /// for input. Called from inside a handler it only requests the stop,
    /// since the loop can't join itself; this holds even while an owner
    /// thread is stopping the same loop.
    pub fn stop(&self) {
        if self.request_stop_from_loop() {
            return;
        }
        let mut join_handle = lock(&self.join_handle);
        self.stop_locked(&mut join_handle);
    }

    fn on_loop_thread(&self) -> bool {
        lock(&self.signal)
            .as_ref()
            .is_some_and(|signal| signal.thread == thread::current().id())
    }

    /// Signal the loop if called on its own thread. Never touches the join
    /// lock.
    fn request_stop_from_loop(&self) -> bool {
        match &*lock(&self.signal) {
            Some(signal) if signal.thread == thread::current().id() => {
                signal.cancel.request_stop();
                true
            }
            _ => false,
        }
    }

    fn stop_locked(&self, join_handle: &mut Option<JoinHandle<()>>) {
        let Some(handle) = join_handle.take() else {
            return;
        };

        *lock(&self.outbound) = None;
        if let Some(signal) = lock(&self.signal).as_ref() {
            signal.cancel.request_stop();
        }

        // Only reachable from a handler that ran before `start` published
        // the signal.
        if handle.thread().id() == thread::current().id() {
            *join_handle = Some(handle);
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Background thread panicked outside the loop");
        }
        *lock(&self.signal) = None;
    }

    /// True while a loop thread has been started and not yet joined.
    ///
    /// The loop may already have exited on its own; see [`Self::has_exited`].
    pub fn is_running(&self) -> bool {
        lock(&self.signal).is_some()
    }

    /// True iff. the background loop has exited.
    ///
    /// # Errors
    ///
    /// [`TransactorError::LoopFailed`] if it exited abnormally, on every
    /// call until the next `start()`.
    pub fn has_exited(&self) -> Result<bool> {
        self.latch.has_exited()
    }

    /// Block until the background loop has exited.
    ///
    /// # Errors
    ///
    /// [`TransactorError::LoopFailed`] if it exited abnormally;
    /// [`TransactorError::NotStarted`] if it never ran.
    pub fn wait_until_exited(&self) -> Result<()> {
        self.latch.wait_until_exited()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.latch.state()
    }

    /// Send a request to the peer and get its reply in the future.
    ///
    /// The promise is registered before the request is queued, so a fast
    /// reply can't be missed. There is no timeout: if the peer never
    /// answers, [`Reply::wait`] blocks forever. Don't wait on a reply from
    /// inside a handler; the loop that would deliver it is the one blocked.
    ///
    /// # Errors
    ///
    /// [`TransactorError::NotRunning`], [`TransactorError::Backpressure`],
    /// or [`TransactorError::SendUnsupported`] in message mode.
    pub fn send(&self, body: Value) -> Result<Reply> {
        if let Dispatch::Message(_) = &*self.dispatch {
            return Err(TransactorError::SendUnsupported);
        }
        let writer = lock(&self.outbound)
            .clone()
            .ok_or(TransactorError::NotRunning)?;

        let reply = self.correlations.make_promise();
        let queued = Envelope::Request {
            id: reply.id(),
            body,
        }
        .to_line()
        .and_then(|line| writer.send(OutboundLine(line)));

        if let Err(e) = queued {
            self.correlations.forget(reply.id());
            return Err(e);
        }
        // The loop may have exited between the clone and the queueing.
        if writer.is_closed() {
            self.correlations.forget(reply.id());
            return Err(TransactorError::NotRunning);
        }
        Ok(reply)
    }

    /// Send a request and block until the peer answers.
    pub fn request(&self, body: Value) -> Result<Value> {
        Ok(self.send(body)?.wait())
    }

    /// Send a request and block for at most `timeout`.
    ///
    /// On timeout the promise is forgotten, so a late reply is dropped,
    /// and `Ok(None)` is returned.
    pub fn request_timeout(&self, body: Value, timeout: Duration) -> Result<Option<Value>> {
        let reply = self.send(body)?;
        let value = reply.wait_timeout(timeout);
        if value.is_none() {
            self.forget(reply.id());
        }
        Ok(value)
    }

    /// Give up on a pending request. Returns `false` if nothing was pending.
    pub fn forget(&self, id: CorrelationId) -> bool {
        self.correlations.forget(id)
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_replies(&self) -> usize {
        self.correlations.pending()
    }

    /// Number of requests queued but not yet written.
    pub fn queued_writes(&self) -> usize {
        lock(&self.outbound)
            .as_ref()
            .map_or(0, WriterHandle::pending_count)
    }

    /// The configuration this transactor was built with.
    pub fn config(&self) -> &TransactorConfig {
        &self.config
    }
}

impl Drop for Transactor {
    fn drop(&mut self) {
        self.stop();
    }
}
