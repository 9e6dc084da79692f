//! Background loop and exit latch.
//!
//! The loop owns the transport while running. Each iteration waits, without
//! polling, for the first of:
//!
//! 1. a stop request on the cancellation channel,
//! 2. lines queued by `send`,
//! 3. input bytes.
//!
//! The wait is biased in that order, and a pending stop is checked again
//! before each buffered value, so once stop is requested no new message is
//! started.
//!
//! ```text
//! NotStarted ──start──► Running ──┬──► ExitedClean   (stop op, stop(), EOF)
//!                          ▲      └──► ExitedFailed  (I/O, handler, panic)
//!                          └────────── start ──────────┘
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;

use crate::cancel::CancelListener;
use crate::correlation::Correlations;
use crate::error::{Result, TransactorError};
use crate::handler::{Flow, MessageHandler, RequestHandler};
use crate::protocol::{value_to_line, Envelope, Frame};
use crate::transport::Transport;
use crate::writer::{write_batch, OutboundLine, OutboundQueue, MAX_BATCH_SIZE};

/// Name given to the background thread.
pub const THREAD_NAME: &str = "io-transactor";

/// How inbound values are routed.
pub(crate) enum Dispatch {
    /// Decode `{op, id, body}` envelopes; answer requests, keep promises.
    Envelope(Box<dyn RequestHandler>),
    /// Hand every value to the handler as-is.
    Message(Box<dyn MessageHandler>),
}

/// Observable lifecycle state of the background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    ExitedClean,
    ExitedFailed,
}

#[derive(Debug)]
enum Phase {
    NotStarted,
    Running,
    /// Carries the latched fault, if the loop failed.
    Exited(Option<Arc<TransactorError>>),
}

/// Records how the loop ended and wakes anyone waiting for it.
pub(crate) struct ExitLatch {
    phase: Mutex<Phase>,
    exited: Condvar,
}

impl ExitLatch {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::NotStarted),
            exited: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter `Running`, clearing any fault from the previous run.
    pub(crate) fn begin(&self) {
        *self.lock() = Phase::Running;
    }

    /// Undo `begin` when the thread could not be spawned.
    pub(crate) fn abort(&self) {
        *self.lock() = Phase::NotStarted;
    }

    /// Latch the outcome and notify waiters under the same lock.
    pub(crate) fn finish(&self, outcome: Result<()>) {
        let fault = match outcome {
            Ok(()) => {
                tracing::debug!("Background loop exited cleanly");
                None
            }
            Err(e) => {
                tracing::error!("Background loop failed: {}", e);
                Some(Arc::new(e))
            }
        };

        let mut phase = self.lock();
        *phase = Phase::Exited(fault);
        self.exited.notify_all();
    }

    pub(crate) fn state(&self) -> WorkerState {
        match &*self.lock() {
            Phase::NotStarted => WorkerState::NotStarted,
            Phase::Running => WorkerState::Running,
            Phase::Exited(None) => WorkerState::ExitedClean,
            Phase::Exited(Some(_)) => WorkerState::ExitedFailed,
        }
    }

    /// Non-blocking. Re-raises a latched fault on every call.
    pub(crate) fn has_exited(&self) -> Result<bool> {
        match &*self.lock() {
            Phase::NotStarted | Phase::Running => Ok(false),
            Phase::Exited(None) => Ok(true),
            Phase::Exited(Some(fault)) => Err(TransactorError::LoopFailed(fault.clone())),
        }
    }

    /// Blocks until the loop exits. Re-raises a latched fault on every call.
    pub(crate) fn wait_until_exited(&self) -> Result<()> {
        let mut phase = self.lock();
        loop {
            match &*phase {
                Phase::NotStarted => return Err(TransactorError::NotStarted),
                Phase::Running => {}
                Phase::Exited(None) => return Ok(()),
                Phase::Exited(Some(fault)) => {
                    return Err(TransactorError::LoopFailed(fault.clone()))
                }
            }
            phase = self
                .exited
                .wait(phase)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum Step {
    Continue,
    Stop,
}

/// State owned by one run of the background loop.
pub(crate) struct Worker {
    pub(crate) dispatch: Arc<Dispatch>,
    pub(crate) correlations: Arc<Correlations>,
    pub(crate) cancel: CancelListener,
    pub(crate) outbound: OutboundQueue,
    pub(crate) read_buffer_size: usize,
    pub(crate) max_frame_size: usize,
}

impl Worker {
    /// Run the loop on a new thread.
    ///
    /// The transport is taken from `slot` when the thread starts and put
    /// back before the outcome is latched, so after `wait_until_exited`
    /// returns it is available for the next run.
    pub(crate) fn spawn(
        self,
        runtime: Runtime,
        slot: Arc<Mutex<Option<Transport>>>,
        latch: Arc<ExitLatch>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.thread_main(runtime, slot, latch))
    }

    fn thread_main(
        mut self,
        runtime: Runtime,
        slot: Arc<Mutex<Option<Transport>>>,
        latch: Arc<ExitLatch>,
    ) {
        let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        let mut transport = match taken {
            Some(transport) => transport,
            None => {
                self.outbound.close();
                latch.finish(Err(TransactorError::TransportUnavailable));
                return;
            }
        };
        transport.frames.set_max_frame_size(self.max_frame_size);

        tracing::debug!("Background loop started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.block_on(self.run(&mut transport))
        }));
        // Nothing will write these any more; make late senders see it.
        let dropped = self.outbound.close();
        if dropped > 0 {
            tracing::debug!("Dropped {} unsent request(s)", dropped);
        }
        // A stdin read may still be parked on the blocking pool; don't wait for it.
        runtime.shutdown_background();

        let outcome = match outcome {
            Ok(result) => result,
            Err(payload) => Err(TransactorError::HandlerPanicked(panic_message(&*payload))),
        };

        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(transport);
        latch.finish(outcome);
    }

    /// Main loop - multiplexes cancellation, outbound lines and input.
    async fn run(&mut self, transport: &mut Transport) -> Result<()> {
        let mut chunk = vec![0u8; self.read_buffer_size.max(1)];
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut outbound_open = true;
        let mut eof = false;

        loop {
            // Values left over from the previous run or read come first.
            if let Step::Stop = self.process_buffered(transport).await? {
                return Ok(());
            }

            if eof {
                while let Some(frame) = transport.frames.finish() {
                    if self.cancel.is_requested() {
                        return Ok(());
                    }
                    if let Step::Stop = self.handle_frame(transport, frame).await? {
                        return Ok(());
                    }
                }
                tracing::debug!("Input closed by peer");
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = self.cancel.requested() => {
                    tracing::debug!("Stop requested by owner");
                    return Ok(());
                }

                n = self.outbound.recv_batch(&mut batch), if outbound_open => {
                    if n == 0 {
                        outbound_open = false;
                        continue;
                    }
                    write_batch(&mut transport.writer, &batch).await?;
                    self.outbound.mark_written(n);
                    batch.clear();
                }

                read = transport.reader.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        eof = true;
                    } else {
                        transport.frames.extend(&chunk[..n]);
                    }
                }
            }
        }
    }

    /// Handle every complete value in the buffer, stopping early if a stop
    /// was requested or a handler ended the session.
    async fn process_buffered(&mut self, transport: &mut Transport) -> Result<Step> {
        loop {
            if self.cancel.is_requested() {
                return Ok(Step::Stop);
            }
            let frame = match transport.frames.next_frame()? {
                Some(frame) => frame,
                None => return Ok(Step::Continue),
            };
            if let Step::Stop = self.handle_frame(transport, frame).await? {
                return Ok(Step::Stop);
            }
        }
    }

    async fn handle_frame(&mut self, transport: &mut Transport, frame: Frame) -> Result<Step> {
        let value = match frame {
            Frame::Value(value) => value,
            Frame::Garbage(reason) => {
                tracing::warn!("Discarding unparseable input: {}", reason);
                return Ok(Step::Continue);
            }
        };

        let dispatch = self.dispatch.clone();
        match &*dispatch {
            Dispatch::Envelope(handler) => {
                self.handle_envelope(transport, handler.as_ref(), value)
                    .await
            }
            Dispatch::Message(handler) => handle_message(transport, handler.as_ref(), value).await,
        }
    }

    async fn handle_envelope(
        &mut self,
        transport: &mut Transport,
        handler: &dyn RequestHandler,
        value: Value,
    ) -> Result<Step> {
        let envelope = match Envelope::decode(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Discarding message: {}", e);
                return Ok(Step::Continue);
            }
        };

        match envelope {
            Envelope::Request { id, body } => {
                let reply = handler.on_request(body).map_err(TransactorError::Handler)?;
                let line = Envelope::Response { id, body: reply }.to_line()?;
                write_batch(&mut transport.writer, &[OutboundLine(line)]).await?;
                Ok(Step::Continue)
            }
            Envelope::Response { id, body } => {
                if !self.correlations.keep(id, body) {
                    tracing::debug!("Dropping response for unknown id {}", id);
                }
                Ok(Step::Continue)
            }
            Envelope::Stop => {
                tracing::debug!("Stop requested by peer");
                Ok(Step::Stop)
            }
        }
    }
}

async fn handle_message(
    transport: &mut Transport,
    handler: &dyn MessageHandler,
    value: Value,
) -> Result<Step> {
    match handler.on_message(value).map_err(TransactorError::Handler)? {
        Flow::Continue(reply) => {
            let line = value_to_line(&reply)?;
            write_batch(&mut transport.writer, &[OutboundLine(line)]).await?;
            Ok(Step::Continue)
        }
        Flow::Stop => {
            tracing::debug!("Message handler ended the session");
            Ok(Step::Stop)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_latch_not_started() {
        let latch = ExitLatch::new();

        assert_eq!(latch.state(), WorkerState::NotStarted);
        assert!(!latch.has_exited().unwrap());
        assert!(matches!(
            latch.wait_until_exited(),
            Err(TransactorError::NotStarted)
        ));
    }

    #[test]
    fn test_latch_clean_exit() {
        let latch = ExitLatch::new();
        latch.begin();
        assert_eq!(latch.state(), WorkerState::Running);
        assert!(!latch.has_exited().unwrap());

        latch.finish(Ok(()));
        assert_eq!(latch.state(), WorkerState::ExitedClean);
        assert!(latch.has_exited().unwrap());
        latch.wait_until_exited().unwrap();
    }

    #[test]
    fn test_latch_fault_reraised_every_call() {
        let latch = ExitLatch::new();
        latch.begin();
        latch.finish(Err(TransactorError::HandlerPanicked("boom".into())));

        assert_eq!(latch.state(), WorkerState::ExitedFailed);
        for _ in 0..3 {
            assert!(matches!(
                latch.has_exited(),
                Err(TransactorError::LoopFailed(_))
            ));
            assert!(matches!(
                latch.wait_until_exited(),
                Err(TransactorError::LoopFailed(_))
            ));
        }
    }

    #[test]
    fn test_latch_restart_clears_fault() {
        let latch = ExitLatch::new();
        latch.begin();
        latch.finish(Err(TransactorError::NotRunning));

        latch.begin();
        assert!(!latch.has_exited().unwrap());
    }

    #[test]
    fn test_latch_abort() {
        let latch = ExitLatch::new();
        latch.begin();
        latch.abort();
        assert_eq!(latch.state(), WorkerState::NotStarted);
    }

    #[test]
    fn test_latch_wakes_waiter() {
        let latch = Arc::new(ExitLatch::new());
        latch.begin();

        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait_until_exited())
        };

        thread::sleep(Duration::from_millis(20));
        latch.finish(Ok(()));
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static message");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 7");
    }
}
