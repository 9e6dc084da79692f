//! Outbound line queue and batched writer.
//!
//! Owner threads never touch the output stream. [`WriterHandle::send`]
//! queues an encoded line on an mpsc channel; the background loop drains the
//! queue and writes whole batches with scatter/gather I/O.
//!
//! # Architecture
//!
//! ```text
//! Owner thread 1 ─┐
//! Owner thread 2 ─┼─► mpsc::UnboundedSender<OutboundLine> ─► Background loop ─► stdout
//! Owner thread N ─┘                                               ▲
//!                                       responses written inline ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Result, TransactorError};

/// Default maximum queued lines before `send` is refused.
pub const DEFAULT_MAX_PENDING_WRITES: usize = 1024;

/// Maximum lines to write in a single batch.
pub(crate) const MAX_BATCH_SIZE: usize = 64;

/// A newline-terminated JSON value ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundLine(pub Bytes);

/// Handle for queueing lines to the background loop.
///
/// Cheaply cloneable and usable from any thread, with or without a runtime.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundLine>,
    /// Lines queued but not yet written.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

/// Receiving end, owned by the background loop.
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<OutboundLine>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected handle/queue pair.
pub fn outbound_queue(max_pending: usize) -> (WriterHandle, OutboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        WriterHandle {
            tx,
            pending: pending.clone(),
            max_pending,
        },
        OutboundQueue { rx, pending },
    )
}

impl WriterHandle {
    /// Queue a line without blocking.
    ///
    /// Fails with [`TransactorError::Backpressure`] if `max_pending` lines
    /// are already queued, or [`TransactorError::NotRunning`] if the loop
    /// has gone away.
    pub fn send(&self, line: OutboundLine) -> Result<()> {
        let max = self.max_pending;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(TransactorError::Backpressure)?;

        self.tx.send(line).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            TransactorError::NotRunning
        })
    }

    /// Check if the queue is full.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending line count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the receiving loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundQueue {
    /// Wait for at least one line and collect up to `MAX_BATCH_SIZE`.
    ///
    /// Returns 0 once every handle is dropped. Cancel safe.
    pub async fn recv_batch(&mut self, batch: &mut Vec<OutboundLine>) -> usize {
        self.rx.recv_many(batch, MAX_BATCH_SIZE).await
    }

    /// Record that `n` lines have been written.
    pub fn mark_written(&self, n: usize) {
        self.pending.fetch_sub(n, Ordering::Release);
    }

    /// Refuse further lines and drop any still queued.
    ///
    /// Returns how many were dropped. Afterwards every handle reports
    /// [`WriterHandle::is_closed`] and `send` fails with `NotRunning`.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        self.mark_written(dropped);
        dropped
    }
}

/// Write a batch of lines using scatter/gather I/O, then flush.
pub async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|line| line.0.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(TransactorError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[OutboundLine], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for line in batch {
        let end = offset + line.0.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&line.0[start..]));
        }
        offset = end;
    }

    slices
}
