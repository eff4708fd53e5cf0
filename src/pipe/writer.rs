use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{buf::UninitSlice, BufMut};

use super::{Completion, Shared};
use crate::buffer::{Block, BlockPool};
use crate::error::{Error, Result};

/// Producer half of a pipe.
///
/// The handle is move-only; holding it is holding the sole right to write
/// this direction. Writing is a reserve/commit/flush cycle: committed bytes
/// become visible to the consumer when [`flush`](PipeWriter::flush) publishes
/// them, and the flush future applies backpressure.
pub struct PipeWriter {
    shared: Arc<Shared>,
    pool: BlockPool,
    tail: Option<Block>,
    completed: bool,
}

impl PipeWriter {
    pub(super) fn new(shared: Arc<Shared>, pool: BlockPool) -> Self {
        PipeWriter { shared, pool, tail: None, completed: false }
    }

    /// Reserve a contiguous writable region of at least `min` bytes.
    ///
    /// The returned slice may be larger than `min`; write into its prefix
    /// and [`commit`](PipeWriter::commit) the number of bytes actually
    /// written. Requests beyond the pool's block size are served by a
    /// one-off allocation, so the only failure is use after completion.
    pub fn reserve(&mut self, min: usize) -> Result<&mut [u8]> {
        if self.completed {
            return Err(Error::PipeCompleted);
        }
        let needs_block = match &self.tail {
            Some(tail) => tail.spare() < min,
            None => true,
        };
        if needs_block {
            if let Some(tail) = self.tail.take() {
                self.publish(tail);
            }
            self.tail = Some(self.pool.checkout(min));
        }
        Ok(self.tail.as_mut().expect("tail block present").writable_mut())
    }

    /// Mark `n` bytes of the last reserved region as written.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the reserved region.
    pub fn commit(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let tail = self.tail.as_mut().expect("commit without a reserved block");
        tail.advance_write(n);
    }

    /// Publish committed bytes to the consumer and wake a pending read.
    ///
    /// The returned future resolves once the backlog is back under the pause
    /// threshold; it holds no borrow of the writer, so the caller may drop a
    /// lock before awaiting it. Dropping the future cancels only the wait,
    /// never the already-published bytes.
    pub fn flush(&mut self) -> Flush {
        if self.completed {
            return Flush { shared: None };
        }
        if let Some(tail) = self.tail.take() {
            if tail.is_empty() {
                // Keep an unused block for the next reserve.
                self.tail = Some(tail);
            } else {
                self.publish(tail);
            }
        }
        let mut state = self.shared.lock();
        state.wake_reader();
        drop(state);
        Flush { shared: Some(Arc::clone(&self.shared)) }
    }

    /// Complete this side, optionally with the error that caused it.
    ///
    /// Committed bytes published before completion remain readable; the
    /// terminal state (end-of-stream or sticky error) is observed by the
    /// consumer after draining them. Idempotent.
    pub fn complete(&mut self, error: Option<io::Error>) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Some(tail) = self.tail.take() {
            if !tail.is_empty() {
                self.publish(tail);
            }
        }
        let mut state = self.shared.lock();
        if state.writer_done.is_none() {
            state.writer_done = Some(Completion::from_error(error));
        }
        state.wake_reader();
        state.wake_writer();
    }

    /// Whether [`complete`](PipeWriter::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn publish(&self, block: Block) {
        debug_assert!(!block.is_empty());
        let mut state = self.shared.lock();
        if state.reader_done {
            // Consumer is gone; the block drops back into the pool.
            return;
        }
        state.backlog += block.len();
        state.ready.push_back(block);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.complete(None);
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("completed", &self.completed)
            .field("tail_len", &self.tail.as_ref().map_or(0, Block::len))
            .finish()
    }
}

/// Writing through `BufMut` chains pooled blocks automatically, which lets
/// codecs frame data straight into the pipe without an intermediate buffer.
///
/// The implementation panics on use after [`PipeWriter::complete`]; callers
/// that race completion must guard with [`PipeWriter::is_completed`].
unsafe impl BufMut for PipeWriter {
    fn remaining_mut(&self) -> usize {
        if self.completed {
            0
        } else {
            isize::MAX as usize
        }
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.commit(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let buf = match self.reserve(1) {
            Ok(buf) => buf,
            Err(_) => panic!("write into a completed pipe"),
        };
        // Pool blocks are zero-initialized, so handing them out as
        // uninitialized storage is sound.
        UninitSlice::new(buf)
    }
}

/// Result of a [`PipeWriter::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The pipe has reached a terminal state (either side completed) and
    /// the producer should stop.
    pub is_completed: bool,
}

/// Future returned by [`PipeWriter::flush`].
///
/// Suspends while the backlog exceeds the pause threshold; the consumer
/// resumes it by draining below the resume threshold. Completing either
/// side resolves a parked flush immediately with `is_completed` set.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Flush {
    /// `None` when the writer was already completed at flush time.
    shared: Option<Arc<Shared>>,
}

impl Future for Flush {
    type Output = Result<FlushResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(shared) = this.shared.as_ref() else {
            return Poll::Ready(Err(Error::PipeCompleted));
        };
        let mut state = shared.lock();
        if state.reader_done || state.writer_done.is_some() {
            // Terminal either way: waiting for drainage would be pointless
            // (reader gone) or could hang across teardown (writer completed
            // while this flush was parked).
            return Poll::Ready(Ok(FlushResult { is_completed: true }));
        }
        if state.backlog <= shared.options.pause_writer_threshold {
            return Poll::Ready(Ok(FlushResult { is_completed: false }));
        }
        state.write_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl fmt::Debug for Flush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flush").field("completed", &self.shared.is_none()).finish()
    }
}
