use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Buf;

use super::Shared;
use crate::buffer::Block;
use crate::error::{Error, Result};

/// Consumer half of a pipe.
///
/// Reads resolve once data beyond the examined position is buffered (or the
/// producer completed); the buffered segments are then borrowed zero-copy
/// through [`buffer`](PipeReader::buffer) and released with
/// [`consume`](PipeReader::consume).
pub struct PipeReader {
    shared: Arc<Shared>,
    /// Blocks moved out of the shared queue, still counted in the backlog
    /// until consumed.
    held: VecDeque<Block>,
    held_len: usize,
    /// Bytes at the front of `held` already examined by the consumer.
    examined: usize,
    completed: bool,
}

impl PipeReader {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        PipeReader { shared, held: VecDeque::new(), held_len: 0, examined: 0, completed: false }
    }

    /// Wait until unexamined data is buffered or the producer completed.
    ///
    /// End-of-stream is a result with `is_completed` set and an empty
    /// buffer. If the producer completed with an error, that error is
    /// returned here and on every subsequent read.
    pub fn read(&mut self) -> Read<'_> {
        Read { reader: self }
    }

    /// Poll-level form of [`read`](PipeReader::read), for stream adapters.
    pub fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<ReadResult>> {
        if self.completed {
            return Poll::Ready(Err(Error::PipeCompleted));
        }
        let mut state = self.shared.lock();
        while let Some(block) = state.ready.pop_front() {
            self.held_len += block.len();
            self.held.push_back(block);
        }
        if self.held_len > self.examined {
            return Poll::Ready(Ok(ReadResult {
                buffered: self.held_len,
                is_completed: state.writer_done.is_some(),
            }));
        }
        match &state.writer_done {
            Some(done) => match done.to_read_error() {
                None => {
                    Poll::Ready(Ok(ReadResult { buffered: self.held_len, is_completed: true }))
                }
                Some(err) => Poll::Ready(Err(err.into())),
            },
            None => {
                state.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    /// Borrow the buffered, unconsumed bytes.
    pub fn buffer(&self) -> BufView<'_> {
        BufView { blocks: &self.held, skip: 0, offset: 0, remaining: self.held_len }
    }

    /// Release the first `consumed` bytes and mark the first `examined`
    /// bytes as seen.
    ///
    /// Both positions are relative to the current buffer start (the bytes a
    /// preceding read reported). Data up to `examined` does not wake the
    /// next read again; only bytes past it do. Consumed blocks return to the
    /// pool, and a producer parked on backpressure resumes once the backlog
    /// drops to the resume threshold.
    ///
    /// # Panics
    ///
    /// Panics unless `consumed <= examined <= buffered`.
    pub fn consume(&mut self, consumed: usize, examined: usize) {
        assert!(consumed <= examined, "consumed must not exceed examined");
        assert!(examined <= self.held_len, "examined past the buffered region");
        let mut left = consumed;
        while left > 0 {
            let front = self.held.front_mut().expect("blocks cover the consumed range");
            let n = front.len().min(left);
            front.advance_read(n);
            left -= n;
            if front.is_empty() {
                // Drop returns the block to the pool.
                self.held.pop_front();
            }
        }
        self.held_len -= consumed;
        self.examined = examined - consumed;
        if consumed == 0 {
            return;
        }
        let mut state = self.shared.lock();
        state.backlog -= consumed;
        if state.backlog <= self.shared.options.resume_writer_threshold {
            state.wake_writer();
        }
    }

    /// Complete the consumer side.
    ///
    /// Held and queued blocks return to the pool, and a parked producer is
    /// released (its next flush observes `is_completed`). Idempotent; also
    /// runs on drop.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.held.clear();
        self.held_len = 0;
        self.examined = 0;
        let mut state = self.shared.lock();
        state.reader_done = true;
        state.ready.clear();
        state.backlog = 0;
        state.wake_writer();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.complete();
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("buffered", &self.held_len)
            .field("examined", &self.examined)
            .field("completed", &self.completed)
            .finish()
    }
}

/// Result of a [`PipeReader::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    /// Total unconsumed bytes currently buffered.
    pub buffered: usize,
    /// The producer has completed; once `buffered` is also zero this is
    /// end-of-stream.
    pub is_completed: bool,
}

/// Future returned by [`PipeReader::read`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Read<'a> {
    reader: &'a mut PipeReader,
}

impl Future for Read<'_> {
    type Output = Result<ReadResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().reader.poll_read_ready(cx)
    }
}

impl fmt::Debug for Read<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read").field("reader", &self.reader).finish()
    }
}

/// Zero-copy view over the buffered segments of a [`PipeReader`].
///
/// Implements [`Buf`]; advancing the view only moves its own cursor, actual
/// release happens through [`PipeReader::consume`].
pub struct BufView<'a> {
    blocks: &'a VecDeque<Block>,
    skip: usize,
    offset: usize,
    remaining: usize,
}

impl<'a> BufView<'a> {
    /// Total bytes visible through this view.
    pub fn len(&self) -> usize {
        self.remaining
    }

    /// True if the view contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Iterate the contiguous segments from the current cursor on.
    pub fn chunks(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let offset = self.offset;
        self.blocks.iter().skip(self.skip).enumerate().filter_map(move |(i, block)| {
            let data = block.unread();
            let data = if i == 0 { &data[offset..] } else { data };
            (!data.is_empty()).then_some(data)
        })
    }

    /// Copy the remaining bytes into a `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.remaining);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl Buf for BufView<'_> {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        if self.remaining == 0 {
            return &[];
        }
        &self.blocks[self.skip].unread()[self.offset..]
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(cnt <= self.remaining, "advance past the end of the view");
        self.remaining -= cnt;
        while cnt > 0 {
            let available = self.blocks[self.skip].len() - self.offset;
            if cnt < available {
                self.offset += cnt;
                return;
            }
            cnt -= available;
            self.skip += 1;
            self.offset = 0;
        }
    }
}

impl fmt::Debug for BufView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufView").field("remaining", &self.remaining).finish()
    }
}
