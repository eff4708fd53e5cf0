//! Single-producer/single-consumer byte pipe with backpressure.
//!
//! A pipe is one direction of a connection: the producer reserves pooled
//! blocks, commits written bytes and flushes them to the consumer; the
//! consumer reads committed segments zero-copy and releases them with
//! explicit consumed/examined positions. Both halves are move-only, so the
//! compiler enforces the one-producer/one-consumer discipline. Completion is
//! terminal and one-directional.
//!
//! Internally a single mutex orders commit/flush before read (happens-before
//! for the payload bytes) and parks at most one waker per side: the producer
//! suspends in [`PipeWriter::flush`] while the committed-but-unconsumed
//! backlog exceeds the pause threshold, the consumer suspends in
//! [`PipeReader::read`] while nothing unexamined is buffered.

mod reader;
mod writer;

pub use self::reader::{BufView, PipeReader, Read, ReadResult};
pub use self::writer::{Flush, FlushResult, PipeWriter};

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Waker;

use crate::buffer::{Block, BlockPool};

/// Flow-control thresholds for one pipe direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// Backlog (committed, unconsumed bytes) above which `flush` suspends
    /// the producer.
    pub pause_writer_threshold: usize,
    /// Backlog the consumer must drain down to before a suspended producer
    /// is resumed.
    pub resume_writer_threshold: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        PipeOptions { pause_writer_threshold: 64 * 1024, resume_writer_threshold: 32 * 1024 }
    }
}

/// Create one pipe direction backed by `pool`.
///
/// # Panics
///
/// Panics if the resume threshold exceeds the pause threshold.
pub fn pipe(pool: BlockPool, options: PipeOptions) -> (PipeReader, PipeWriter) {
    assert!(
        options.resume_writer_threshold <= options.pause_writer_threshold,
        "resume threshold must not exceed pause threshold"
    );
    let shared = Arc::new(Shared { state: Mutex::new(State::new()), options });
    (PipeReader::new(Arc::clone(&shared)), PipeWriter::new(shared, pool))
}

/// How the writer side terminated.
pub(crate) enum Completion {
    Eof,
    Failed { kind: io::ErrorKind, message: String },
}

impl Completion {
    pub(crate) fn from_error(error: Option<io::Error>) -> Self {
        match error {
            None => Completion::Eof,
            Some(e) => Completion::Failed { kind: e.kind(), message: e.to_string() },
        }
    }

    pub(crate) fn to_read_error(&self) -> Option<io::Error> {
        match self {
            Completion::Eof => None,
            Completion::Failed { kind, message } => Some(io::Error::new(*kind, message.clone())),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    pub(crate) options: PipeOptions,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        // Poisoning would mean a panic inside a short non-panicking section.
        self.state.lock().expect("pipe state lock poisoned")
    }
}

pub(crate) struct State {
    /// Committed blocks not yet handed to the reader.
    pub(crate) ready: VecDeque<Block>,
    /// Committed bytes not yet consumed, including those held by the reader.
    pub(crate) backlog: usize,
    pub(crate) writer_done: Option<Completion>,
    pub(crate) reader_done: bool,
    pub(crate) read_waker: Option<Waker>,
    pub(crate) write_waker: Option<Waker>,
}

impl State {
    fn new() -> Self {
        State {
            ready: VecDeque::new(),
            backlog: 0,
            writer_done: None,
            reader_done: false,
            read_waker: None,
            write_waker: None,
        }
    }

    pub(crate) fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}
