//! Buffered connection output with single-writer discipline.
//!
//! [`SocketOutput`] is the application-facing end of a connection's output
//! pipe. Many response writers may hold clones of the handle, but a single
//! critical section serializes access to the pipe writer, so bytes of
//! concurrent writes never interleave. Completion is tolerant: writes that
//! race a torn-down connection are silently dropped instead of erroring.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BufMut;
use log::trace;

use crate::chunk;
use crate::error::{Error, Result};
use crate::pipe::PipeWriter;

/// Shared handle to one connection's buffered output.
#[derive(Clone)]
pub struct SocketOutput {
    inner: Arc<Inner>,
}

struct Inner {
    /// Fast-path completion check; the lock still owns the transition.
    completed: AtomicBool,
    writer: Mutex<Option<PipeWriter>>,
}

impl SocketOutput {
    /// Wrap the writer half of a connection's output pipe.
    pub fn new(writer: PipeWriter) -> Self {
        SocketOutput {
            inner: Arc::new(Inner {
                completed: AtomicBool::new(false),
                writer: Mutex::new(Some(writer)),
            }),
        }
    }

    /// Queue `data` for the transport, optionally framed as one HTTP/1.1
    /// chunk, and wait for the pipe to accept it.
    ///
    /// After [`complete`](SocketOutput::complete) this is a no-op returning
    /// `Ok(())`: a response writer racing connection teardown should not
    /// crash, the bytes just go nowhere. The payload is committed under the
    /// output lock; only the backpressure wait happens outside it, so
    /// dropping the future mid-wait never leaves a partial write in the
    /// pipe.
    pub async fn write(&self, data: &[u8], chunked: bool) -> Result<()> {
        let flush = {
            let mut guard = self.lock_writer();
            if self.inner.completed.load(Ordering::Acquire) {
                return Ok(());
            }
            let Some(writer) = guard.as_mut() else {
                return Ok(());
            };
            if chunked && !data.is_empty() {
                chunk::write_begin_chunk(writer, data.len());
                writer.put_slice(data);
                chunk::write_end_chunk(writer);
            } else {
                writer.put_slice(data);
            }
            writer.flush()
        };
        match flush.await {
            Ok(_) => Ok(()),
            // The pipe completed while we were waiting; same benign race.
            Err(Error::PipeCompleted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Force a flush without queuing new data.
    pub async fn flush(&self) -> Result<()> {
        self.write(&[], false).await
    }

    /// Mark the output completed and complete the pipe writer.
    ///
    /// Pending flush continuations observe the completion and resolve;
    /// subsequent writes are dropped. Idempotent.
    pub fn complete(&self) {
        let mut guard = self.lock_writer();
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("socket output completed");
        if let Some(mut writer) = guard.take() {
            writer.complete(None);
        }
    }

    /// Whether the output has been completed.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Recover the pipe writer from a sole, uncompleted handle.
    ///
    /// Used when a connection leaves HTTP mode and the raw output should be
    /// driven directly (e.g. after a protocol upgrade). Returns `None` if
    /// other clones exist or the output was already completed.
    pub fn into_inner(self) -> Option<PipeWriter> {
        let inner = Arc::try_unwrap(self.inner).ok()?;
        inner.writer.into_inner().expect("socket output lock poisoned")
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<PipeWriter>> {
        self.inner.writer.lock().expect("socket output lock poisoned")
    }
}

impl fmt::Debug for SocketOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOutput").field("completed", &self.is_completed()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BlockPool;
    use crate::pipe::{pipe, PipeOptions};

    #[tokio::test]
    async fn chunked_write_frames_payload() {
        let (mut reader, writer) = pipe(BlockPool::new(), PipeOptions::default());
        let output = SocketOutput::new(writer);
        output.write(b"hello", true).await.unwrap();
        output.complete();

        reader.read().await.unwrap();
        assert_eq!(reader.buffer().to_vec(), b"5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn completed_output_drops_writes() {
        let (mut reader, writer) = pipe(BlockPool::new(), PipeOptions::default());
        let output = SocketOutput::new(writer);
        output.complete();
        output.write(b"dropped", false).await.unwrap();

        let result = reader.read().await.unwrap();
        assert!(result.is_completed);
        assert_eq!(result.buffered, 0);
    }

    #[tokio::test]
    async fn complete_releases_an_in_flight_write() {
        let options =
            PipeOptions { pause_writer_threshold: 8, resume_writer_threshold: 4 };
        let (_reader, writer) = pipe(BlockPool::new(), options);
        let output = SocketOutput::new(writer);

        // The reader never consumes, so this write parks on backpressure.
        let write = tokio::spawn({
            let output = output.clone();
            async move { output.write(&[0u8; 64], false).await }
        });
        tokio::task::yield_now().await;

        output.complete();
        write.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn into_inner_requires_sole_handle() {
        let (_reader, writer) = pipe(BlockPool::new(), PipeOptions::default());
        let output = SocketOutput::new(writer);
        let clone = output.clone();
        assert!(clone.into_inner().is_none());
        assert!(output.into_inner().is_some());
    }
}
