//! Pipe-backed duplex stream for upgraded connections.
//!
//! Once a connection leaves HTTP mode, protocol drivers want a plain
//! `AsyncRead + AsyncWrite` object. [`PipeStream`] provides that over the
//! application-facing pipe halves while the transport pumps keep running
//! underneath.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Error;
use crate::pipe::{Flush, PipeReader, PipeWriter};

/// Raw duplex stream over a connection's input reader and output writer.
pub struct PipeStream {
    reader: PipeReader,
    writer: PipeWriter,
    /// Backpressure wait carried over from the last write.
    pending_flush: Option<Flush>,
}

impl PipeStream {
    /// Assemble a stream from the two pipe halves of one connection.
    pub fn new(reader: PipeReader, writer: PipeWriter) -> Self {
        PipeStream { reader, writer, pending_flush: None }
    }

    /// Split the stream back into its pipe halves.
    pub fn into_parts(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }

    fn poll_pending_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(flush) = self.pending_flush.as_mut() {
            match Pin::new(flush).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => {
                    self.pending_flush = None;
                    if let Err(e) = result {
                        return Poll::Ready(Err(to_io_error(e)));
                    }
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = match this.reader.poll_read_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(to_io_error(e))),
        };
        if result.buffered == 0 {
            // End of stream.
            return Poll::Ready(Ok(()));
        }
        let mut view = this.reader.buffer();
        let n = view.len().min(buf.remaining());
        let mut left = n;
        while left > 0 {
            let segment = view.chunk();
            let take = segment.len().min(left);
            buf.put_slice(&segment[..take]);
            view.advance(take);
            left -= take;
        }
        this.reader.consume(n, n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // Honor backpressure from the previous write before taking more.
        match this.poll_pending_flush(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }
        let mut rest = data;
        while !rest.is_empty() {
            let buf = match this.writer.reserve(1) {
                Ok(buf) => buf,
                Err(e) => return Poll::Ready(Err(to_io_error(e))),
            };
            let take = buf.len().min(rest.len());
            buf[..take].copy_from_slice(&rest[..take]);
            this.writer.commit(take);
            rest = &rest[take..];
        }
        this.pending_flush = Some(this.writer.flush());
        // The bytes are committed; a pending wait carries over to the next
        // write or flush, but an error must not be swallowed here.
        match this.poll_pending_flush(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(data.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_pending_flush(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {
                this.writer.complete(None);
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeStream")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}

fn to_io_error(error: Error) -> io::Error {
    match error {
        Error::Io(e) => e,
        Error::PipeCompleted => io::Error::new(io::ErrorKind::BrokenPipe, error.to_string()),
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BlockPool;
    use crate::pipe::{pipe, PipeOptions};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn stream_reads_and_writes_through_pipes() {
        let pool = BlockPool::new();
        let (app_reader, mut pump_writer) = pipe(pool.clone(), PipeOptions::default());
        let (mut pump_reader, app_writer) = pipe(pool, PipeOptions::default());
        let mut stream = PipeStream::new(app_reader, app_writer);

        pump_writer.reserve(4).unwrap()[..4].copy_from_slice(b"data");
        pump_writer.commit(4);
        pump_writer.flush().await.unwrap();

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"data");

        stream.write_all(b"reply").await.unwrap();
        stream.flush().await.unwrap();
        let result = pump_reader.read().await.unwrap();
        assert_eq!(pump_reader.buffer().to_vec(), b"reply");
        pump_reader.consume(result.buffered, result.buffered);

        stream.shutdown().await.unwrap();
        let result = pump_reader.read().await.unwrap();
        assert!(result.is_completed);
    }

    #[tokio::test]
    async fn writes_after_shutdown_surface_an_error() {
        let pool = BlockPool::new();
        let (app_reader, _pump_writer) = pipe(pool.clone(), PipeOptions::default());
        let (_pump_reader, app_writer) = pipe(pool, PipeOptions::default());
        let mut stream = PipeStream::new(app_reader, app_writer);

        stream.shutdown().await.unwrap();
        let err = stream.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
