//! Bridges a raw transport stream to a connection's duplex pipes.
//!
//! One [`AdaptedPipeline`] per connection: the input pump continuously reads
//! raw bytes into the input pipe for protocol-level consumers (HTTP parser
//! or, post upgrade, the WebSocket framer), while the output pump drains the
//! output pipe to the transport. The raw stream may be a socket, a TLS
//! stream or any filtered `AsyncRead + AsyncWrite`. The two pumps run
//! concurrently with no ordering dependency between directions.

use std::io;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::BlockPool;
use crate::error::Result;
use crate::output::SocketOutput;
use crate::pipe::{pipe, PipeOptions, PipeReader, PipeWriter};

/// Minimum buffer reserved per transport read.
pub const MIN_READ_SIZE: usize = 2048;

/// Both directions of one connection bridged onto pipes.
///
/// Created together with the application-facing ends; [`run`] then owns the
/// transport-facing halves for the lifetime of the connection.
///
/// [`run`]: AdaptedPipeline::run
pub struct AdaptedPipeline {
    input_writer: PipeWriter,
    output_reader: PipeReader,
}

impl AdaptedPipeline {
    /// Build the pipes for one connection.
    ///
    /// Returns the pipeline (transport side) plus the application side: the
    /// input reader to parse from and the [`SocketOutput`] to respond
    /// through.
    pub fn new(pool: &BlockPool, options: PipeOptions) -> (Self, PipeReader, SocketOutput) {
        let (input_reader, input_writer) = pipe(pool.clone(), options);
        let (output_reader, output_writer) = pipe(pool.clone(), options);
        (
            AdaptedPipeline { input_writer, output_reader },
            input_reader,
            SocketOutput::new(output_writer),
        )
    }

    /// Pump both directions until the connection is done.
    ///
    /// Returns when the transport reached end-of-stream and the output side
    /// completed, or as soon as either direction hits a fatal I/O error
    /// (which is propagated after completing the affected pipe side).
    pub async fn run<Io>(self, io: Io) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let AdaptedPipeline { input_writer, output_reader } = self;
        tokio::try_join!(read_input(read_half, input_writer), write_output(write_half, output_reader))?;
        Ok(())
    }
}

impl std::fmt::Debug for AdaptedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptedPipeline").finish_non_exhaustive()
    }
}

/// Input pump: read the raw transport into the pipe until end-of-stream.
///
/// A zero-byte read is graceful EOF and completes the writer cleanly. An
/// I/O error is fatal for the connection: it completes the writer with the
/// error (so the consumer observes it) and is returned to the caller. No
/// retries happen at this layer.
pub async fn read_input<R>(mut io: R, mut writer: PipeWriter) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let buf = writer.reserve(MIN_READ_SIZE)?;
        let n = match io.read(buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!("input pump failed: {}", e);
                writer.complete(Some(io::Error::new(e.kind(), e.to_string())));
                return Err(e.into());
            }
        };
        if n == 0 {
            trace!("input pump reached end of stream");
            writer.complete(None);
            return Ok(());
        }
        writer.commit(n);
        if writer.flush().await?.is_completed {
            trace!("input consumer is gone, stopping pump");
            writer.complete(None);
            return Ok(());
        }
    }
}

/// Output pump: drain the pipe to the raw transport.
///
/// Stops cleanly on end-of-stream (producer completed and backlog drained).
/// The reader side is always completed on the way out, including on error,
/// so producers parked on backpressure are released rather than left
/// hanging.
pub async fn write_output<W>(mut io: W, mut reader: PipeReader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = pump_output(&mut io, &mut reader).await;
    reader.complete();
    if let Err(e) = &result {
        debug!("output pump failed: {}", e);
    }
    result
}

async fn pump_output<W>(io: &mut W, reader: &mut PipeReader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let read = reader.read().await?;
        if read.buffered == 0 {
            if read.is_completed {
                trace!("output pump reached end of stream");
                return Ok(());
            }
            continue;
        }
        for segment in reader.buffer().chunks() {
            io.write_all(segment).await?;
        }
        io.flush().await?;
        reader.consume(read.buffered, read.buffered);
    }
}
