//! HTTP/1.1 chunked transfer encoding (RFC 7230 section 4.1).
//!
//! The writers here are pure and synchronous: they only append framing
//! bytes to a [`BufMut`], never touching the payload or performing I/O.
//! The wire format is `<hex-size>\r\n<data>\r\n` repeated, terminated by
//! `0\r\n\r\n`, and must be byte-exact for HTTP/1.1 compliance.

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

const CRLF: &[u8] = b"\r\n";
const END_OF_STREAM: &[u8] = b"0\r\n\r\n";
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Append the size prefix `<hex(len)>\r\n` for a chunk of `len` bytes.
///
/// The length is encoded as lowercase hex without leading zeros; this is a
/// wire-format decision of this crate (decoders must accept either case).
pub fn write_begin_chunk<B: BufMut>(buf: &mut B, len: usize) {
    let mut digits = [0u8; 16];
    let mut pos = digits.len();
    let mut rest = len;
    loop {
        pos -= 1;
        digits[pos] = HEX_DIGITS[rest & 0xf];
        rest >>= 4;
        if rest == 0 {
            break;
        }
    }
    buf.put_slice(&digits[pos..]);
    buf.put_slice(CRLF);
}

/// Append the `\r\n` that terminates a chunk's payload.
pub fn write_end_chunk<B: BufMut>(buf: &mut B) {
    buf.put_slice(CRLF);
}

/// Append the terminal zero-length chunk `0\r\n\r\n`.
///
/// Must be emitted exactly once per stream; use [`ChunkedEncoder`] when the
/// caller cannot guarantee that statically.
pub fn write_end_of_stream<B: BufMut>(buf: &mut B) {
    buf.put_slice(END_OF_STREAM);
}

/// Stateful guard over the chunk writers for one response stream.
///
/// Tracks whether the stream has been finalized so that the terminal chunk
/// is emitted exactly once and late writes are flagged instead of silently
/// corrupting the stream.
#[derive(Debug, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    /// Create an encoder for a fresh stream.
    pub fn new() -> Self {
        ChunkedEncoder::default()
    }

    /// Frame one payload as a chunk.
    ///
    /// Empty payloads are skipped entirely: a zero-length non-terminal chunk
    /// is legal to omit and emitting one would instead terminate the stream.
    pub fn write_chunk<B: BufMut>(&mut self, buf: &mut B, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(ProtocolError::ChunkAfterEndOfStream.into());
        }
        if data.is_empty() {
            return Ok(());
        }
        write_begin_chunk(buf, data.len());
        buf.put_slice(data);
        write_end_chunk(buf);
        Ok(())
    }

    /// Emit the terminal chunk.
    ///
    /// Returns `true` the first time; repeated calls write nothing and
    /// return `false`.
    pub fn finish<B: BufMut>(&mut self, buf: &mut B) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        write_end_of_stream(buf);
        true
    }

    /// Whether the terminal chunk has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn begin_chunk_formats_lowercase_hex() {
        let mut buf = BytesMut::new();
        write_begin_chunk(&mut buf, 0x2b);
        assert_eq!(&buf[..], b"2b\r\n");

        buf.clear();
        write_begin_chunk(&mut buf, 0);
        assert_eq!(&buf[..], b"0\r\n");

        buf.clear();
        write_begin_chunk(&mut buf, 0xdead_beef);
        assert_eq!(&buf[..], b"deadbeef\r\n");
    }

    #[test]
    fn framed_chunk_is_byte_exact() {
        let mut buf = BytesMut::new();
        write_begin_chunk(&mut buf, 5);
        buf.put_slice(b"hello");
        write_end_chunk(&mut buf);
        write_end_of_stream(&mut buf);
        assert_eq!(&buf[..], b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn encoder_skips_empty_and_finishes_once() {
        let mut enc = ChunkedEncoder::new();
        let mut buf = BytesMut::new();
        enc.write_chunk(&mut buf, b"").unwrap();
        assert!(buf.is_empty());
        enc.write_chunk(&mut buf, b"ab").unwrap();
        assert!(enc.finish(&mut buf));
        assert!(!enc.finish(&mut buf));
        assert_eq!(&buf[..], b"2\r\nab\r\n0\r\n\r\n");
    }

    #[test]
    fn encoder_rejects_writes_after_finish() {
        let mut enc = ChunkedEncoder::new();
        let mut buf = BytesMut::new();
        assert!(enc.finish(&mut buf));
        let err = enc.write_chunk(&mut buf, b"late").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::ChunkAfterEndOfStream)
        ));
    }
}
