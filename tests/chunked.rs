//! Chunked transfer-coding output, decoded back with a small standalone
//! parser to check the wire format end to end.

use wirepipe::chunk::{self, ChunkedEncoder};
use wirepipe::error::{Error, ProtocolError};
use wirepipe::output::SocketOutput;
use wirepipe::pipe::{pipe, PipeOptions};
use wirepipe::pipeline::write_output;
use wirepipe::BlockPool;

/// Decode a chunked body; returns the payload and whether the terminal
/// chunk was present.
fn decode_chunked(mut input: &[u8]) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        if input.is_empty() {
            return (body, false);
        }
        let line_end =
            input.windows(2).position(|w| w == b"\r\n").expect("chunk size line");
        let size_str = std::str::from_utf8(&input[..line_end]).unwrap();
        let size = usize::from_str_radix(size_str, 16).unwrap();
        input = &input[line_end + 2..];
        if size == 0 {
            assert_eq!(input, b"\r\n", "terminal chunk trailer");
            return (body, true);
        }
        body.extend_from_slice(&input[..size]);
        assert_eq!(&input[size..size + 2], b"\r\n", "chunk data trailer");
        input = &input[size + 2..];
    }
}

#[test]
fn single_chunk_wire_format() {
    let mut buf = Vec::new();
    chunk::write_begin_chunk(&mut buf, 5);
    buf.extend_from_slice(b"hello");
    chunk::write_end_chunk(&mut buf);
    chunk::write_end_of_stream(&mut buf);
    assert_eq!(buf, b"5\r\nhello\r\n0\r\n\r\n");
}

#[test]
fn encoder_round_trips_various_sizes() {
    for size in [1usize, 9, 15, 16, 100, 4096, 70_000] {
        let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
        let mut wire = Vec::new();
        let mut encoder = ChunkedEncoder::new();
        for part in payload.chunks(1000) {
            encoder.write_chunk(&mut wire, part).unwrap();
        }
        assert!(encoder.finish(&mut wire));

        let (decoded, terminated) = decode_chunked(&wire);
        assert_eq!(decoded, payload, "payload of size {}", size);
        assert!(terminated);
    }
}

#[test]
fn empty_chunks_are_skipped() {
    let mut wire = Vec::new();
    let mut encoder = ChunkedEncoder::new();
    encoder.write_chunk(&mut wire, b"").unwrap();
    assert!(wire.is_empty());
}

#[test]
fn terminal_chunk_is_written_exactly_once() {
    let mut wire = Vec::new();
    let mut encoder = ChunkedEncoder::new();
    encoder.write_chunk(&mut wire, b"data").unwrap();
    assert!(encoder.finish(&mut wire));
    assert!(!encoder.finish(&mut wire));
    assert!(encoder.is_finished());

    let err = encoder.write_chunk(&mut wire, b"late").unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::ChunkAfterEndOfStream)));

    let (decoded, terminated) = decode_chunked(&wire);
    assert_eq!(decoded, b"data");
    assert!(terminated);
}

#[tokio::test]
async fn chunked_response_streams_through_the_output_pump() {
    let (reader, writer) = pipe(BlockPool::new(), PipeOptions::default());
    let output = SocketOutput::new(writer);

    output.write(b"first part, ", true).await.unwrap();
    output.write(b"second part", true).await.unwrap();
    output.write(b"0\r\n\r\n", false).await.unwrap();
    output.complete();

    let mut sink = Vec::new();
    write_output(&mut sink, reader).await.unwrap();

    let (decoded, terminated) = decode_chunked(&sink);
    assert_eq!(decoded, b"first part, second part");
    assert!(terminated);
}
