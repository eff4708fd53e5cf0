//! Backpressure and completion behavior of the duplex pipe, observed
//! across both halves the way the transport pumps and protocol parsers
//! use them.

use std::io;

use futures::poll;
use wirepipe::pipe::{pipe, PipeOptions};
use wirepipe::{BlockPool, Error};

#[tokio::test]
async fn flush_pauses_over_threshold_and_resumes_after_consume() {
    env_logger::try_init().ok();
    let options = PipeOptions { pause_writer_threshold: 8, resume_writer_threshold: 4 };
    let (mut reader, mut writer) = pipe(BlockPool::new(), options);

    writer.reserve(16).unwrap()[..16].copy_from_slice(&[7u8; 16]);
    writer.commit(16);
    let mut flush = writer.flush();
    assert!(poll!(&mut flush).is_pending());

    let read = reader.read().await.unwrap();
    assert_eq!(read.buffered, 16);

    // Draining to the resume threshold releases the parked flush.
    reader.consume(12, 12);
    let result = flush.await.unwrap();
    assert!(!result.is_completed);
}

#[tokio::test]
async fn writer_completion_releases_a_parked_flush() {
    let options = PipeOptions { pause_writer_threshold: 8, resume_writer_threshold: 4 };
    let (_reader, mut writer) = pipe(BlockPool::new(), options);

    writer.reserve(16).unwrap()[..16].copy_from_slice(&[3u8; 16]);
    writer.commit(16);
    let mut flush = writer.flush();
    assert!(poll!(&mut flush).is_pending());

    // Teardown must not leave the producer hanging on backpressure.
    writer.complete(None);
    let result = flush.await.unwrap();
    assert!(result.is_completed);
}

#[tokio::test]
async fn flush_reports_consumer_completion() {
    let (reader, mut writer) = pipe(BlockPool::new(), PipeOptions::default());
    drop(reader);

    writer.reserve(3).unwrap()[..3].copy_from_slice(b"xyz");
    writer.commit(3);
    let result = writer.flush().await.unwrap();
    assert!(result.is_completed);
}

#[tokio::test]
async fn error_completion_resolves_pending_read_and_sticks() {
    let (mut reader, mut writer) = pipe(BlockPool::new(), PipeOptions::default());

    let mut read = reader.read();
    assert!(poll!(&mut read).is_pending());
    writer.complete(Some(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")));

    let err = read.await.unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));

    // Every subsequent read reports the same terminal error.
    let err = reader.read().await.unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
}

#[tokio::test]
async fn data_published_before_error_is_still_readable() {
    let (mut reader, mut writer) = pipe(BlockPool::new(), PipeOptions::default());

    writer.reserve(4).unwrap()[..4].copy_from_slice(b"tail");
    writer.commit(4);
    writer.complete(Some(io::Error::new(io::ErrorKind::BrokenPipe, "lost")));

    let read = reader.read().await.unwrap();
    assert_eq!(read.buffered, 4);
    assert_eq!(reader.buffer().to_vec(), b"tail");
    reader.consume(4, 4);

    let err = reader.read().await.unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
}

#[tokio::test]
async fn completed_writer_rejects_further_use() {
    let (_reader, mut writer) = pipe(BlockPool::new(), PipeOptions::default());
    writer.complete(None);

    assert!(matches!(writer.reserve(1), Err(Error::PipeCompleted)));
    assert!(matches!(writer.flush().await, Err(Error::PipeCompleted)));
    // Completing again is a no-op.
    writer.complete(None);
}

#[tokio::test]
async fn eof_is_observed_after_buffered_data_drains() {
    let (mut reader, mut writer) = pipe(BlockPool::new(), PipeOptions::default());

    writer.reserve(5).unwrap()[..5].copy_from_slice(b"final");
    writer.commit(5);
    writer.complete(None);

    let read = reader.read().await.unwrap();
    assert_eq!(reader.buffer().to_vec(), b"final");
    assert!(read.is_completed);
    reader.consume(read.buffered, read.buffered);

    let read = reader.read().await.unwrap();
    assert_eq!(read.buffered, 0);
    assert!(read.is_completed);
}
