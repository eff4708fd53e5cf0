//! Connection transport core for HTTP/1.1 servers.
//!
//! This crate provides the plumbing between a raw socket and an HTTP
//! application: a pooled duplex byte pipe with backpressure, the chunked
//! transfer-coding writer, the transport pumps that adapt a socket into
//! pipe halves, and the server side of the WebSocket upgrade handshake
//! with a small RFC 6455 frame driver for upgraded connections.
//!
//! The building blocks compose bottom-up. [`AdaptedPipeline`] owns the two
//! pipes of one connection and pumps them against any
//! `AsyncRead + AsyncWrite` transport; the application reads request bytes
//! from the [`PipeReader`] it hands out and writes response bytes through
//! [`SocketOutput`], optionally chunk-framed. [`WebSocketUpgrade`] takes it
//! from there when a connection asks to leave HTTP mode.

#![deny(
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub use http;

pub mod buffer;
pub mod chunk;
pub mod error;
pub mod handshake;
pub mod output;
pub mod pipe;
pub mod pipeline;
pub mod protocol;
pub mod stream;

pub use crate::buffer::BlockPool;
pub use crate::error::{Error, Result};
pub use crate::handshake::server::{AcceptOptions, UpgradeTransport, WebSocketUpgrade};
pub use crate::output::SocketOutput;
pub use crate::pipe::{pipe, PipeOptions, PipeReader, PipeWriter};
pub use crate::pipeline::AdaptedPipeline;
pub use crate::protocol::{Message, Role, WebSocket, WebSocketConfig};
pub use crate::stream::PipeStream;
