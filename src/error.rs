//! Error handling.

use std::{io, result};

use thiserror::Error;

mod capacity_error;
mod protocol_error;

pub use self::{capacity_error::CapacityError, protocol_error::ProtocolError};

/// Result type of all `wirepipe` library calls.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Possible transport and protocol errors.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection closed normally. This informs you of the close.
    /// It's not an error as such and nothing wrong happened.
    ///
    /// Receiving this error means that the WebSocket object is not usable
    /// anymore and the only meaningful action with it is dropping it.
    #[error("Connection closed normally")]
    ConnectionClosed,
    /// Input-output error. These are generally errors with the underlying
    /// connection and you should probably consider them fatal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// An operation was attempted on a pipe side that has been completed.
    ///
    /// Completion is terminal: once a side is completed no further writes or
    /// reads on it succeed.
    #[error("Pipe has been completed")]
    PipeCompleted,
    /// - When reading: buffer capacity exhausted.
    /// - When receiving: message bigger than the configured maximum.
    #[error("Space limit exceeded: {0}")]
    Capacity(#[from] CapacityError),
    /// Protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// UTF-8 coding error.
    #[error("UTF-8 encoding error")]
    Utf8,
    /// HTTP format error.
    #[error("HTTP format error: {0}")]
    HttpFormat(#[from] http::Error),
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::TooManyHeaders => Error::Capacity(CapacityError::TooManyHeaders),
            e => Error::Protocol(ProtocolError::HttparseError(e)),
        }
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::HttpFormat(err.into())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::Utf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::Utf8
    }
}
