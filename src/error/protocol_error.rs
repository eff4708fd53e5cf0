use std::fmt;

/// Indicates the specific type/cause of a protocol error.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum ProtocolError {
    /// The request being accepted is not a WebSocket upgrade request.
    ///
    /// `accept` was called without checking the upgrade guard first; fix the
    /// call site rather than retrying.
    NotAWebSocketRequest,
    /// Wrong HTTP version used (the WebSocket protocol requires version 1.1 or higher).
    WrongHttpVersion,
    /// Missing `Sec-WebSocket-Key` HTTP header.
    MissingSecWebSocketKey,
    /// No more data while still reading the request head.
    HandshakeIncomplete,
    /// Wrapper around a [`httparse::Error`] value.
    HttparseError(httparse::Error),
    /// A chunk was written after the terminal chunk of a chunked stream.
    ChunkAfterEndOfStream,
    /// Not allowed to send after having sent a closing frame.
    SendAfterClosing,
    /// Reserved bits in frame header are non-zero.
    NonZeroReservedBits,
    /// The server must close the connection when an unmasked frame is received.
    UnmaskedFrameFromClient,
    /// The client must close the connection when a masked frame is received.
    MaskedFrameFromServer,
    /// Control frames must not be fragmented.
    FragmentedControlFrame,
    /// Control frames must have a payload of 125 bytes or less.
    ControlFrameTooBig,
    /// Received a continue frame despite there being nothing to continue.
    UnexpectedContinueFrame,
    /// Received a new data frame while waiting for more fragments.
    ExpectedFragment,
    /// Connection closed without performing the closing handshake.
    ResetWithoutClosingHandshake,
    /// Encountered an invalid opcode.
    InvalidOpcode(u8),
    /// The payload for the closing frame is invalid.
    InvalidCloseSequence,
}

impl fmt::Debug for ProtocolError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NotAWebSocketRequest => write!(f, "Request is not a WebSocket upgrade request"),
            Self::WrongHttpVersion => write!(f, "HTTP version must be 1.1 or higher"),
            Self::MissingSecWebSocketKey => write!(f, "No \"Sec-WebSocket-Key\" header"),
            Self::HandshakeIncomplete => write!(f, "Handshake not finished"),
            Self::HttparseError(e) => write!(f, "httparse error: {}", e),
            Self::ChunkAfterEndOfStream => {
                write!(f, "Chunk written after the end-of-stream chunk")
            }
            Self::SendAfterClosing => write!(f, "Sending after closing is not allowed"),
            Self::NonZeroReservedBits => write!(f, "Reserved bits are non-zero"),
            Self::UnmaskedFrameFromClient => write!(f, "Received an unmasked frame from client"),
            Self::MaskedFrameFromServer => write!(f, "Received a masked frame from server"),
            Self::FragmentedControlFrame => write!(f, "Fragmented control frame"),
            Self::ControlFrameTooBig => {
                write!(f, "Control frame too big (payload must be 125 bytes or less)")
            }
            Self::UnexpectedContinueFrame => write!(f, "Continue frame but nothing to continue"),
            Self::ExpectedFragment => write!(f, "While waiting for more fragments received a new message"),
            Self::ResetWithoutClosingHandshake => {
                write!(f, "Connection reset without closing handshake")
            }
            Self::InvalidOpcode(opcode) => write!(f, "Encountered invalid opcode: {}", opcode),
            Self::InvalidCloseSequence => write!(f, "Invalid close sequence"),
        }
    }
}

impl fmt::Display for ProtocolError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for ProtocolError {}
