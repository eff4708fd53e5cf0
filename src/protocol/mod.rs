//! WebSocket protocol driver over an upgraded transport.

pub mod frame;

use std::fmt;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use self::frame::{apply_mask, generate_mask, FrameHeader, OpCode};
use crate::error::{CapacityError, Error, ProtocolError, Result};

/// Indicates a Client or Server role of the websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This socket is a server.
    Server,
    /// This socket is a client.
    Client,
}

/// Tuning for one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Interval a higher layer should ping at to detect dead connections.
    /// Recorded during the handshake; nothing in this type enforces it.
    pub keep_alive_interval: Duration,
    /// Capacity reserved per transport read.
    pub receive_buffer_size: usize,
    /// Maximum size of one (possibly fragmented) incoming message.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            keep_alive_interval: Duration::from_secs(120),
            receive_buffer_size: 4 * 1024,
            max_message_size: 64 << 20,
        }
    }
}

/// An outgoing or incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A ping with its application data.
    Ping(Bytes),
    /// A pong with its application data.
    Pong(Bytes),
    /// A close message with the optional close frame.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b.len(),
            Message::Close(Some(frame)) => 2 + frame.reason.len(),
            Message::Close(None) => 0,
        }
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The payload of a close message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// WebSocket input-output stream.
///
/// Wraps the raw duplex transport produced by a successful upgrade. Pings
/// are answered automatically during [`recv`](WebSocket::recv) and a
/// received close is echoed once, per the closing handshake.
#[derive(Debug)]
pub struct WebSocket<Io> {
    io: Io,
    role: Role,
    config: WebSocketConfig,
    read_buf: BytesMut,
    incomplete: Option<Incomplete>,
    close_sent: bool,
    close_received: bool,
}

#[derive(Debug)]
struct Incomplete {
    text: bool,
    data: Vec<u8>,
}

impl<Io> WebSocket<Io> {
    /// Wrap an already-upgraded raw stream.
    pub fn from_upgraded(io: Io, role: Role, config: WebSocketConfig) -> Self {
        WebSocket {
            io,
            role,
            config,
            read_buf: BytesMut::new(),
            incomplete: None,
            close_sent: false,
            close_received: false,
        }
    }

    /// The configuration negotiated for this connection.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Io {
        &self.io
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Io {
        &mut self.io
    }
}

impl<Io: AsyncRead + AsyncWrite + Unpin> WebSocket<Io> {
    /// Receive the next message.
    ///
    /// Returns [`Error::ConnectionClosed`] once the closing handshake has
    /// finished; that is the signal to drop the socket, not a failure.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            if self.close_received {
                return Err(Error::ConnectionClosed);
            }
            if let Some((header, payload)) = self.next_frame()? {
                trace!("received frame: {:?} ({} bytes)", header.opcode, payload.len());
                if let Some(message) = self.handle_frame(header, payload).await? {
                    return Ok(message);
                }
                continue;
            }
            self.read_buf.reserve(self.config.receive_buffer_size);
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ProtocolError::ResetWithoutClosingHandshake.into());
            }
        }
    }

    /// Send a message.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        if self.close_sent {
            return Err(ProtocolError::SendAfterClosing.into());
        }
        match message {
            Message::Text(text) => self.send_frame(OpCode::Text, text.as_bytes()).await,
            Message::Binary(data) => self.send_frame(OpCode::Binary, &data).await,
            Message::Ping(data) => self.send_frame(OpCode::Ping, &data).await,
            Message::Pong(data) => self.send_frame(OpCode::Pong, &data).await,
            Message::Close(frame) => self.close(frame).await,
        }
    }

    /// Send a close frame once and mark the socket closing.
    ///
    /// Safe to call multiple times; repeats are no-ops.
    pub async fn close(&mut self, frame: Option<CloseFrame>) -> Result<()> {
        if self.close_sent {
            return Ok(());
        }
        self.close_sent = true;
        let payload = encode_close(frame.as_ref());
        self.send_close_frame(&payload).await
    }

    fn next_frame(&mut self) -> Result<Option<(FrameHeader, BytesMut)>> {
        let Some((header, header_len)) = FrameHeader::parse(&self.read_buf)? else {
            return Ok(None);
        };
        self.check_frame(&header)?;
        let payload_len = header.payload_len as usize;
        if self.read_buf.len() < header_len + payload_len {
            return Ok(None);
        }
        self.read_buf.advance(header_len);
        let mut payload = self.read_buf.split_to(payload_len);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        Ok(Some((header, payload)))
    }

    fn check_frame(&self, header: &FrameHeader) -> Result<()> {
        match self.role {
            Role::Server if header.mask.is_none() => {
                return Err(ProtocolError::UnmaskedFrameFromClient.into());
            }
            Role::Client if header.mask.is_some() => {
                return Err(ProtocolError::MaskedFrameFromServer.into());
            }
            _ => {}
        }
        if header.opcode.is_control() {
            if !header.fin {
                return Err(ProtocolError::FragmentedControlFrame.into());
            }
            if header.payload_len > 125 {
                return Err(ProtocolError::ControlFrameTooBig.into());
            }
            return Ok(());
        }
        let pending = self.incomplete.as_ref().map_or(0, |i| i.data.len());
        let size = pending.saturating_add(header.payload_len as usize);
        if size > self.config.max_message_size {
            return Err(
                CapacityError::MessageTooLong { size, max_size: self.config.max_message_size }
                    .into(),
            );
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: BytesMut,
    ) -> Result<Option<Message>> {
        match header.opcode {
            OpCode::Ping => {
                let data = payload.freeze();
                if !self.close_sent {
                    self.send_frame(OpCode::Pong, &data).await?;
                }
                Ok(Some(Message::Ping(data)))
            }
            OpCode::Pong => Ok(Some(Message::Pong(payload.freeze()))),
            OpCode::Close => {
                self.close_received = true;
                let frame = decode_close(&payload)?;
                if !self.close_sent {
                    // Echo the close to finish the handshake.
                    self.close_sent = true;
                    let echo = encode_close(frame.as_ref());
                    self.send_close_frame(&echo).await?;
                }
                Ok(Some(Message::Close(frame)))
            }
            OpCode::Continue => {
                let mut incomplete =
                    self.incomplete.take().ok_or(ProtocolError::UnexpectedContinueFrame)?;
                incomplete.data.extend_from_slice(&payload);
                if !header.fin {
                    self.incomplete = Some(incomplete);
                    return Ok(None);
                }
                Ok(Some(assemble(incomplete)?))
            }
            OpCode::Text | OpCode::Binary => {
                if self.incomplete.is_some() {
                    return Err(ProtocolError::ExpectedFragment.into());
                }
                let incomplete = Incomplete {
                    text: header.opcode == OpCode::Text,
                    data: payload.to_vec(),
                };
                if !header.fin {
                    self.incomplete = Some(incomplete);
                    return Ok(None);
                }
                Ok(Some(assemble(incomplete)?))
            }
        }
    }

    async fn send_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mask = match self.role {
            Role::Client => Some(generate_mask()),
            Role::Server => None,
        };
        let header =
            FrameHeader { fin: true, opcode, mask, payload_len: payload.len() as u64 };
        let mut out = Vec::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut out);
        out.extend_from_slice(payload);
        if let Some(mask) = mask {
            let start = header.encoded_len();
            apply_mask(&mut out[start..], mask);
        }
        trace!("sending frame: {:?} ({} bytes)", opcode, payload.len());
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn send_close_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Close, payload).await
    }
}

fn assemble(incomplete: Incomplete) -> Result<Message> {
    if incomplete.text {
        Ok(Message::Text(String::from_utf8(incomplete.data)?))
    } else {
        Ok(Message::Binary(Bytes::from(incomplete.data)))
    }
}

fn encode_close(frame: Option<&CloseFrame>) -> Vec<u8> {
    match frame {
        None => Vec::new(),
        Some(frame) => {
            let mut payload = Vec::with_capacity(2 + frame.reason.len());
            payload.extend_from_slice(&frame.code.to_be_bytes());
            payload.extend_from_slice(frame.reason.as_bytes());
            payload
        }
    }
}

fn decode_close(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(ProtocolError::InvalidCloseSequence.into()),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = std::str::from_utf8(&payload[2..])?.to_owned();
            Ok(Some(CloseFrame { code, reason }))
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => write!(f, "Text({:?})", text),
            Message::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
            Message::Ping(data) => write!(f, "Ping({} bytes)", data.len()),
            Message::Pong(data) => write!(f, "Pong({} bytes)", data.len()),
            Message::Close(frame) => write!(f, "Close({:?})", frame),
        }
    }
}
