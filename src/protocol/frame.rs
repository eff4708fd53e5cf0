//! WebSocket frame codec (RFC 6455 section 5).

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

/// A frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continue,
    /// Text data.
    Text,
    /// Binary data.
    Binary,
    /// Close handshake.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    /// True for control opcodes (close, ping, pong).
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    fn from_u8(code: u8) -> Result<OpCode> {
        match code {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xa => Ok(OpCode::Pong),
            other => Err(ProtocolError::InvalidOpcode(other).into()),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xa,
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on all client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl FrameHeader {
    /// Try to parse a header from the start of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the header
    /// and its encoded size. Non-zero reserved bits are rejected (no
    /// extension is negotiated by this crate).
    pub fn parse(data: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }
        let first = data[0];
        let second = data[1];
        if first & 0x70 != 0 {
            return Err(ProtocolError::NonZeroReservedBits.into());
        }
        let fin = first & 0x80 != 0;
        let opcode = OpCode::from_u8(first & 0x0f)?;
        let masked = second & 0x80 != 0;

        let mut pos = 2;
        let payload_len = match second & 0x7f {
            126 => {
                if data.len() < pos + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as u64;
                pos += 2;
                len
            }
            127 => {
                if data.len() < pos + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[pos..pos + 8]);
                pos += 8;
                u64::from_be_bytes(bytes)
            }
            len => len as u64,
        };

        let mask = if masked {
            if data.len() < pos + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&data[pos..pos + 4]);
            pos += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((FrameHeader { fin, opcode, mask, payload_len }, pos)))
    }

    /// Append the encoded header to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let first = (u8::from(self.fin) << 7) | self.opcode.as_u8();
        let masked_bit = if self.mask.is_some() { 0x80 } else { 0 };
        buf.put_u8(first);
        match self.payload_len {
            len if len < 126 => buf.put_u8(masked_bit | len as u8),
            len if len <= u16::MAX as u64 => {
                buf.put_u8(masked_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(masked_bit | 127);
                buf.put_u64(len);
            }
        }
        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }

    /// Size of the encoded header in bytes.
    pub fn encoded_len(&self) -> usize {
        let len_bytes = match self.payload_len {
            len if len < 126 => 0,
            len if len <= u16::MAX as u64 => 2,
            _ => 8,
        };
        2 + len_bytes + if self.mask.is_some() { 4 } else { 0 }
    }
}

/// Generate a random frame mask.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

/// Mask/unmask a frame payload in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
