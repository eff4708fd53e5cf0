//! WebSocket upgrade handshake (RFC 6455 section 1.3).

pub mod server;

use data_encoding::BASE64;
use sha1::{Digest, Sha1};

/// Limit the number of header lines.
pub(crate) const MAX_HEADERS: usize = 124;

/// Turn a `Sec-WebSocket-Key` into a `Sec-WebSocket-Accept`.
///
/// The accept value proves the server understood the upgrade request: the
/// key is concatenated with the fixed GUID from RFC 6455, SHA-1 hashed and
/// base64 encoded.
pub fn derive_accept_key(key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// True if a comma-separated header value contains `token`, matched
/// ASCII case-insensitively with surrounding whitespace ignored.
pub(crate) fn header_contains_token(value: &[u8], token: &str) -> bool {
    value.split(|&b| b == b',').any(|part| {
        std::str::from_utf8(part)
            .map(|part| part.trim().eq_ignore_ascii_case(token))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conversion() {
        // example from RFC 6455
        assert_eq!(
            derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn token_matching() {
        assert!(header_contains_token(b"Upgrade", "upgrade"));
        assert!(header_contains_token(b"keep-alive, Upgrade", "upgrade"));
        assert!(header_contains_token(b"keep-alive,Upgrade", "upgrade"));
        assert!(!header_contains_token(b"keep-alive", "upgrade"));
        assert!(!header_contains_token(b"upgraded", "upgrade"));
    }
}
