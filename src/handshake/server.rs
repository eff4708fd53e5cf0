//! Server side of the WebSocket upgrade.
//!
//! The handshake sits at the boundary between the hosting layer and the
//! transport: [`is_websocket_request`] decides whether a request qualifies,
//! and [`WebSocketUpgrade::accept`] computes the accept key, writes the
//! `101 Switching Protocols` response through the hosting layer's
//! [`UpgradeTransport`] and wraps the now-raw stream in a
//! [`WebSocket`](crate::protocol::WebSocket).

use std::time::Duration;

use http::{header, Method, Request, Response, StatusCode, Version};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{derive_accept_key, header_contains_token, MAX_HEADERS};
use crate::error::{CapacityError, Error, ProtocolError, Result};
use crate::output::SocketOutput;
use crate::pipe::PipeReader;
use crate::protocol::{Role, WebSocket, WebSocketConfig};
use crate::stream::PipeStream;

/// Keep-alive interval applied when neither the accept options nor the
/// connection specify one.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Receive buffer size applied when unspecified.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4 * 1024;

/// Per-accept options; unset fields fall back to connection-level defaults.
#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    /// Sub-protocol to negotiate in `Sec-WebSocket-Protocol`.
    pub sub_protocol: Option<String>,
    /// Interval a higher layer should ping at; recorded, not enforced here.
    pub keep_alive_interval: Option<Duration>,
    /// Receive buffer size for the resulting WebSocket.
    pub receive_buffer_size: Option<usize>,
}

/// Hosting-layer upgrade feature.
///
/// Exposes whether the underlying transport can leave HTTP mode at all and,
/// if so, performs the switch: send the (implicitly 101) response and hand
/// back the raw duplex stream. A transport that is not upgradable simply
/// never offers a WebSocket; that case is feature detection upstream, not an
/// error here.
#[allow(async_fn_in_trait)]
pub trait UpgradeTransport {
    /// Raw stream produced by a successful upgrade.
    type Io: AsyncRead + AsyncWrite + Unpin;

    /// Whether an opaque upgrade is supported on this connection.
    fn is_upgradable(&self) -> bool;

    /// Send `response` and switch the transport to raw duplex mode.
    async fn upgrade(self, response: Response<()>) -> Result<Self::Io>;
}

/// One upgradeable request: the inbound request head plus the transport it
/// arrived on. Constructed per request and discarded after
/// [`accept`](WebSocketUpgrade::accept) or once the request completes
/// without upgrading.
#[derive(Debug)]
pub struct WebSocketUpgrade<T> {
    transport: T,
    request: Request<()>,
}

impl<T: UpgradeTransport> WebSocketUpgrade<T> {
    /// Pair a parsed request head with its transport.
    pub fn new(transport: T, request: Request<()>) -> Self {
        WebSocketUpgrade { transport, request }
    }

    /// The inbound request head.
    pub fn request(&self) -> &Request<()> {
        &self.request
    }

    /// Guard: true iff the transport supports an opaque upgrade and the
    /// request carries the full WebSocket header set.
    pub fn is_websocket_request(&self) -> bool {
        self.transport.is_upgradable() && is_websocket_request(&self.request)
    }

    /// Accept the upgrade and return the live WebSocket.
    ///
    /// Calling this on a request that does not satisfy
    /// [`is_websocket_request`](Self::is_websocket_request) is a programmer
    /// error and fails fast with
    /// [`ProtocolError::NotAWebSocketRequest`]; the transport is not
    /// touched in that case, so the caller can still send an ordinary HTTP
    /// response (e.g. 400).
    pub async fn accept(self, options: AcceptOptions) -> Result<WebSocket<T::Io>> {
        if !self.is_websocket_request() {
            return Err(ProtocolError::NotAWebSocketRequest.into());
        }
        let config = WebSocketConfig {
            keep_alive_interval: options
                .keep_alive_interval
                .unwrap_or(DEFAULT_KEEP_ALIVE_INTERVAL),
            receive_buffer_size: options
                .receive_buffer_size
                .unwrap_or(DEFAULT_RECEIVE_BUFFER_SIZE),
            ..WebSocketConfig::default()
        };
        if let Some(proto) = options.sub_protocol.as_deref() {
            if !client_offered_protocol(&self.request, proto) {
                warn!("sub-protocol {:?} was not offered by the client", proto);
            }
        }
        let response = create_response(&self.request, options.sub_protocol.as_deref())?;
        debug!("accepting WebSocket upgrade for {}", self.request.uri());
        let io = self.transport.upgrade(response).await?;
        Ok(WebSocket::from_upgraded(io, Role::Server, config))
    }
}

/// True iff `request` carries a well-formed WebSocket upgrade:
/// method GET, HTTP/1.1 or higher, `Connection` containing the `upgrade`
/// token, `Upgrade` containing `websocket`, `Sec-WebSocket-Version: 13`
/// and a non-empty `Sec-WebSocket-Key`.
pub fn is_websocket_request<T>(request: &Request<T>) -> bool {
    if request.method() != Method::GET || request.version() < Version::HTTP_11 {
        return false;
    }
    let headers = request.headers();
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .any(|v| header_contains_token(v.as_bytes(), "upgrade"));
    let upgrade_websocket = headers
        .get_all(header::UPGRADE)
        .iter()
        .any(|v| header_contains_token(v.as_bytes(), "websocket"));
    let version_13 = headers
        .get_all(header::SEC_WEBSOCKET_VERSION)
        .iter()
        .any(|v| header_contains_token(v.as_bytes(), "13"));
    let has_key = headers.get(header::SEC_WEBSOCKET_KEY).is_some_and(|v| !v.is_empty());
    connection_upgrade && upgrade_websocket && version_13 && has_key
}

/// Build the `101 Switching Protocols` response for a valid upgrade request.
pub fn create_response<T>(
    request: &Request<T>,
    sub_protocol: Option<&str>,
) -> Result<Response<()>> {
    let key = request
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(Error::Protocol(ProtocolError::MissingSecWebSocketKey))?;
    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .version(Version::HTTP_11)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()));
    if let Some(proto) = sub_protocol {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, proto);
    }
    Ok(builder.body(())?)
}

/// Read an HTTP/1.1 request head from the connection input.
///
/// Waits for a complete head using the pipe's consumed/examined positions:
/// partial data is examined but left buffered, so each new transport read
/// resumes parsing from the start without losing bytes. The head is limited
/// to `max_header_bytes`.
pub async fn read_request(reader: &mut PipeReader, max_header_bytes: usize) -> Result<Request<()>> {
    let mut head = Vec::new();
    loop {
        let read = reader.read().await?;
        head.clear();
        for segment in reader.buffer().chunks() {
            head.extend_from_slice(segment);
        }
        if head.len() > max_header_bytes {
            return Err(CapacityError::HeaderTooLong.into());
        }

        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut header_buf);
        match parsed.parse(&head)? {
            httparse::Status::Complete(size) => {
                let request = into_request(parsed)?;
                reader.consume(size, size);
                return Ok(request);
            }
            httparse::Status::Partial => {
                if read.is_completed {
                    return Err(ProtocolError::HandshakeIncomplete.into());
                }
                let examined = head.len();
                reader.consume(0, examined);
            }
        }
    }
}

fn into_request(parsed: httparse::Request<'_, '_>) -> Result<Request<()>> {
    // httparse only reports these as None for partial parses.
    let method = parsed.method.ok_or(ProtocolError::HandshakeIncomplete)?;
    let path = parsed.path.ok_or(ProtocolError::HandshakeIncomplete)?;
    let version = match parsed.version.ok_or(ProtocolError::HandshakeIncomplete)? {
        0 => Version::HTTP_10,
        1 => Version::HTTP_11,
        _ => return Err(ProtocolError::WrongHttpVersion.into()),
    };
    let mut builder = Request::builder().method(method).uri(path).version(version);
    for header in parsed.headers {
        builder = builder.header(header.name, header.value);
    }
    Ok(builder.body(())?)
}

/// Serialize a response head through the connection output.
///
/// Used both for the 101 upgrade response and for ordinary failure
/// responses (a rejected handshake manifests to the client as plain HTTP,
/// e.g. a 400, never as a broken upgrade).
pub async fn write_response(output: &SocketOutput, response: &Response<()>) -> Result<()> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(b"HTTP/1.1 ");
    head.extend_from_slice(response.status().as_str().as_bytes());
    if let Some(reason) = response.status().canonical_reason() {
        head.push(b' ');
        head.extend_from_slice(reason.as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    for (name, value) in response.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    output.write(&head, false).await
}

/// Ready-made [`UpgradeTransport`] over a connection's pipeline ends.
///
/// On upgrade it writes the response through the output, recovers the raw
/// pipe writer and yields a [`PipeStream`]. The [`SocketOutput`] handle must
/// be the sole one, otherwise the writer cannot be recovered.
#[derive(Debug)]
pub struct UpgradableConnection {
    reader: PipeReader,
    output: SocketOutput,
}

impl UpgradableConnection {
    /// Take over the application-facing ends of a connection.
    pub fn new(reader: PipeReader, output: SocketOutput) -> Self {
        UpgradableConnection { reader, output }
    }
}

impl UpgradeTransport for UpgradableConnection {
    type Io = PipeStream;

    fn is_upgradable(&self) -> bool {
        !self.output.is_completed()
    }

    async fn upgrade(self, response: Response<()>) -> Result<PipeStream> {
        write_response(&self.output, &response).await?;
        let writer = self.output.into_inner().ok_or(Error::PipeCompleted)?;
        Ok(PipeStream::new(self.reader, writer))
    }
}

fn client_offered_protocol<T>(request: &Request<T>, proto: &str) -> bool {
    request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .any(|v| header_contains_token(v.as_bytes(), proto))
}
