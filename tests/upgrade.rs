//! End-to-end WebSocket upgrade over an in-memory transport: the server
//! drives an adapted pipeline, parses the request head, performs the
//! handshake and then exchanges frames with a raw client on the other end.

use http::{Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wirepipe::handshake::server::{
    read_request, write_response, AcceptOptions, UpgradableConnection, WebSocketUpgrade,
};
use wirepipe::pipe::PipeOptions;
use wirepipe::protocol::{Message, Role, WebSocket, WebSocketConfig};
use wirepipe::{AdaptedPipeline, BlockPool, Error};

const UPGRADE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: example.com\r\n\
    Connection: Upgrade\r\n\
    Upgrade: websocket\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Protocol: chat\r\n\
    \r\n";

const PLAIN_REQUEST: &[u8] = b"GET /page HTTP/1.1\r\nHost: example.com\r\n\r\n";

/// Read the response head from the raw client side of the transport.
async fn read_response_head(io: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        io.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn upgrade_and_echo() {
    env_logger::try_init().ok();
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let pool = BlockPool::new();
        let (pipeline, mut input, output) = AdaptedPipeline::new(&pool, PipeOptions::default());
        let driver = tokio::spawn(pipeline.run(server_io));

        let request = read_request(&mut input, 8 * 1024).await.unwrap();
        assert_eq!(request.uri(), "/chat");

        let upgrade =
            WebSocketUpgrade::new(UpgradableConnection::new(input, output), request);
        assert!(upgrade.is_websocket_request());

        let options =
            AcceptOptions { sub_protocol: Some("chat".into()), ..AcceptOptions::default() };
        let mut socket = upgrade.accept(options).await.unwrap();

        loop {
            match socket.recv().await {
                Ok(Message::Text(text)) => {
                    socket.send(Message::Text(format!("echo: {}", text))).await.unwrap()
                }
                Ok(Message::Close(_)) | Err(Error::ConnectionClosed) => break,
                Ok(other) => panic!("unexpected message: {}", other),
                Err(e) => panic!("server recv failed: {}", e),
            }
        }
        drop(socket);
        driver.await.unwrap().unwrap();
    });

    client_io.write_all(UPGRADE_REQUEST).await.unwrap();

    let head = read_response_head(&mut client_io).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "head: {head}");
    assert!(head.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), "head: {head}");
    assert!(head.contains("sec-websocket-protocol: chat"), "head: {head}");

    let mut client =
        WebSocket::from_upgraded(client_io, Role::Client, WebSocketConfig::default());
    client.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Message::Text("echo: hello".into()));

    client.close(None).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Message::Close(None));
    drop(client);

    server.await.unwrap();
}

#[tokio::test]
async fn rejected_handshake_falls_back_to_plain_http() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let pool = BlockPool::new();
        let (pipeline, mut input, output) = AdaptedPipeline::new(&pool, PipeOptions::default());
        let driver = tokio::spawn(pipeline.run(server_io));

        let request = read_request(&mut input, 8 * 1024).await.unwrap();
        let upgrade =
            WebSocketUpgrade::new(UpgradableConnection::new(input, output.clone()), request);
        assert!(!upgrade.is_websocket_request());

        // Accepting anyway is a programmer error that leaves the transport
        // untouched, so an ordinary response still goes through.
        let err = upgrade.accept(AcceptOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let response =
            Response::builder().status(StatusCode::BAD_REQUEST).body(()).unwrap();
        write_response(&output, &response).await.unwrap();
        output.complete();
        driver.await.unwrap().unwrap();
    });

    client_io.write_all(PLAIN_REQUEST).await.unwrap();
    let head = read_response_head(&mut client_io).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "head: {head}");

    drop(client_io);
    server.await.unwrap();
}

#[tokio::test]
async fn request_head_split_across_reads_is_reassembled() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let pool = BlockPool::new();
        let (pipeline, mut input, output) = AdaptedPipeline::new(&pool, PipeOptions::default());
        let driver = tokio::spawn(pipeline.run(server_io));

        let request = read_request(&mut input, 8 * 1024).await.unwrap();
        assert_eq!(request.uri(), "/chat");
        assert_eq!(request.headers()["host"], "example.com");

        output.complete();
        drop(input);
        driver.await.unwrap().unwrap();
    });

    // Deliver the head in small pieces with write boundaries mid-header.
    for piece in UPGRADE_REQUEST.chunks(7) {
        client_io.write_all(piece).await.unwrap();
        client_io.flush().await.unwrap();
        tokio::task::yield_now().await;
    }
    drop(client_io);
    server.await.unwrap();
}
