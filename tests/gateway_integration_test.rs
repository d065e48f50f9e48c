//! End-to-end tests for the buffered lazy-stream path: a real server on an
//! ephemeral port, a scripted fake backend, and raw TCP clients.

mod support;

use support::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_get_streams_exact_bytes() {
    let body = test_body(100_000);
    let expected = body.clone();

    let (backend, _seen) = spawn_backend(move |method, _| match method {
        "HEAD" => vec![metadata_response(body.len())],
        // Body delivered in four installments to force chunked reads
        "GET" => {
            let quarter = body.len() / 4;
            let mut first = metadata_response(body.len());
            first.extend_from_slice(&body[..quarter]);
            vec![
                first,
                body[quarter..2 * quarter].to_vec(),
                body[2 * quarter..3 * quarter].to_vec(),
                body[3 * quarter..].to_vec(),
            ]
        }
        _ => vec![status_only_response(405, "Method Not Allowed")],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let response = send_request(gateway, &get_request("bucket", "large.bin")).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/octet-stream"));
    assert_eq!(response.header("content-length"), Some("100000"));
    assert_eq!(response.header("etag"), Some("\"etag-1\""));
    assert_eq!(
        response.header("last-modified"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT")
    );
    assert_eq!(response.header("connection"), Some("close"));
    assert_eq!(response.body, expected);
}

#[tokio::test]
async fn test_head_returns_metadata_without_body_fetch() {
    let (backend, seen) = spawn_backend(|method, _| match method {
        "HEAD" => vec![metadata_response(4096)],
        _ => vec![status_only_response(500, "Internal Server Error")],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let response = send_request(gateway, &head_request("bucket", "doc.pdf")).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-length"), Some("4096"));
    assert_eq!(response.header("etag"), Some("\"etag-1\""));
    assert!(response.body.is_empty());

    // The metadata fetch is the only upstream call a HEAD makes
    assert_eq!(
        seen_calls(&seen),
        vec![("HEAD".to_string(), "/bucket/doc.pdf".to_string())]
    );
}

#[tokio::test]
async fn test_untyped_object_defaults_to_backend_content_type() {
    // Metadata without a Content-Type header
    let (backend, _seen) = spawn_backend(|method, _| match method {
        "HEAD" => vec![
            b"HTTP/1.1 200 OK\r\n\
              Content-Length: 3\r\n\
              ETag: \"etag-1\"\r\n\
              Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
              Connection: close\r\n\r\n"
                .to_vec(),
        ],
        _ => vec![],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let response = send_request(gateway, &head_request("bucket", "untyped")).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("binary/octet-stream"));
}

#[tokio::test]
async fn test_repeated_get_is_identical() {
    let body = test_body(2048);
    let (backend, _seen) = spawn_backend(move |method, _| match method {
        "HEAD" => vec![metadata_response(body.len())],
        "GET" => vec![object_response(&body)],
        _ => vec![],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let first = send_request(gateway, &get_request("bucket", "stable.bin")).await;
    let second = send_request(gateway, &get_request("bucket", "stable.bin")).await;

    assert_eq!(first.status, second.status);
    assert_eq!(first.headers, second.headers);
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn test_virtual_hosted_request_hits_same_object() {
    let body = b"virtual-hosted payload".to_vec();
    let (backend, seen) = spawn_backend(move |method, _| match method {
        "HEAD" => vec![metadata_response(body.len())],
        "GET" => vec![object_response(&body)],
        _ => vec![],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let raw = format!(
        "GET /data/file.txt HTTP/1.1\r\nHost: my-bucket.{}\r\nConnection: close\r\n\r\n",
        TEST_DOMAIN
    );
    let response = send_request(gateway, &raw).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"virtual-hosted payload");

    // The backend always sees the path-style address
    for (_, path) in seen_calls(&seen) {
        assert_eq!(path, "/my-bucket/data/file.txt");
    }
}

#[tokio::test]
async fn test_missing_object_maps_to_404() {
    let (backend, _seen) = spawn_backend(|_, _| {
        vec![status_only_response(404, "Not Found")]
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let response = send_request(gateway, &get_request("bucket", "missing.txt")).await;

    assert_eq!(response.status, 404);
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.body_text(), "not found");
    assert_eq!(response.header("connection"), Some("close"));

    // HEAD on a missing object gets the same verdict
    let response = send_request(gateway, &head_request("bucket", "missing.txt")).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body_text(), "not found");
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_heads() {
    let (backend, seen) = spawn_backend(|method, _| match method {
        "HEAD" => vec![metadata_response(10)],
        _ => vec![],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let mut stream = TcpStream::connect(gateway).await.unwrap();

    // First request leaves the connection open
    let raw = format!(
        "HEAD /bucket/a HTTP/1.1\r\nHost: {}\r\n\r\n",
        TEST_DOMAIN
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let first = read_response_head(&mut stream).await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.to_ascii_lowercase().contains("connection: keep-alive"));

    // Second request on the same connection, then close
    let raw = format!(
        "HEAD /bucket/b HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        TEST_DOMAIN
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    let second = parse_response(&rest);

    assert_eq!(second.status, 200);
    assert_eq!(second.header("connection"), Some("close"));
    assert_eq!(
        seen_calls(&seen),
        vec![
            ("HEAD".to_string(), "/bucket/a".to_string()),
            ("HEAD".to_string(), "/bucket/b".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_keep_alive_survives_a_streamed_get() {
    let body = test_body(20_000);
    let expected = body.clone();

    let (backend, _seen) = spawn_backend(move |method, _| match method {
        "HEAD" => vec![metadata_response(body.len())],
        "GET" => {
            let half = body.len() / 2;
            let mut first = metadata_response(body.len());
            first.extend_from_slice(&body[..half]);
            vec![first, body[half..].to_vec()]
        }
        _ => vec![],
    })
    .await;

    let (gateway, _coordinator) = start_gateway(backend, false).await;
    let mut stream = TcpStream::connect(gateway).await.unwrap();

    // A GET without Connection: close; the streamed body must complete and
    // leave the connection usable
    let raw = format!(
        "GET /bucket/reused.bin HTTP/1.1\r\nHost: {}\r\n\r\n",
        TEST_DOMAIN
    );
    stream.write_all(raw.as_bytes()).await.unwrap();

    let (head, mut received) = read_response_start(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.to_ascii_lowercase().contains("connection: keep-alive"));
    while received.len() < expected.len() {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        received.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(received, expected);

    // Second request on the same connection
    let raw = format!(
        "HEAD /bucket/reused.bin HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        TEST_DOMAIN
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    let second = parse_response(&rest);

    assert_eq!(second.status, 200);
    assert_eq!(second.header("content-length"), Some("20000"));
}

/// Read one response head (through the blank line) off an open connection
async fn read_response_head(stream: &mut TcpStream) -> String {
    read_response_start(stream).await.0
}

/// Read one response head plus whatever body bytes arrived with it
async fn read_response_start(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..pos + 4]).to_string();
            return (head, buffer[pos + 4..].to_vec());
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a full response head");
        buffer.extend_from_slice(&chunk[..n]);
    }
}
