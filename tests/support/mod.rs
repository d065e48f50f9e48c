//! Shared fixtures for the integration tests: a scripted fake storage
//! backend, a full gateway stack on an ephemeral port, and a raw HTTP/1.1
//! test client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use s3_gateway::config::{CredentialsConfig, StorageConfig};
use s3_gateway::credentials::CredentialCache;
use s3_gateway::gateway::Gateway;
use s3_gateway::passthrough::PassthroughResponder;
use s3_gateway::resolver::Resolver;
use s3_gateway::s3_client::S3Client;
use s3_gateway::server::Server;
use s3_gateway::shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Domain the test gateway uses for virtual-hosted addressing
pub const TEST_DOMAIN: &str = "gateway.test";

/// One request as observed by the fake backend
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub raw_head: String,
}

impl SeenRequest {
    /// Case-insensitive single-header lookup against the observed head
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.raw_head.lines().find_map(|line| {
            let lower = line.to_ascii_lowercase();
            lower
                .starts_with(&prefix)
                .then(|| line[prefix.len()..].trim().to_string())
        })
    }
}

/// Fake storage backend on an ephemeral port.
///
/// The script maps (method, path) to response segments; each segment is
/// written and flushed separately with a short pause in between, so a
/// multi-segment script exercises partial reads on the gateway side. The
/// connection is closed after the last segment.
pub async fn spawn_backend<F>(script: F) -> (SocketAddr, Arc<Mutex<Vec<SeenRequest>>>)
where
    F: Fn(&str, &str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(script);

    let record = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let record = Arc::clone(&record);
            let script = Arc::clone(&script);

            tokio::spawn(async move {
                let raw_head = match read_head(&mut stream).await {
                    Some(head) => head,
                    None => return,
                };

                let request_line = raw_head.lines().next().unwrap_or_default();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                record.lock().unwrap().push(SeenRequest {
                    method: method.clone(),
                    path: path.clone(),
                    raw_head,
                });

                let segments = script(&method, &path);
                let pause = segments.len() > 1;
                for segment in segments {
                    if stream.write_all(&segment).await.is_err() {
                        return;
                    }
                    let _ = stream.flush().await;
                    if pause {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, seen)
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&buffer[..pos]).to_string());
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// 200 response to a HEAD, metadata only
pub fn metadata_response(content_length: usize) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Length: {}\r\n\
         ETag: \"etag-1\"\r\n\
         Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
         Connection: close\r\n\r\n",
        content_length
    )
    .into_bytes()
}

/// 200 response carrying the full body in one segment
pub fn object_response(body: &[u8]) -> Vec<u8> {
    let mut response = metadata_response(body.len());
    response.extend_from_slice(body);
    response
}

/// Error response with an XML error document body
pub fn xml_error_response(status: u16, reason: &str, code: &str) -> Vec<u8> {
    let body = format!(
        "<?xml version=\"1.0\"?><Error><Code>{}</Code></Error>",
        code
    );
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/xml\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status, reason, body.len(), body
    )
    .into_bytes()
}

/// Bodyless error response, as a backend answers an errored HEAD
pub fn status_only_response(status: u16, reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason
    )
    .into_bytes()
}

/// Deterministic body of `len` bytes
pub fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn storage_config(backend: SocketAddr) -> StorageConfig {
    StorageConfig {
        endpoint_host: "127.0.0.1".to_string(),
        endpoint_port: backend.port(),
        use_tls: false,
        region: "us-east-1".to_string(),
        virtual_host_domain: TEST_DOMAIN.to_string(),
    }
}

pub fn credential_cache() -> Arc<CredentialCache> {
    Arc::new(CredentialCache::from_config(&CredentialsConfig {
        access_key_id: Some("AKIDEXAMPLE".to_string()),
        secret_access_key: Some("test-secret".to_string()), // #gitleaks:allow
        session_token: None,
    }))
}

/// Full gateway stack on an ephemeral port, pointed at `backend`.
///
/// The returned coordinator must stay alive for the duration of the test;
/// dropping it shuts the server down.
pub async fn start_gateway(
    backend: SocketAddr,
    passthrough_enabled: bool,
) -> (SocketAddr, ShutdownCoordinator) {
    let storage = storage_config(backend);
    let credentials = credential_cache();

    let client = Arc::new(
        S3Client::new(&storage, Arc::clone(&credentials), Duration::from_secs(5)).unwrap(),
    );
    let gateway = Arc::new(Gateway::new(
        Resolver::new(TEST_DOMAIN),
        client,
        passthrough_enabled,
    ));
    let passthrough = Arc::new(PassthroughResponder::new(&storage, credentials).unwrap());

    let server = Server::bind("127.0.0.1:0", gateway, passthrough, Duration::from_secs(2))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let coordinator = ShutdownCoordinator::new();
    let signal = ShutdownSignal::new(coordinator.subscribe());
    tokio::spawn(server.run(signal));

    (addr, coordinator)
}

/// A parsed response: status, lowercased header names, raw body bytes
pub struct ClientResponse {
    pub status: u16,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Send one raw request and read the response until the server closes
pub async fn send_request(addr: SocketAddr, raw: &str) -> ClientResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    parse_response(&response)
}

pub fn parse_response(raw: &[u8]) -> ClientResponse {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = String::from_utf8_lossy(&raw[..pos]).to_string();
    let body = raw[pos + 4..].to_vec();

    let mut lines = head.lines();
    let status_line = lines.next().unwrap().to_string();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .expect("status line has no code")
        .parse()
        .unwrap();

    let headers = lines
        .map(|line| {
            let (name, value) = line.split_once(':').expect("malformed header line");
            (name.trim().to_ascii_lowercase(), value.trim().to_string())
        })
        .collect();

    ClientResponse {
        status,
        status_line,
        headers,
        body,
    }
}

/// Simple GET request in path-style form, connection closed after
pub fn get_request(bucket: &str, key: &str) -> String {
    format!(
        "GET /{}/{} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        bucket, key, TEST_DOMAIN
    )
}

pub fn head_request(bucket: &str, key: &str) -> String {
    format!(
        "HEAD /{}/{} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        bucket, key, TEST_DOMAIN
    )
}

/// Snapshot of the request log as (method, path) pairs
pub fn seen_calls(seen: &Arc<Mutex<Vec<SeenRequest>>>) -> Vec<(String, String)> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|r| (r.method.clone(), r.path.clone()))
        .collect()
}
