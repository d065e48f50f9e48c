//! Passthrough Responder
//!
//! Serves a GET by taking exclusive ownership of the client socket, issuing
//! a manually signed raw HTTP request to the storage endpoint over a fresh
//! connection, and copying the upstream response to the client verbatim.
//! Nothing is re-framed or re-buffered through the response pipeline, which
//! is the point: large objects flow socket to socket.
//!
//! Once the connection is hijacked this module is the sole writer and is
//! responsible for closing the socket on every exit path. An error after the
//! response head has been committed cannot be turned into a clean HTTP error
//! anymore; the only safe move is closing the connection.

use crate::config::StorageConfig;
use crate::connector::{build_tls_config, connect_storage};
use crate::credentials::CredentialCache;
use crate::raw_http::{find_header_end, format_head, parse_response_head};
use crate::resolver::ObjectRequest;
use crate::response::error_envelope;
use crate::s3_client::build_signed_headers;
use crate::sigv4::RequestSigner;
use crate::{GatewayError, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Upstream headers forwarded to the client; everything else is dropped
const FORWARDED_HEADERS: [&str; 5] = [
    "Content-Type",
    "Content-Length",
    "Transfer-Encoding",
    "ETag",
    "Last-Modified",
];

/// Upper bound on the upstream response head
const MAX_HEAD_BYTES: usize = 64 * 1024;

const COPY_BUFFER_SIZE: usize = 8192;

/// Exclusive ownership of a client connection.
///
/// Construction is the hijack: the host's response-writing path must not
/// touch the stream afterwards. The responder consumes the value, so the
/// close-on-every-path guarantee is structural.
pub struct HijackedConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl HijackedConnection {
    pub fn take(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

/// Where a passthrough attempt failed, relative to the committed head
enum CopyFailure {
    /// Nothing written to the client yet; an error response is still possible
    BeforeCommit(GatewayError),
    /// The head is on the wire; the connection can only be closed
    AfterCommit(GatewayError),
}

/// Serves GETs over hijacked client connections
pub struct PassthroughResponder {
    storage: StorageConfig,
    signer: RequestSigner,
    credentials: Arc<CredentialCache>,
    tls: Option<TlsConnector>,
}

impl PassthroughResponder {
    pub fn new(storage: &StorageConfig, credentials: Arc<CredentialCache>) -> Result<Self> {
        let tls = if storage.use_tls {
            Some(TlsConnector::from(build_tls_config()?))
        } else {
            None
        };

        Ok(Self {
            storage: storage.clone(),
            signer: RequestSigner::new(storage.region.clone()),
            credentials,
            tls,
        })
    }

    /// Serve one GET over the hijacked connection, then close it.
    pub async fn respond(&self, connection: HijackedConnection, request: &ObjectRequest) {
        let HijackedConnection { mut stream, peer } = connection;

        match self.copy_upstream(&mut stream, request).await {
            Ok(total) => {
                info!(
                    "Passthrough GET {} for {} complete ({} body bytes)",
                    request.object_path(),
                    peer,
                    total
                );
            }
            Err(CopyFailure::BeforeCommit(e)) => {
                warn!(
                    "Passthrough GET {} for {} failed before commit: {}",
                    request.object_path(),
                    peer,
                    e
                );
                let _ = stream.write_all(&error_response_bytes(&e)).await;
            }
            Err(CopyFailure::AfterCommit(e)) => {
                // Headers are on the wire; closing is the only safe action
                warn!(
                    "Passthrough GET {} for {} aborted mid-transfer: {}",
                    request.object_path(),
                    peer,
                    e
                );
            }
        }

        let _ = stream.shutdown().await;
        debug!("Passthrough connection to {} closed", peer);
    }

    /// Fetch the object over a fresh signed connection and relay it.
    /// Returns the number of body bytes written to the client.
    async fn copy_upstream(
        &self,
        client: &mut TcpStream,
        request: &ObjectRequest,
    ) -> std::result::Result<u64, CopyFailure> {
        let raw_request = self.build_raw_request(request).map_err(CopyFailure::BeforeCommit)?;

        // Single attempt: the gateway carries no retry policy of its own
        let mut upstream =
            connect_storage(&self.storage.endpoint_host, self.storage.endpoint_port, self.tls.as_ref())
                .await
                .map_err(CopyFailure::BeforeCommit)?;

        upstream
            .write_all(&raw_request)
            .await
            .map_err(|e| CopyFailure::BeforeCommit(GatewayError::IoError(format!(
                "Failed to write upstream request: {}",
                e
            ))))?;
        upstream
            .flush()
            .await
            .map_err(|e| CopyFailure::BeforeCommit(GatewayError::IoError(format!(
                "Failed to flush upstream request: {}",
                e
            ))))?;

        // Read until the upstream head is complete. Whatever body bytes
        // arrive in the same reads are the buffered prefix, written to the
        // client before the copy loop so the stream is neither truncated
        // nor duplicated.
        let mut buffer = Vec::with_capacity(COPY_BUFFER_SIZE);
        let header_end = loop {
            if let Some(end) = find_header_end(&buffer) {
                break end;
            }
            if buffer.len() > MAX_HEAD_BYTES {
                return Err(CopyFailure::BeforeCommit(GatewayError::HttpError(
                    "Upstream response head too large".to_string(),
                )));
            }

            let mut chunk = [0u8; COPY_BUFFER_SIZE];
            let n = upstream.read(&mut chunk).await.map_err(|e| {
                CopyFailure::BeforeCommit(GatewayError::IoError(format!(
                    "Failed to read upstream response: {}",
                    e
                )))
            })?;
            if n == 0 {
                return Err(CopyFailure::BeforeCommit(GatewayError::ConnectionError(
                    "Upstream closed before sending a response head".to_string(),
                )));
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let head = parse_response_head(&buffer[..header_end]).map_err(CopyFailure::BeforeCommit)?;
        debug!(
            "Upstream responded {} {} for {}",
            head.status,
            head.reason,
            request.object_path()
        );

        // Status line reconstructed from the upstream code and reason, then
        // the forwarded allow-list plus a synthetic Connection: close
        let mut headers = Vec::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = head.header(name) {
                headers.push((name.to_string(), value.to_string()));
            }
        }
        headers.push(("Connection".to_string(), "close".to_string()));

        client
            .write_all(&format_head(head.status, &head.reason, &headers))
            .await
            .map_err(|e| CopyFailure::BeforeCommit(GatewayError::IoError(format!(
                "Failed to write response head: {}",
                e
            ))))?;

        // Committed from here on
        let prefix = &buffer[header_end + 4..];
        let mut total = prefix.len() as u64;
        client.write_all(prefix).await.map_err(|e| {
            CopyFailure::AfterCommit(GatewayError::IoError(format!(
                "Failed to write buffered prefix: {}",
                e
            )))
        })?;

        let mut chunk = [0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match upstream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::ConnectionReset
                        || e.kind() == std::io::ErrorKind::BrokenPipe =>
                {
                    debug!("Upstream closed mid-body: {}", e);
                    return Err(CopyFailure::AfterCommit(GatewayError::ConnectionError(
                        format!("Upstream closed mid-body: {}", e),
                    )));
                }
                Err(e) => {
                    return Err(CopyFailure::AfterCommit(GatewayError::IoError(format!(
                        "Failed to read upstream body: {}",
                        e
                    ))))
                }
            };

            client.write_all(&chunk[..n]).await.map_err(|e| {
                CopyFailure::AfterCommit(GatewayError::IoError(format!(
                    "Failed to write to client: {}",
                    e
                )))
            })?;
            total += n as u64;
        }

        client.flush().await.map_err(|e| {
            CopyFailure::AfterCommit(GatewayError::IoError(format!(
                "Failed to flush client stream: {}",
                e
            )))
        })?;

        Ok(total)
    }

    /// Raw signed GET for the object. Client content-encoding negotiation is
    /// not forwarded: the gateway never re-encodes what it relays, so the
    /// upstream serves the stored representation.
    fn build_raw_request(&self, request: &ObjectRequest) -> Result<Vec<u8>> {
        let credentials = self.credentials.credentials()?;
        let headers = build_signed_headers(
            &self.signer,
            &credentials,
            &self.storage.authority(),
            "GET",
            request,
            Utc::now(),
        );

        let mut raw = Vec::new();
        raw.extend_from_slice(format!("GET {} HTTP/1.1\r\n", request.object_path()).as_bytes());
        for (name, value) in &headers {
            raw.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        raw.extend_from_slice(b"connection: close\r\n");
        raw.extend_from_slice(b"\r\n");

        Ok(raw)
    }
}

/// Complete error response, head and body, for the uncommitted failure path
fn error_response_bytes(error: &GatewayError) -> Vec<u8> {
    let envelope = error_envelope(error);
    let mut headers = envelope.headers.clone();
    headers.push(("Connection".to_string(), "close".to_string()));

    let mut bytes = format_head(
        envelope.status,
        crate::response::reason_phrase(envelope.status),
        &headers,
    );
    if let crate::response::ResponseBody::Full(body) = &envelope.body {
        bytes.extend_from_slice(body);
    }
    bytes
}
