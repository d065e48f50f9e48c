//! HTTP Server Module
//!
//! Owns the listening socket and the per-connection loop: parse a request
//! head, ask the gateway for a disposition, then either write the envelope
//! or hand the raw socket to the passthrough responder. One spawned task per
//! connection; the accept loop stops on the shutdown signal and in-flight
//! transfers run to completion.

use crate::gateway::{Disposition, Gateway};
use crate::passthrough::{HijackedConnection, PassthroughResponder};
use crate::raw_http::{find_header_end, format_head, parse_request_head, RequestHead};
use crate::response::{reason_phrase, ResponseBody, ResponseEnvelope};
use crate::shutdown::ShutdownSignal;
use crate::{GatewayError, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Upper bound on an inbound request head
const MAX_HEAD_BYTES: usize = 16 * 1024;

const READ_BUFFER_SIZE: usize = 4096;

pub struct Server {
    listener: TcpListener,
    gateway: Arc<Gateway>,
    passthrough: Arc<PassthroughResponder>,
    idle_timeout: Duration,
}

impl Server {
    pub async fn bind(
        addr: &str,
        gateway: Arc<Gateway>,
        passthrough: Arc<PassthroughResponder>,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::IoError(format!("Failed to bind {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            gateway,
            passthrough,
            idle_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| GatewayError::IoError(format!("Failed to read local address: {}", e)))
    }

    /// Accept loop. Returns after the shutdown signal fires.
    pub async fn run(self, mut shutdown_signal: ShutdownSignal) -> Result<()> {
        info!("Gateway listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Connection from {}", peer);

                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                            }
                            if let Err(e) = configure_socket(&stream) {
                                warn!("Failed to configure socket for {}: {}", peer, e);
                            }

                            let gateway = Arc::clone(&self.gateway);
                            let passthrough = Arc::clone(&self.passthrough);
                            let idle_timeout = self.idle_timeout;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    peer,
                                    gateway,
                                    passthrough,
                                    idle_timeout,
                                )
                                .await
                                {
                                    let text = e.to_string();
                                    if text.contains("reset") || text.contains("broken pipe") {
                                        debug!("Client {} disconnected: {}", peer, e);
                                    } else {
                                        error!("Connection error for {}: {}", peer, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_signal.wait_for_shutdown() => {
                    info!("Server received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Serve requests on one connection until it closes, errors, or is hijacked
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<Gateway>,
    passthrough: Arc<PassthroughResponder>,
    idle_timeout: Duration,
) -> Result<()> {
    // Bytes read past the previous head carry over to the next request
    let mut leftover: Vec<u8> = Vec::new();

    loop {
        let head = match read_request_head(&mut stream, &mut leftover, idle_timeout).await {
            Ok(Some(head)) => head,
            // Clean close or idle timeout between requests
            Ok(None) => {
                let _ = stream.shutdown().await;
                return Ok(());
            }
            Err(e) => {
                debug!("Malformed request from {}: {}", peer, e);
                write_envelope(&mut stream, bad_request(), false).await?;
                let _ = stream.shutdown().await;
                return Ok(());
            }
        };

        match gateway.handle(&head, true).await {
            Disposition::Hijack(request) => {
                // One-way handoff: the responder is the sole writer from
                // here and closes the socket itself
                passthrough
                    .respond(HijackedConnection::take(stream, peer), &request)
                    .await;
                return Ok(());
            }
            Disposition::Respond(envelope) => {
                let keep_alive = head.keep_alive() && !envelope.is_error();

                write_envelope(&mut stream, envelope, keep_alive).await?;

                if !keep_alive {
                    let _ = stream.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Read one request head. Ok(None) means the client closed (or went idle)
/// between requests; Err means the bytes were not a valid head.
async fn read_request_head(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
    idle_timeout: Duration,
) -> Result<Option<RequestHead>> {
    loop {
        if let Some(end) = find_header_end(buffer) {
            let head = parse_request_head(&buffer[..end])?;
            buffer.drain(..end + 4);
            return Ok(Some(head));
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(GatewayError::HttpError(
                "Request head too large".to_string(),
            ));
        }

        let mut chunk = [0u8; READ_BUFFER_SIZE];
        let read = tokio::time::timeout(idle_timeout, stream.read(&mut chunk)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(GatewayError::IoError(format!(
                    "Failed to read request: {}",
                    e
                )))
            }
            // Idle with a partial head is a protocol error; idle between
            // requests is just a quiet client
            Err(_) if buffer.is_empty() => return Ok(None),
            Err(_) => {
                return Err(GatewayError::TimeoutError(
                    "Timed out mid-request".to_string(),
                ))
            }
        };

        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(GatewayError::ConnectionError(
                "Connection closed mid-request".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Write one envelope: head, then the empty/buffered/streamed body.
/// A mid-stream error surfaces as Err with the head already committed; the
/// caller must close the connection. A streamed body that completes short of
/// its declared Content-Length is also Err: the connection cannot be reused
/// when the client's framing is off.
async fn write_envelope(
    stream: &mut TcpStream,
    envelope: ResponseEnvelope,
    keep_alive: bool,
) -> Result<()> {
    let mut headers = envelope.headers;
    headers.push((
        "Connection".to_string(),
        if keep_alive { "keep-alive" } else { "close" }.to_string(),
    ));

    stream
        .write_all(&format_head(
            envelope.status,
            reason_phrase(envelope.status),
            &headers,
        ))
        .await?;

    match envelope.body {
        ResponseBody::Empty => {}
        ResponseBody::Full(bytes) => stream.write_all(&bytes).await?,
        ResponseBody::Stream(mut chunks) => {
            let mut written: u64 = 0;
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        stream.write_all(&chunk).await?;
                        written += chunk.len() as u64;
                    }
                    Err(e) => {
                        warn!("Object stream broke mid-response: {}", e);
                        return Err(e);
                    }
                }
            }

            if let Some(declared) = declared_length(&headers) {
                if written != declared {
                    warn!(
                        "Stream body ended at {} bytes, {} declared",
                        written, declared
                    );
                    return Err(GatewayError::HttpError(
                        "Response body shorter than declared length".to_string(),
                    ));
                }
            }
        }
    }

    stream.flush().await?;
    Ok(())
}

fn declared_length(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse().ok())
}

fn bad_request() -> ResponseEnvelope {
    let body = Bytes::from_static(b"bad request");
    ResponseEnvelope {
        status: 400,
        headers: vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ],
        body: ResponseBody::Full(body),
    }
}

/// Enable TCP keepalive so dead client connections are noticed
fn configure_socket(stream: &TcpStream) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    unsafe {
        let keepalive: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &keepalive as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(GatewayError::ConnectionError(
                "Failed to set SO_KEEPALIVE".to_string(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            let keepidle: libc::c_int = 60;
            if libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_KEEPIDLE,
                &keepidle as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            ) != 0
            {
                return Err(GatewayError::ConnectionError(
                    "Failed to set TCP_KEEPIDLE".to_string(),
                ));
            }
        }
    }

    Ok(())
}
