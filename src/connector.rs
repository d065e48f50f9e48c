//! Outbound Storage Connector
//!
//! Establishes connections to the storage endpoint, plain TCP or TLS per the
//! configured scheme. `StorageConnector` is the tower service the hyper
//! client drives for metadata and buffered GET traffic; `connect_storage` is
//! the same dialing logic exposed directly for the passthrough responder,
//! which needs the raw stream rather than a pooled client.

use crate::config::StorageConfig;
use crate::{GatewayError, Result};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use rustls::pki_types::ServerName;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tower::Service;
use tracing::{debug, warn};

/// Build the rustls client configuration from the system trust store
pub fn build_tls_config() -> Result<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();

    for cert in rustls_native_certs::load_native_certs()
        .map_err(|e| GatewayError::TlsError(format!("Failed to load native certs: {}", e)))?
    {
        root_store
            .add(cert)
            .map_err(|e| GatewayError::TlsError(format!("Failed to add cert: {}", e)))?;
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(tls_config))
}

/// One outbound connection to the storage endpoint
pub enum StorageStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for StorageStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StorageStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            StorageStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StorageStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            StorageStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            StorageStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StorageStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            StorageStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StorageStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            StorageStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dial the storage endpoint, wrapping in TLS when a connector is given.
/// The TLS server name is the hostname, never the resolved address.
pub async fn connect_storage(
    host: &str,
    port: u16,
    tls: Option<&TlsConnector>,
) -> Result<StorageStream> {
    let tcp = TcpStream::connect((host, port)).await.map_err(|e| {
        warn!("TCP connection failed to {}:{}: {}", host, port, e);
        GatewayError::ConnectionError(format!("Failed to connect to {}:{}: {}", host, port, e))
    })?;

    if let Err(e) = tcp.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}:{}: {}", host, port, e);
    }

    match tls {
        None => {
            debug!("TCP connection established to {}:{}", host, port);
            Ok(StorageStream::Plain(tcp))
        }
        Some(connector) => {
            let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
                GatewayError::TlsError(format!("Invalid server name '{}': {}", host, e))
            })?;

            let stream = connector.connect(server_name, tcp).await.map_err(|e| {
                warn!("TLS handshake failed to {}:{}: {}", host, port, e);
                GatewayError::TlsError(format!("TLS handshake failed to {}: {}", host, e))
            })?;

            debug!("TLS connection established to {}:{}", host, port);
            Ok(StorageStream::Tls(Box::new(stream)))
        }
    }
}

/// Wrapper bridging a storage stream into hyper's I/O traits
pub struct StorageIo(StorageStream);

impl Read for StorageIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let mut tokio_buf = ReadBuf::uninit(unsafe { buf.as_mut() });
        match Pin::new(&mut self.0).poll_read(cx, &mut tokio_buf) {
            Poll::Ready(Ok(())) => {
                let filled = tokio_buf.filled().len();
                unsafe {
                    buf.advance(filled);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Write for StorageIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Connection for StorageIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Connector the hyper client uses for every outbound storage request.
///
/// The endpoint is fixed at construction; the request URI's authority is
/// ignored for dialing so that the client cannot be steered anywhere else.
#[derive(Clone)]
pub struct StorageConnector {
    host: String,
    port: u16,
    tls: Option<TlsConnector>,
}

impl StorageConnector {
    pub fn new(storage: &StorageConfig) -> Result<Self> {
        let tls = if storage.use_tls {
            Some(TlsConnector::from(build_tls_config()?))
        } else {
            None
        };

        Ok(Self {
            host: storage.endpoint_host.clone(),
            port: storage.endpoint_port,
            tls,
        })
    }
}

impl Service<Uri> for StorageConnector {
    type Response = StorageIo;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        // Always ready to create new connections
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let host = self.host.clone();
        let port = self.port;
        let tls = self.tls.clone();

        Box::pin(async move {
            debug!("Establishing storage connection for {}", uri);
            let stream = connect_storage(&host, port, tls.as_ref()).await?;
            Ok(StorageIo(stream))
        })
    }
}
