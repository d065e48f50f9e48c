//! Storage Client Module
//!
//! hyper-based client for the object storage endpoint: a signed HEAD for
//! metadata and a signed GET that pushes body chunks into a channel. The
//! backend evaluates all conditional predicates; this module only forwards
//! them and classifies the failures that come back.

use crate::config::StorageConfig;
use crate::connector::StorageConnector;
use crate::credentials::{CredentialCache, Credentials};
use crate::resolver::ObjectRequest;
use crate::sigv4::{amz_date, RequestSigner, EMPTY_PAYLOAD_SHA256};
use crate::{GatewayError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Metadata of one object, as reported by a HEAD call. One instance per
/// request; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub content_length: u64,
    pub etag: String,
    pub last_modified: String,
}

/// Client for the storage endpoint
pub struct S3Client {
    client: Client<StorageConnector, Full<Bytes>>,
    storage: StorageConfig,
    signer: RequestSigner,
    credentials: Arc<CredentialCache>,
    request_timeout: Duration,
}

impl S3Client {
    pub fn new(
        storage: &StorageConfig,
        credentials: Arc<CredentialCache>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let connector = StorageConnector::new(storage)?;
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            storage: storage.clone(),
            signer: RequestSigner::new(storage.region.clone()),
            credentials,
            request_timeout,
        })
    }

    /// Fetch object metadata, forwarding all conditional predicates.
    ///
    /// A 200 whose Content-Length does not parse is treated as "no object",
    /// the same as a 404: a HEAD that reports no length reported no object
    /// the gateway can frame a response for.
    pub async fn head_object(&self, request: &ObjectRequest) -> Result<ObjectMetadata> {
        let response = self.send("HEAD", request).await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            debug!("HEAD {} returned {}", request.object_path(), status);
            return Err(classify_status(status));
        }

        let headers = response.headers();

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(GatewayError::NotFound)?;

        let header_string = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("binary/octet-stream")
            .to_string();

        Ok(ObjectMetadata {
            content_type,
            content_length,
            etag: header_string("etag"),
            last_modified: header_string("last-modified"),
        })
    }

    /// Fetch the object body, pushing each chunk into `sink`.
    ///
    /// The channel's capacity bounds read-ahead: with capacity 1 the next
    /// chunk is not pulled from the backend until the consumer has taken the
    /// previous one. A dropped receiver stops the transfer quietly.
    pub async fn get_object(
        &self,
        request: &ObjectRequest,
        sink: mpsc::Sender<Result<Bytes>>,
    ) -> Result<()> {
        let response = self.send("GET", request).await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            // Error bodies are small XML documents carrying the backend code
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| GatewayError::HttpError(format!("Failed to read error body: {}", e)))?
                .to_bytes();
            let code = extract_error_code(&String::from_utf8_lossy(&body));
            debug!(
                "GET {} returned {} (code: {:?})",
                request.object_path(),
                status,
                code
            );
            return Err(classify_error(status, code.as_deref()));
        }

        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            let frame =
                frame.map_err(|e| GatewayError::HttpError(format!("Upstream body error: {}", e)))?;

            if let Ok(data) = frame.into_data() {
                if data.is_empty() {
                    continue;
                }
                if sink.send(Ok(data)).await.is_err() {
                    debug!("Chunk consumer dropped, abandoning object fetch");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Build and send one signed request for the object
    async fn send(
        &self,
        method: &str,
        request: &ObjectRequest,
    ) -> Result<hyper::Response<Incoming>> {
        let credentials = self.credentials.credentials()?;
        let headers = build_signed_headers(
            &self.signer,
            &credentials,
            &self.storage.authority(),
            method,
            request,
            Utc::now(),
        );

        let uri = format!(
            "{}://{}{}",
            self.storage.scheme(),
            self.storage.authority(),
            request.object_path()
        );

        let mut builder = Request::builder().method(method).uri(&uri);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let http_request = builder
            .body(Full::new(Bytes::new()))
            .map_err(|e| GatewayError::HttpError(format!("Failed to build request: {}", e)))?;

        debug!("Sending {} {} to storage endpoint", method, uri);

        let response =
            tokio::time::timeout(self.request_timeout, self.client.request(http_request))
                .await
                .map_err(|_| {
                    warn!("{} {} timed out", method, uri);
                    GatewayError::TimeoutError(format!("{} {} timed out", method, uri))
                })?
                .map_err(|e| GatewayError::HttpError(format!("Failed to send request: {}", e)))?;

        Ok(response)
    }
}

/// Full outbound header set for one object request, signature included.
///
/// Shared by the hyper client and the passthrough's raw request so both sign
/// identically. Only the Host and x-amz-* headers participate in the
/// signature; conditional predicates ride along unsigned.
pub fn build_signed_headers(
    signer: &RequestSigner,
    credentials: &Credentials,
    authority: &str,
    method: &str,
    request: &ObjectRequest,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date = amz_date(now);

    let mut signed: Vec<(&str, &str)> = vec![
        ("host", authority),
        ("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256),
        ("x-amz-date", date.as_str()),
    ];
    if let Some(token) = &credentials.session_token {
        signed.push(("x-amz-security-token", token.as_str()));
    }

    let authorization = signer.authorization_header(
        credentials,
        method,
        &request.object_path(),
        &signed,
        EMPTY_PAYLOAD_SHA256,
        now,
    );

    let mut headers: Vec<(String, String)> = signed
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    for (name, value) in request.conditional_headers() {
        headers.push((name.to_string(), value.to_string()));
    }
    headers.push(("authorization".to_string(), authorization));

    headers
}

/// Map a backend status code to the gateway taxonomy
pub fn classify_status(status: u16) -> GatewayError {
    match status {
        404 => GatewayError::NotFound,
        304 => GatewayError::NotModified,
        412 => GatewayError::PreconditionFailed,
        403 => GatewayError::Forbidden,
        other => GatewayError::Backend(other),
    }
}

/// Map a backend error code (from the XML error document) to the taxonomy,
/// falling back to the status when the code is unknown.
///
/// `412Error` is a literal identifier some backend builds emit instead of
/// `PreconditionFailed`; it must keep mapping to 412. Delete that arm once no
/// supported backend exhibits the defect.
pub fn classify_error(status: u16, code: Option<&str>) -> GatewayError {
    match code {
        Some("NoSuchKey") | Some("NoSuchBucket") => GatewayError::NotFound,
        Some("NotModified") => GatewayError::NotModified,
        Some("PreconditionFailed") => GatewayError::PreconditionFailed,
        Some("412Error") => GatewayError::PreconditionFailed,
        Some("AccessDenied") => GatewayError::Forbidden,
        _ => classify_status(status),
    }
}

/// Pull the `<Code>` element out of a backend XML error document
fn extract_error_code(body: &str) -> Option<String> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(body[start..end].to_string())
}
