//! Response Envelope and Error Mapper
//!
//! `ResponseEnvelope` is the one output type every request path produces:
//! a status, ordered headers, and a body that is empty, buffered, or a lazy
//! chunk stream. `error_envelope` is the pure mapping from the gateway error
//! taxonomy to a plain-text HTTP response.

use crate::chunk_stream::ChunkStream;
use crate::s3_client::ObjectMetadata;
use crate::GatewayError;
use bytes::Bytes;

/// Response payload variants
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    Stream(ChunkStream),
}

/// The universal output of request handling. Header order is preserved as
/// inserted; some clients care.
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    /// Success envelope for a recognized object. The four metadata headers
    /// are always present, in this order.
    pub fn object(metadata: &ObjectMetadata, body: ResponseBody) -> Self {
        let headers = vec![
            ("Content-Type".to_string(), metadata.content_type.clone()),
            (
                "Content-Length".to_string(),
                metadata.content_length.to_string(),
            ),
            ("Last-Modified".to_string(), metadata.last_modified.clone()),
            ("ETag".to_string(), metadata.etag.clone()),
        ];

        Self {
            status: 200,
            headers,
            body,
        }
    }

    /// Whether this envelope reports an error. Error responses always close
    /// the connection.
    pub fn is_error(&self) -> bool {
        self.status >= 400 || self.status == 304
    }
}

/// Map a gateway error to its HTTP response.
///
/// Routing and backend conditions get their fixed statuses and bodies;
/// unrecognized backend codes pass through as "Error: <code>". Transport
/// failures surface as 502 and a metadata timeout as 504, statuses the
/// backend itself never produces.
pub fn error_envelope(error: &GatewayError) -> ResponseEnvelope {
    let (status, body) = match error {
        GatewayError::NotFound => (404, "not found".to_string()),
        GatewayError::NotModified => (304, "not modified".to_string()),
        GatewayError::PreconditionFailed => (412, "precondition failed".to_string()),
        GatewayError::MethodNotAllowed => (405, "method not allowed".to_string()),
        GatewayError::Forbidden => (403, "forbidden".to_string()),
        GatewayError::Backend(code) => (*code, format!("Error: {}", code)),
        GatewayError::TimeoutError(_) => (504, "Error: 504".to_string()),
        _ => (502, "Error: 502".to_string()),
    };

    let body = Bytes::from(body);
    let headers = vec![
        ("Content-Type".to_string(), "text/plain".to_string()),
        ("Content-Length".to_string(), body.len().to_string()),
    ];

    ResponseEnvelope {
        status,
        headers,
        body: ResponseBody::Full(body),
    }
}

/// Reason phrase for the statuses the gateway emits
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}
