//! Request Resolver
//!
//! Maps an inbound request head onto a storage object address plus the
//! conditional predicates the backend should evaluate. Resolution is pure:
//! no network traffic, no existence check. Both S3 addressing styles are
//! accepted, virtual-hosted (`bucket.domain/key`) taking precedence over
//! path-style (`domain/bucket/key`) when the Host header matches.

use crate::raw_http::RequestHead;
use crate::{GatewayError, Result};

/// A resolved object request: which object, under which preconditions.
///
/// Conditional values are carried verbatim as received. The backend parses
/// and evaluates them; the gateway never interprets dates or entity tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    pub bucket: String,
    pub key: String,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_unmodified_since: Option<String>,
}

impl ObjectRequest {
    /// Conditional header pairs in wire form, for outbound requests
    pub fn conditional_headers(&self) -> Vec<(&'static str, &str)> {
        let mut headers = Vec::new();
        if let Some(v) = &self.if_match {
            headers.push(("If-Match", v.as_str()));
        }
        if let Some(v) = &self.if_none_match {
            headers.push(("If-None-Match", v.as_str()));
        }
        if let Some(v) = &self.if_modified_since {
            headers.push(("If-Modified-Since", v.as_str()));
        }
        if let Some(v) = &self.if_unmodified_since {
            headers.push(("If-Unmodified-Since", v.as_str()));
        }
        headers
    }

    /// S3 object path in path-style form, used for all outbound requests
    pub fn object_path(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }
}

/// Resolves request heads against a configured virtual-host domain
#[derive(Debug, Clone)]
pub struct Resolver {
    virtual_host_domain: String,
}

impl Resolver {
    pub fn new(virtual_host_domain: impl Into<String>) -> Self {
        Self {
            virtual_host_domain: virtual_host_domain.into().to_ascii_lowercase(),
        }
    }

    /// Resolve a request head to an object request.
    ///
    /// The method gate runs before any path inspection, so an unsupported
    /// method is always answered 405 even when the path would not resolve.
    pub fn resolve(&self, head: &RequestHead) -> Result<ObjectRequest> {
        if head.method != "GET" && head.method != "HEAD" {
            return Err(GatewayError::MethodNotAllowed);
        }

        let path = head.target.split('?').next().unwrap_or("");
        if path.is_empty() {
            return Err(GatewayError::NotFound);
        }

        let (bucket, key) = match self.bucket_from_host(head.header("host")) {
            Some(bucket) => {
                let key = path.strip_prefix('/').unwrap_or(path);
                (bucket, key.to_string())
            }
            None => {
                let trimmed = path.strip_prefix('/').unwrap_or(path);
                match trimmed.split_once('/') {
                    Some((bucket, key)) => (bucket.to_string(), key.to_string()),
                    None => return Err(GatewayError::NotFound),
                }
            }
        };

        if bucket.is_empty() || key.is_empty() {
            return Err(GatewayError::NotFound);
        }

        Ok(ObjectRequest {
            bucket,
            key,
            if_match: head.header("if-match").map(str::to_string),
            if_none_match: head.header("if-none-match").map(str::to_string),
            if_modified_since: head.header("if-modified-since").map(str::to_string),
            if_unmodified_since: head.header("if-unmodified-since").map(str::to_string),
        })
    }

    /// Extract the bucket from a virtual-hosted Host header. The match is
    /// anchored: the host must end with `.{domain}`, port ignored.
    fn bucket_from_host(&self, host: Option<&str>) -> Option<String> {
        let host = host?;
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
        let bucket = host.strip_suffix(&format!(".{}", self.virtual_host_domain))?;

        if bucket.is_empty() {
            None
        } else {
            Some(bucket.to_string())
        }
    }
}
