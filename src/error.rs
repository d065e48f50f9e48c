//! Error Module
//!
//! Defines the error and result types used throughout the gateway.
//!
//! The first group of variants is the backend/routing taxonomy the error
//! mapper in `response` translates to HTTP statuses; the rest carry
//! infrastructure failures as strings the way the rest of the codebase
//! reports them.

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request method outside GET/HEAD, rejected before any backend call
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Object or key absent, or the path did not resolve to a bucket/key
    #[error("not found")]
    NotFound,

    /// Backend evaluated If-None-Match / If-Modified-Since as unchanged
    #[error("not modified")]
    NotModified,

    /// Backend evaluated If-Match / If-Unmodified-Since as failed
    #[error("precondition failed")]
    PreconditionFailed,

    /// Backend denied access to the object
    #[error("forbidden")]
    Forbidden,

    /// Backend returned a status the gateway does not recognize
    #[error("backend error: {0}")]
    Backend(u16),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::HttpError(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::ConfigError(err.to_string())
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
