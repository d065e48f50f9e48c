//! S3 Gateway - HTTP gateway serving S3 objects as plain HTTP resources
//!
//! This library resolves inbound GET/HEAD requests to bucket/key pairs,
//! forwards conditional-request predicates to the storage backend, and
//! streams object bodies back either through a buffered lazy stream or by
//! hijacking the client socket and copying the signed upstream response
//! byte for byte.

pub mod chunk_stream;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod passthrough;
pub mod raw_http;
pub mod resolver;
pub mod response;
pub mod s3_client;
pub mod server;
pub mod shutdown;
pub mod sigv4;

pub use error::{GatewayError, Result};
