//! Gateway Controller
//!
//! Per-request orchestration: validate the method, resolve the object,
//! fetch metadata, then pick a responder. Every error funnels through the
//! error mapper in `response`; callers always get something they can write.

use crate::chunk_stream::spawn_object_stream;
use crate::raw_http::RequestHead;
use crate::resolver::{ObjectRequest, Resolver};
use crate::response::{error_envelope, ResponseBody, ResponseEnvelope};
use crate::s3_client::S3Client;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// What the host layer should do with the connection
pub enum Disposition {
    /// Write this envelope through the normal response path
    Respond(ResponseEnvelope),
    /// Hijack the client socket and run the passthrough responder
    Hijack(ObjectRequest),
}

/// The per-request decision engine. Shared across connections; holds no
/// per-request state.
pub struct Gateway {
    resolver: Resolver,
    client: Arc<S3Client>,
    passthrough_enabled: bool,
}

impl Gateway {
    pub fn new(resolver: Resolver, client: Arc<S3Client>, passthrough_enabled: bool) -> Self {
        Self {
            resolver,
            client,
            passthrough_enabled,
        }
    }

    /// Decide how to answer one request. `hijack_available` says whether the
    /// host can hand over the raw client socket for this request.
    pub async fn handle(&self, head: &RequestHead, hijack_available: bool) -> Disposition {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        match self.dispatch(head, hijack_available).await {
            Ok(disposition) => {
                match &disposition {
                    Disposition::Respond(envelope) => info!(
                        "[{}] {} {} -> {} ({:?})",
                        request_id,
                        head.method,
                        head.target,
                        envelope.status,
                        started.elapsed()
                    ),
                    Disposition::Hijack(request) => info!(
                        "[{}] {} {} -> passthrough {} ({:?})",
                        request_id,
                        head.method,
                        head.target,
                        request.object_path(),
                        started.elapsed()
                    ),
                }
                disposition
            }
            Err(e) => {
                let envelope = error_envelope(&e);
                info!(
                    "[{}] {} {} -> {} ({}, {:?})",
                    request_id,
                    head.method,
                    head.target,
                    envelope.status,
                    e,
                    started.elapsed()
                );
                Disposition::Respond(envelope)
            }
        }
    }

    async fn dispatch(&self, head: &RequestHead, hijack_available: bool) -> Result<Disposition> {
        let request = self.resolver.resolve(head)?;

        // The metadata fetch carries the conditional predicates and
        // short-circuits NotFound and precondition failures before any body
        // transfer is paid for. The passthrough re-derives its headers from
        // its own upstream response; this result only gates it.
        let metadata = self.client.head_object(&request).await?;
        debug!(
            "Resolved {} ({} bytes, etag {})",
            request.object_path(),
            metadata.content_length,
            metadata.etag
        );

        if head.method == "HEAD" {
            return Ok(Disposition::Respond(ResponseEnvelope::object(
                &metadata,
                ResponseBody::Empty,
            )));
        }

        if self.passthrough_enabled && hijack_available {
            return Ok(Disposition::Hijack(request));
        }

        // Wait for the first stream item before committing a 200 head, so a
        // fetch that fails outright still maps to a proper error status.
        let mut stream = spawn_object_stream(Arc::clone(&self.client), request);
        stream.prime().await?;
        Ok(Disposition::Respond(ResponseEnvelope::object(
            &metadata,
            ResponseBody::Stream(stream),
        )))
    }
}
