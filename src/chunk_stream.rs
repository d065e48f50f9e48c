//! Lazy Stream Bridge
//!
//! Bridges the storage client's push-style chunk delivery into a pull-style
//! body the response writer consumes. The bounded channel between producer
//! and consumer has capacity 1, so the producer sits at most one chunk ahead
//! of the writer; backpressure is the writer simply not receiving yet.
//!
//! A `ChunkStream` is finite and not restartable: iterating it again means
//! issuing a new backend fetch.

use crate::resolver::ObjectRequest;
use crate::s3_client::S3Client;
use crate::Result;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Pull side of the bridge. Ends after the first `None`; an `Err` item means
/// the transfer is broken and the connection must be torn down.
pub struct ChunkStream {
    /// Chunk held back by `prime`, handed out before the channel is polled
    first: Option<Result<Bytes>>,
    receiver: mpsc::Receiver<Result<Bytes>>,
}

impl ChunkStream {
    /// Wait for the first item without consuming it, so a fetch that fails
    /// outright surfaces before any response head is committed. The producer
    /// is still at most one chunk ahead; the chunk just sits here instead of
    /// in the channel.
    pub async fn prime(&mut self) -> Result<()> {
        if self.first.is_none() {
            self.first = self.receiver.recv().await;
        }
        match &self.first {
            Some(Err(e)) => Err(e.clone()),
            _ => Ok(()),
        }
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.first.take() {
            return Poll::Ready(Some(item));
        }
        self.receiver.poll_recv(cx)
    }
}

/// Start the producer task for one object fetch and hand back the pull side.
///
/// The producer drives `S3Client::get_object`, which blocks on the channel
/// until the consumer takes each chunk. A failure before or during the
/// transfer arrives as the final `Err` item; the channel closing without one
/// is a clean end of stream.
pub fn spawn_object_stream(client: Arc<S3Client>, request: ObjectRequest) -> ChunkStream {
    let (sender, receiver) = mpsc::channel(1);

    tokio::spawn(async move {
        if let Err(e) = client.get_object(&request, sender.clone()).await {
            debug!("Object fetch for {} failed: {}", request.object_path(), e);
            let _ = sender.send(Err(e)).await;
        }
    });

    ChunkStream { first: None, receiver }
}
