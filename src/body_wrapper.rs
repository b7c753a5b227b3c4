//! Body streaming and capture utilities.
//!
//! This module tees an HTTP request or response body: the returned body streams every
//! chunk through to its destination untouched, while a companion future collects a bounded
//! copy for rendering.

use axum::body::Bytes;
use bytes::BytesMut;
use futures::{stream, Future, StreamExt};
use http_body_util::BodyExt;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::error;

/// Error type for body capture operations
#[derive(Debug, thiserror::Error)]
pub enum BodyCaptureError {
    #[error("Body stream error: {0}")]
    StreamError(String),
}

/// A bounded copy of a body that streamed past.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBody {
    /// The first `min(total_len, cap)` bytes of the body
    pub bytes: Bytes,
    /// Number of bytes that actually streamed through
    pub total_len: usize,
    /// Whether the stream ran to its end, as opposed to being dropped part-way
    pub complete: bool,
}

impl CapturedBody {
    /// True when the body was longer than the capture cap and `bytes` holds only a prefix.
    pub fn is_clipped(&self) -> bool {
        self.total_len > self.bytes.len()
    }
}

enum CaptureEvent {
    Chunk(Bytes),
    Failed(BodyCaptureError),
    End,
}

/// Resolves to the captured copy once the body has been streamed or dropped.
pub type CaptureFuture = Pin<Box<dyn Future<Output = Result<CapturedBody, BodyCaptureError>> + Send>>;

/// Creates a body capture stream that copies at most `cap` bytes as they flow through.
///
/// Returns a new body that passes every chunk through unchanged, and a future that resolves
/// once the body has been fully streamed or dropped. Bytes past `cap` are counted but never
/// copied, and the copy does not share the caller's buffers, so at most `cap` bytes are held
/// per body however large it is and however late the future is polled. Callers that only
/// need to know whether a body exceeds a limit `n` should pass `n + 1`.
///
/// # Examples
///
/// ```rust
/// use request_curl::body_wrapper::create_body_capture_stream;
/// use axum::body::Body;
/// use http_body_util::BodyExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (body, capture) = create_body_capture_stream(Body::from("Hello, World!"), 5);
///
/// // The destination still sees everything
/// let delivered = body.collect().await?.to_bytes();
/// assert_eq!(delivered, "Hello, World!");
///
/// let captured = capture.await?;
/// assert_eq!(captured.bytes, "Hello");
/// assert_eq!(captured.total_len, 13);
/// assert!(captured.complete);
/// # Ok(())
/// # }
/// ```
pub fn create_body_capture_stream<B>(body: B, cap: usize) -> (axum::body::Body, CaptureFuture)
where
    B: axum::body::HttpBody<Data = Bytes, Error = axum::Error> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let end_tx = tx.clone();
    let total = Arc::new(AtomicUsize::new(0));
    let relay_total = total.clone();
    let mut forwarded = 0usize;

    // Relay each chunk to the channel, passing the original through. Only the first `cap`
    // bytes are copied into the channel; past that the chunk lengths are merely counted.
    let relay = body.into_data_stream().map(move |result| {
        match &result {
            Ok(chunk) => {
                relay_total.fetch_add(chunk.len(), Ordering::Relaxed);
                let room = cap.saturating_sub(forwarded).min(chunk.len());
                if room > 0 {
                    forwarded += room;
                    let copy = Bytes::copy_from_slice(&chunk[..room]);
                    let _ = tx.send(CaptureEvent::Chunk(copy));
                }
            }
            Err(e) => {
                error!(error = %e, "Stream error during body capture");
                let _ = tx.send(CaptureEvent::Failed(BodyCaptureError::StreamError(
                    e.to_string(),
                )));
            }
        }
        result
    });

    // Only reached once the inner stream has yielded `None`
    let finished = stream::once(async move {
        let _ = end_tx.send(CaptureEvent::End);
    })
    .filter_map(|()| async { None::<Result<Bytes, axum::Error>> });

    let new_body = axum::body::Body::from_stream(relay.chain(finished));

    // Resolves when the stream finishes or every sender is dropped with the body
    let capture_future = Box::pin(async move {
        let mut buffer = BytesMut::new();
        let mut complete = false;

        while let Some(event) = rx.recv().await {
            match event {
                CaptureEvent::Chunk(chunk) => buffer.extend_from_slice(&chunk),
                CaptureEvent::Failed(e) => return Err(e),
                CaptureEvent::End => {
                    complete = true;
                    break;
                }
            }
        }

        Ok(CapturedBody {
            bytes: buffer.freeze(),
            total_len: total.load(Ordering::Relaxed),
            complete,
        })
    });

    (new_body, capture_future)
}
