//! Streaming relay — chunked, SSE and NDJSON passthrough
//!
//! Streamed origin responses are pumped by a per-request task into a
//! bounded channel that backs the outbound body, so every origin chunk is
//! written as one outbound chunk as soon as it arrives. SSE is re-framed so
//! each complete event is exactly one outbound chunk.

use crate::error::GatewayError;
use crate::service::RequestGuard;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound response body
pub type ProxyBody = BoxBody<Bytes, GatewayError>;

/// Check if a response is a streaming response
pub fn is_streaming_response(headers: &http::HeaderMap) -> bool {
    if let Some(ct) = headers.get(http::header::CONTENT_TYPE) {
        if let Ok(value) = ct.to_str() {
            if value.contains("text/event-stream")
                || value.contains("application/x-ndjson")
                || value.contains("application/stream+json")
            {
                return true;
            }
        }
    }

    if let Some(te) = headers.get(http::header::TRANSFER_ENCODING) {
        if let Ok(value) = te.to_str() {
            if value.contains("chunked") {
                return true;
            }
        }
    }

    false
}

/// Check if a response is a Server-Sent Events stream
pub fn is_event_stream(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// Splits an SSE byte stream into complete events.
///
/// An event ends at a blank line. Lines end in `\n`, `\r\n` or a bare `\r`;
/// the terminator is kept so the emitted bytes are identical to what the
/// origin sent.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: BytesMut,
    /// Start of the line being scanned
    line_start: usize,
    /// Bytes before this offset are known not to end a line
    scanned: usize,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every event completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.next_event_end() {
            events.push(self.buf.split_to(end).freeze());
        }
        events
    }

    /// Remaining bytes of an unterminated event, if any
    pub fn finish(&mut self) -> Option<Bytes> {
        self.line_start = 0;
        self.scanned = 0;
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    /// Offset just past the blank line closing the first buffered event.
    ///
    /// Scanning resumes where the previous call stopped.
    fn next_event_end(&mut self) -> Option<usize> {
        let mut i = self.scanned;
        while i < self.buf.len() {
            let terminator = match self.buf[i] {
                b'\n' => 1,
                b'\r' => match self.buf.get(i + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A trailing CR may be the first half of CRLF, unless it
                    // already closes a blank line
                    None if i == self.line_start => 1,
                    None => {
                        self.scanned = i;
                        return None;
                    }
                },
                _ => {
                    i += 1;
                    continue;
                }
            };

            let blank = i == self.line_start;
            i += terminator;
            self.line_start = i;
            self.scanned = i;
            if blank {
                self.line_start = 0;
                self.scanned = 0;
                return Some(i);
            }
        }
        self.scanned = i;
        None
    }
}

/// Settings for one streamed relay
pub struct RelayOptions {
    pub request_id: String,
    pub origin_id: String,
    /// Re-frame as SSE events
    pub sse: bool,
    /// Maximum gap between two origin chunks
    pub idle_timeout: Duration,
    /// Fires when the origin is removed from the pool
    pub removed: CancellationToken,
}

/// Relay an origin byte stream as an outbound streaming body.
///
/// The request guard is held until the relay ends so the origin's parallel
/// request slot stays occupied for the whole stream.
pub fn relay<S>(upstream: S, guard: RequestGuard, options: RelayOptions) -> ProxyBody
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Result<Frame<Bytes>, GatewayError>>(1);
    tokio::spawn(async move {
        pump(Box::pin(upstream), tx, &options).await;
        drop(guard);
    });

    let frames = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
    BodyExt::boxed(StreamBody::new(frames))
}

async fn pump<S>(
    mut upstream: S,
    tx: mpsc::Sender<Result<Frame<Bytes>, GatewayError>>,
    options: &RelayOptions,
) where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut framer = options.sse.then(SseFramer::new);
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                tracing::debug!(
                    request_id = options.request_id,
                    origin = options.origin_id,
                    "Client went away, stopping stream relay"
                );
                return;
            }
            _ = options.removed.cancelled() => {
                Err(GatewayError::StreamInterrupted("origin removed".to_string()))
            }
            item = tokio::time::timeout(options.idle_timeout, upstream.next()) => match item {
                Err(_) => Err(GatewayError::StreamInterrupted(format!(
                    "no data from origin for {}ms",
                    options.idle_timeout.as_millis()
                ))),
                Ok(None) => break,
                Ok(Some(Err(e))) => Err(GatewayError::StreamInterrupted(e.to_string())),
                Ok(Some(Ok(chunk))) => Ok(chunk),
            },
        };

        let chunk = match next {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!(
                    request_id = options.request_id,
                    origin = options.origin_id,
                    chunks,
                    error = %e,
                    "Stream relay failed after response started"
                );
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let out = match framer.as_mut() {
            Some(framer) => framer.push(&chunk),
            None => vec![chunk],
        };
        for piece in out {
            if piece.is_empty() {
                continue;
            }
            chunks += 1;
            if tx.send(Ok(Frame::data(piece))).await.is_err() {
                return;
            }
        }
    }

    if let Some(rest) = framer.as_mut().and_then(SseFramer::finish) {
        chunks += 1;
        let _ = tx.send(Ok(Frame::data(rest))).await;
    }

    tracing::debug!(
        request_id = options.request_id,
        origin = options.origin_id,
        chunks,
        "Stream relay completed"
    );
}
