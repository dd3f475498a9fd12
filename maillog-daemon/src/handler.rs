//! One-shot request handling for a single accepted connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use maillog_core::EventBuffer;

use crate::error::TransportError;
use crate::protocol::{FrameCodec, Request, Response};

/// Serve exactly one request on `stream`, then return so the caller can drop
/// (and thereby close) the connection.
///
/// Transport failures, including an unknown or malformed request, are
/// returned without sending a response. Buffer failures are reported to the
/// client as `success: false`.
pub async fn handle_connection<S>(
    stream: S,
    buffer: Arc<EventBuffer>,
    io_timeout: Duration,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handle_framed(Framed::new(stream, FrameCodec::new()), buffer, io_timeout).await
}

/// [`handle_connection`] over an already framed stream.
///
/// A reply too large for one frame is replaced by the unsuccessful reply of
/// the same variant, so the client always gets an answer.
pub async fn handle_framed<S>(
    mut framed: Framed<S, FrameCodec<Request>>,
    buffer: Arc<EventBuffer>,
    io_timeout: Duration,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = tokio::time::timeout(io_timeout, framed.next())
        .await
        .map_err(|_| TransportError::Timeout)?
        .ok_or(TransportError::ShortRead)??;

    let response = dispatch(request, buffer).await;
    let fallback = response.failure();

    let sent = tokio::time::timeout(io_timeout, framed.send(response))
        .await
        .map_err(|_| TransportError::Timeout)?;
    match sent {
        Err(TransportError::FrameTooLarge { len, max }) => {
            tracing::error!(len, max, "reply exceeds frame limit, answering unsuccessfully");
            tokio::time::timeout(io_timeout, framed.send(fallback))
                .await
                .map_err(|_| TransportError::Timeout)?
        }
        other => other,
    }
}

/// Map a decoded request onto the buffer and build its response.
pub async fn dispatch(request: Request, buffer: Arc<EventBuffer>) -> Response {
    match request {
        Request::SubmitEvent { event } => {
            tracing::debug!(
                process = %event.process_name,
                pid = event.process_id,
                level = %event.level,
                "submit request",
            );
            let preview: String = event.message.chars().take(40).collect();
            let insert = tokio::task::spawn_blocking(move || buffer.insert(event)).await;
            let success = match insert {
                Ok(Ok(())) => {
                    tracing::info!(preview = %preview, "buffered event");
                    true
                }
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "failed to buffer event");
                    false
                }
                Err(err) => {
                    tracing::error!(error = %err, "buffer insert task failed");
                    false
                }
            };
            Response::SubmitEvent { success }
        }
        Request::GetStatus => {
            match tokio::task::spawn_blocking(move || buffer.get_all()).await {
                Ok(events) => {
                    tracing::info!(count = events.len(), "status request");
                    Response::GetStatus {
                        success: true,
                        events,
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "buffer read task failed");
                    Response::GetStatus {
                        success: false,
                        events: Vec::new(),
                    }
                }
            }
        }
    }
}
