// ABOUTME: Newline-delimited JSON streaming of setup progress
// ABOUTME: The bus subscription lives inside the body stream and is released when the client goes away

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::Response,
};
use futures::stream::Stream;
use splitlab_sessions::{ProgressMessage, Subscription};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::response::ApiError;
use crate::AppState;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Body stream that owns its bus subscription
///
/// Ends after the terminal message of the execution, or when the execution is dropped from
/// the bus. Dropping the stream (client disconnect) unsubscribes.
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressMessage>,
    _subscription: Subscription,
    finished: bool,
}

impl ProgressStream {
    pub fn new(rx: mpsc::UnboundedReceiver<ProgressMessage>, subscription: Subscription) -> Self {
        Self {
            rx,
            _subscription: subscription,
            finished: false,
        }
    }
}

impl Stream for ProgressStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => {
                if message.is_final {
                    self.finished = true;
                }
                Poll::Ready(Some(Ok(encode_line(&message))))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// One message as a JSON object followed by a newline
pub fn encode_line(message: &ProgressMessage) -> Bytes {
    match serde_json::to_vec(message) {
        Ok(mut line) => {
            line.push(b'\n');
            Bytes::from(line)
        }
        Err(e) => {
            warn!("Failed to encode progress message: {}", e);
            Bytes::new()
        }
    }
}

/// Replay an execution's history, then follow it live
///
/// GET /api/progress/{execution_id}/stream
pub async fn stream_progress(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Response, ApiError> {
    let progress = state.orchestrator.progress();
    if !progress.contains(&execution_id) {
        return Err(ApiError::NotFound(format!(
            "Execution not found: {}",
            execution_id
        )));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = progress.subscribe(
        &execution_id,
        move |message| {
            let _ = tx.send(message.clone());
        },
        true,
    );
    debug!("Streaming progress for execution {}", execution_id);

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ProgressStream::new(rx, subscription)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use splitlab_sessions::{ProgressBus, Severity};

    #[test]
    fn test_encode_line_uses_wire_names() {
        let bus = ProgressBus::new();
        bus.create("e1", None);
        bus.info("e1", "Cloning");
        let message = &bus.messages("e1").unwrap()[0];

        let line = encode_line(message);
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["message"], "Cloning");
        assert_eq!(value["type"], "info");
        assert!(value.get("timestamp").is_some());
        assert!(value.get("isFinal").is_none());
        assert!(value.get("is_final").is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal_message_and_unsubscribes() {
        let bus = ProgressBus::new();
        bus.create("e1", None);
        bus.info("e1", "Cloning");

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = bus.subscribe(
            "e1",
            move |message| {
                let _ = tx.send(message.clone());
            },
            true,
        );
        let mut stream = ProgressStream::new(rx, subscription);
        assert_eq!(bus.subscriber_count("e1"), 1);

        bus.append("e1", "Done", Severity::Success);
        bus.complete("e1", true);

        let mut lines = Vec::new();
        while let Some(Ok(line)) = stream.next().await {
            lines.push(String::from_utf8(line.to_vec()).unwrap());
        }
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("Completed successfully"));

        drop(stream);
        assert_eq!(bus.subscriber_count("e1"), 0);
    }
}
