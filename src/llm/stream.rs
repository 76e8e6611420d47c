//! The `TextStream` handed to streaming callers.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::LlmError;

/// Lazy, finite sequence of text deltas from one model call.
///
/// Backed by an mpsc channel fed by a task that owns the network response.
/// Dropping the stream closes the receiver; the producer notices on its next
/// send, exits, and drops the connection. A consumed stream cannot be
/// replayed; issue a new call instead.
pub struct TextStream {
    inner: ReceiverStream<Result<String, LlmError>>,
}

impl TextStream {
    pub fn new(rx: mpsc::Receiver<Result<String, LlmError>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Build an already-finished stream from fixed fragments.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let fragments: Vec<String> = fragments.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            // Capacity covers every fragment, so this never fails.
            let _ = tx.try_send(Ok(fragment));
        }
        Self::new(rx)
    }

    /// Drain the stream and join every fragment.
    pub async fn collect_text(mut self) -> Result<String, LlmError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TextStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fragments_stream_in_order_then_end() {
        let stream = TextStream::from_fragments(["Hel", "lo", "!"]);
        assert_eq!(stream.collect_text().await.unwrap(), "Hello!");
    }

    #[tokio::test]
    async fn dropping_stream_closes_producer() {
        let (tx, rx) = mpsc::channel(1);
        let stream = TextStream::new(rx);
        drop(stream);
        assert!(tx.send(Ok("late".to_string())).await.is_err());
        assert!(tx.is_closed());
    }
}
