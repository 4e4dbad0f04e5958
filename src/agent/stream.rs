//! Streaming turn output

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::runtime::TurnRunner;
use crate::context::RequestContext;
use crate::error::EngineResult;

/// Text increments of one streamed turn.
///
/// Yields `Ok(text)` pieces in order. A failure arrives as one final `Err`
/// item before the stream ends. Dropping the stream aborts the worker.
pub struct ChatStream {
    receiver: mpsc::Receiver<EngineResult<String>>,
    worker: JoinHandle<()>,
}

impl ChatStream {
    pub(crate) fn spawn(
        runner: TurnRunner,
        ctx: RequestContext,
        message: String,
        buffer: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let worker = tokio::spawn(async move {
            if let Err(e) = runner.run(&ctx, &message, Some(&sender)).await {
                // reader may already be gone
                let _ = sender.send(Err(e)).await;
            }
        });
        Self { receiver, worker }
    }

    /// Drain the stream and concatenate the text. Fails with the stream's
    /// error if the turn failed.
    pub async fn collect_text(mut self) -> EngineResult<String> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = EngineResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
