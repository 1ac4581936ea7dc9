use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::StreamBody;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::llm::types::{ProviderError, TokenSink};

const FRAME_BUFFER: usize = 64;

/// One unit produced by a background turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Token(String),
    Failed(String),
}

impl Frame {
    /// Body text for a frame once response headers are committed.
    pub fn render(self) -> String {
        match self {
            Frame::Token(text) => text,
            Frame::Failed(message) => format!("\n❌ Error: {}", message),
        }
    }
}

/// Sink half of a frame channel; fails with `SinkClosed` once the response
/// side is gone.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
}

impl FrameSink {
    pub async fn fail(&self, message: String) {
        // The receiver may already be gone; nothing left to tell it.
        let _ = self.tx.send(Frame::Failed(message)).await;
    }
}

#[async_trait]
impl TokenSink for FrameSink {
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError> {
        self.tx
            .send(Frame::Token(token.to_string()))
            .await
            .map_err(|_| ProviderError::SinkClosed)
    }
}

pub fn frame_channel() -> (FrameSink, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    (FrameSink { tx }, rx)
}

/// Chunked plain-text body fed by a frame channel. `head` is a frame that was
/// already received before the response was committed.
pub struct TextStream {
    head: Option<String>,
    rx: ReceiverStream<Frame>,
}

impl TextStream {
    pub fn new(head: Option<String>, rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            head,
            rx: ReceiverStream::new(rx),
        }
    }
}

impl Stream for TextStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(head) = self.head.take() {
            return Poll::Ready(Some(Ok(Bytes::from(head))));
        }
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|frame| frame.map(|f| Ok(Bytes::from(f.render()))))
    }
}

impl IntoResponse for TextStream {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            StreamBody::new(self),
        )
            .into_response()
    }
}
