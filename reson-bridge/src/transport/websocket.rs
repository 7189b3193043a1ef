//! WebSocket transport
//!
//! Carries one JSON envelope per text frame, for hosts that run the UI
//! surface out of process (a webview shell, a remote renderer) instead of
//! in-page. Built on tokio-tungstenite.

use std::marker::PhantomData;
use std::sync::Mutex;

use futures::stream::BoxStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use super::{MessageHandler, Transport};
use crate::error::{Error, Result};

pin_project_lite::pin_project! {
    /// Adapts a WebSocket stream into a `Stream + Sink` of JSON values
    ///
    /// - Outgoing values become text frames
    /// - Incoming text frames are parsed as JSON; ping, pong, binary and
    ///   close frames are skipped, as are frames that are not valid JSON
    pub struct JsonFrames<S, E> {
        #[pin]
        stream: S,
        marker: PhantomData<fn() -> E>
    }
}

impl<S, E> JsonFrames<S, E> {
    /// Wrap any compatible WebSocket stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            marker: PhantomData,
        }
    }
}

impl<S, E> Stream for JsonFrames<S, E>
where
    S: Stream<Item = std::result::Result<tungstenite::Message, E>>,
    E: std::error::Error,
{
    type Item = Value;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.stream.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(message))) => {
                    let text = match message {
                        tungstenite::Message::Text(text) => text,
                        _ => continue,
                    };
                    match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(value) => return std::task::Poll::Ready(Some(value)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse JSON frame from WebSocket");
                        }
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "WebSocket error");
                }
                std::task::Poll::Ready(None) => return std::task::Poll::Ready(None),
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }
    }
}

impl<S, E> Sink<Value> for JsonFrames<S, E>
where
    S: Sink<tungstenite::Message, Error = E>,
{
    type Error = E;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.project().stream.poll_ready(cx)
    }

    fn start_send(self: std::pin::Pin<&mut Self>, item: Value) -> std::result::Result<(), Self::Error> {
        let message = tungstenite::Message::Text(item.to_string().into());
        self.project().stream.start_send(message)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.project().stream.poll_close(cx)
    }
}

/// [`Transport`] over a WebSocket connection
///
/// Outgoing messages go through an unbounded queue drained by a writer task,
/// so `send` never waits on the socket. The reader side starts when
/// `on_message` is called.
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<Option<BoxStream<'static, Value>>>,
}

impl WebSocketChannel {
    /// Wrap an established WebSocket stream. Must be called within a Tokio
    /// runtime (the writer task is spawned here).
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<tungstenite::Message, E>>
            + Sink<tungstenite::Message, Error = E>
            + Send
            + 'static,
        E: std::error::Error + Send + 'static,
    {
        let (mut sink, stream) = JsonFrames::new(stream).split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "WebSocket send failed, closing writer");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        Self {
            outbound,
            inbound: Mutex::new(Some(stream.boxed())),
        }
    }

    /// Connect to a WebSocket endpoint (host side of an out-of-process UI,
    /// or a UI dialing its host)
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("WebSocket connection failed: {}", e)))?;

        if response.status() != tungstenite::http::StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::Transport(format!(
                "WebSocket upgrade failed with status: {}",
                response.status()
            )));
        }

        Ok(Self::new(stream))
    }

    /// Complete the server side handshake on an accepted connection
    pub async fn accept<T>(stream: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::Transport(format!("WebSocket handshake failed: {}", e)))?;
        Ok(Self::new(stream))
    }
}

impl Transport for WebSocketChannel {
    fn send(&self, message: Value) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("WebSocket writer gone, message dropped");
        }
    }

    fn on_message(&self, mut handler: MessageHandler) -> Result<()> {
        let mut stream = self
            .inbound
            .lock()
            .map_err(|_| Error::Transport("WebSocket reader lock poisoned".to_string()))?
            .take()
            .ok_or(Error::AlreadySubscribed)?;

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                handler(message);
            }
            tracing::debug!("WebSocket reader finished");
        });
        Ok(())
    }
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("writer_open", &!self.outbound.is_closed())
            .finish()
    }
}
