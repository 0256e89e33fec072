use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open channel: {0}")]
    Open(String),
    #[error("channel io error: {0}")]
    Io(String),
}

/// One open persistent channel carrying text frames.
#[async_trait]
pub trait TransportChannel: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;
    /// Next inbound frame; `None` once the peer has closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

/// Seam for opening channels, so the connection manager can be driven by
/// in-memory fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportChannel>, TransportError>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportChannel>, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| TransportError::Open(err.to_string()))?;
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportChannel for WsChannel {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(_))) | None => return None,
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of the protocol.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Some(Err(TransportError::Io(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
