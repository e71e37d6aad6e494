//! Stream transport
//!
//! One [`Transport::open`] call is one physical connection attempt. The
//! returned [`TransportHandle`] yields parsed messages and the terminal
//! error/close event; it never reconnects on its own.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::message::Message;
use crate::session::{Session, StreamTarget};

/// Something observed on an open connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A frame that parsed as a message
    Message(Message),
    /// The connection failed
    Error(String),
    /// The peer closed the connection, with its close code if it sent one
    Closed(Option<u16>),
}

/// Errors that can occur while opening a stream
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No credentials for the stream endpoint")]
    NoCredentials,

    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<TransportError> for String {
    fn from(err: TransportError) -> String {
        err.to_string()
    }
}

/// Opens one connection per call
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        session: &Session,
        target: &StreamTarget,
    ) -> Result<TransportHandle, TransportError>;
}

/// A live connection attempt
///
/// Closing is idempotent, and dropping the handle closes it.
pub struct TransportHandle {
    id: Uuid,
    events: Option<mpsc::Receiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TransportHandle {
    /// Wrap an event channel and the task feeding it
    pub fn new(events: mpsc::Receiver<TransportEvent>, reader: Option<JoinHandle<()>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Some(events),
            reader,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_none()
    }

    /// Wait for the next event
    ///
    /// A channel that ends without a terminal event reports `Closed(None)`.
    /// On a closed handle this never resolves.
    pub async fn next_event(&mut self) -> TransportEvent {
        match self.events.as_mut() {
            Some(events) => events.recv().await.unwrap_or(TransportEvent::Closed(None)),
            None => std::future::pending().await,
        }
    }

    /// Detach from the connection and release it
    pub fn close(&mut self) {
        if let Some(mut events) = self.events.take() {
            events.close();
            tracing::debug!("Closed transport handle {}", self.id);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "websocket")]
pub use ws::WsTransport;

#[cfg(feature = "websocket")]
mod ws {
    use super::*;
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tracing::{debug, info};

    use crate::config::defaults::DEFAULT_EVENT_BUFFER;
    use crate::error::AppError;
    use crate::session::redact_url;

    type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    /// WebSocket transport for the notification stream
    #[derive(Debug, Clone)]
    pub struct WsTransport {
        event_buffer: usize,
    }

    impl Default for WsTransport {
        fn default() -> Self {
            Self::new(DEFAULT_EVENT_BUFFER)
        }
    }

    impl WsTransport {
        pub fn new(event_buffer: usize) -> Self {
            Self {
                event_buffer: event_buffer.max(1),
            }
        }
    }

    #[async_trait]
    impl Transport for WsTransport {
        async fn open(
            &self,
            session: &Session,
            target: &StreamTarget,
        ) -> Result<TransportHandle, TransportError> {
            let url = session.stream_url(target).map_err(|e| match e {
                AppError::NotAuthenticated => TransportError::NoCredentials,
                other => TransportError::InvalidEndpoint(other.to_string()),
            })?;

            let (socket, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            info!("Connected to {}", redact_url(&url));

            let (tx, rx) = mpsc::channel(self.event_buffer);
            let reader = tokio::spawn(read_frames(socket, tx));
            Ok(TransportHandle::new(rx, Some(reader)))
        }
    }

    async fn read_frames(mut socket: Socket, tx: mpsc::Sender<TransportEvent>) {
        while let Some(frame) = socket.next().await {
            let event = match frame {
                Ok(WsMessage::Text(text)) => match Message::from_frame(&text) {
                    Some(message) => TransportEvent::Message(message),
                    None => {
                        debug!("Discarding non-message frame ({} bytes)", text.len());
                        continue;
                    }
                },
                Ok(WsMessage::Binary(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(message) => TransportEvent::Message(message),
                    Err(_) => {
                        debug!("Discarding binary frame ({} bytes)", bytes.len());
                        continue;
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    let code = frame.map(|f| u16::from(f.code));
                    let _ = tx.send(TransportEvent::Closed(code)).await;
                    return;
                }
                // Pings are answered by tungstenite while reading.
                Ok(_) => continue,
                Err(e) => {
                    let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                    return;
                }
            };
            if tx.send(event).await.is_err() {
                // Handle closed.
                return;
            }
        }
        let _ = tx.send(TransportEvent::Closed(None)).await;
    }
}
