use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },
}

/// Something observed on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    /// The peer closed the transport. `None` when no close code was received.
    Closed(Option<u16>),
}

/// An open transport. Dropping the link detaches its event stream and closes
/// the underlying connection.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, events }
    }

    /// Queues a text frame. Returns false when the transport already went away.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    /// Next event; a finished stream reads as a close without code.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(None))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a transport to `endpoint`. Success means the transport is open.
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError>;
}

pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        let (ws_stream, _) =
            tokio::time::timeout(self.connect_timeout, connect_async(endpoint.as_str()))
                .await
                .map_err(|_| TransportError::Timeout {
                    endpoint: redacted(endpoint),
                    timeout: self.connect_timeout,
                })?
                .map_err(|err| TransportError::Connect {
                    endpoint: redacted(endpoint),
                    reason: err.to_string(),
                })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(err) = ws_writer.send(Message::Text(text)).await {
                                warn!(error = %err, "websocket send failed");
                                let _ = event_tx.send(TransportEvent::Error(err.to_string()));
                                break;
                            }
                        }
                        None => {
                            let _ = ws_writer.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = ws_reader.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if event_tx.send(TransportEvent::Message(text)).is_err() {
                                let _ = ws_writer.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|frame| u16::from(frame.code));
                            let _ = event_tx.send(TransportEvent::Closed(code));
                            // Flushes the queued close reply.
                            let _ = ws_writer.close().await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let _ = event_tx.send(TransportEvent::Error(err.to_string()));
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("websocket pump finished");
        });

        Ok(TransportLink::new(outbound_tx, event_rx))
    }
}

/// Endpoint with the token query stripped, for logs and errors.
pub(crate) fn redacted(endpoint: &Url) -> String {
    let mut shown = endpoint.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
