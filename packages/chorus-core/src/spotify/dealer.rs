//! Dealer websocket connection.
//!
//! A [`DealerConnection`] is a handle to a background task that owns the
//! socket. Inbound text frames and the final close are delivered as
//! [`DealerEvent`]s on a channel; outbound frames are queued through the
//! handle. Cancelling the handle's token (see [`DealerConnection::dispose`])
//! closes the socket and is reported as a clean disconnect.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Errors from the dealer websocket.
#[derive(Debug, Error)]
pub enum DealerError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,

    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type DealerResult<T> = Result<T, DealerError>;

/// How a dealer connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Closed by us or by the server.
    Clean,
    /// Transport failure.
    Error,
}

/// Something the connection task reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealerEvent {
    Frame(String),
    Closed(DisconnectKind),
}

/// Handle to a running dealer connection.
#[derive(Clone)]
pub struct DealerConnection {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl DealerConnection {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queues a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> DealerResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DealerError::Closed);
        }
        self.outbound
            .send(text.into())
            .map_err(|_| DealerError::Closed)
    }

    /// Closes the connection. Idempotent.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves once the connection has been disposed or has dropped.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// Opens dealer connections.
#[async_trait]
pub trait DealerConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> DealerResult<(DealerConnection, mpsc::UnboundedReceiver<DealerEvent>)>;
}

/// [`DealerConnector`] backed by tokio-tungstenite.
pub struct TungsteniteConnector;

#[async_trait]
impl DealerConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> DealerResult<(DealerConnection, mpsc::UnboundedReceiver<DealerEvent>)> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| DealerError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let kind = loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = sink.close().await;
                        break DisconnectKind::Clean;
                    }
                    Some(text) = out_rx.recv() => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            log::debug!("[Dealer] Send failed: {}", e);
                            break DisconnectKind::Error;
                        }
                    }
                    msg = source.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = event_tx.send(DealerEvent::Frame(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::debug!("[Dealer] Server closed connection: {:?}", frame);
                            break DisconnectKind::Clean;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("[Dealer] Receive failed: {}", e);
                            break DisconnectKind::Error;
                        }
                        None => break DisconnectKind::Clean,
                    },
                }
            };

            token.cancel();
            let _ = event_tx.send(DealerEvent::Closed(kind));
        });

        Ok((DealerConnection::new(out_tx, cancel), event_rx))
    }
}
