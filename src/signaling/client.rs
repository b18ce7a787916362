use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::signaling::SignalEvent;

/// Client half of the signaling socket.
///
/// `connect` opens a websocket and pumps it through a pair of mpsc channels;
/// `from_channels` builds the same object over raw channel halves so tests
/// and embedders can substitute any transport for the real socket.
pub struct SignalingClient {
    tx: mpsc::Sender<SignalEvent>,
    rx: mpsc::Receiver<SignalEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalEvent>(100);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Outgoing pump. Sends a close frame when the session shuts down so
        // the relay observes the leave immediately rather than at TCP timeout.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = outgoing_rx.recv() => match maybe {
                        Some(event) => match serde_json::to_string(&event) {
                            Ok(json) => {
                                if write.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "unserializable signaling event"),
                        },
                        None => break,
                    },
                    _ = &mut shutdown_rx => break,
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // Incoming pump.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "signaling socket error");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<SignalEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "unparseable signaling frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Self {
            tx: outgoing_tx,
            rx: inbound_rx,
            shutdown: Some(shutdown_tx),
        })
    }

    /// Builds a client over pre-wired channel halves (fake transport seam).
    pub fn from_channels(tx: mpsc::Sender<SignalEvent>, rx: mpsc::Receiver<SignalEvent>) -> Self {
        Self {
            tx,
            rx,
            shutdown: None,
        }
    }

    pub async fn send(&self, event: SignalEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::SignalingClosed)
    }

    pub async fn receive(&mut self) -> Option<SignalEvent> {
        self.rx.recv().await
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::Sender<SignalEvent>,
        mpsc::Receiver<SignalEvent>,
        Option<oneshot::Sender<()>>,
    ) {
        (self.tx, self.rx, self.shutdown)
    }
}
