//! The signaling relay: rendezvous and envelope forwarding only. No media
//! and no envelope payload ever passes through inspection here.

pub mod registry;

pub use registry::RoomRegistry;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::relay::registry::PeerSender;
use crate::signaling::SignalEvent;

/// Serves signaling clients on an already-bound listener until the listener
/// fails. Each connection runs on its own task against the shared registry.
pub async fn run(listener: TcpListener) -> Result<()> {
    let registry = Arc::new(Mutex::new(RoomRegistry::default()));
    info!(addr = %listener.local_addr()?, "signaling relay listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry).await {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<Mutex<RoomRegistry>>) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut joined: Option<String> = None;

    while let Some(frame) = source.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "socket error");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let event = match serde_json::from_str::<SignalEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "unparseable frame dropped");
                continue;
            }
        };

        match event {
            SignalEvent::JoinRoom {
                room_name,
                user_id,
                nickname,
            } => {
                if joined.is_some() {
                    debug!("second join on one socket ignored");
                    continue;
                }
                // Malformed joins get no reply at all: the client simply
                // never receives a roster.
                if room_name.is_empty() || nickname.is_empty() {
                    warn!("malformed join ignored");
                    continue;
                }

                let (roster, others) = {
                    let mut registry = registry.lock().await;
                    let roster = registry.join(&room_name, &user_id, &nickname, tx.clone());
                    (roster, registry.roommates(&user_id))
                };
                info!(room = %room_name, user = %user_id, nickname = %nickname, "participant joined");

                send_event(&tx, &SignalEvent::RoomUsers(roster));
                let notice = SignalEvent::UserJoined {
                    id: user_id.clone(),
                    nickname,
                };
                for peer in others {
                    send_event(&peer, &notice);
                }
                joined = Some(user_id);
            }
            other => {
                if joined.is_none() {
                    debug!("event before join dropped");
                    continue;
                }
                match other.relay_target() {
                    Some(to_id) => {
                        // Forward the original frame verbatim; delivery is
                        // fire-and-forget with no report back to the sender.
                        let target = registry.lock().await.sender_for(to_id);
                        match target {
                            Some(peer) => {
                                let _ = peer.send(Message::Text(text));
                            }
                            None => debug!(target = %to_id, "no live transport, envelope dropped"),
                        }
                    }
                    None => debug!("unexpected client event ignored"),
                }
            }
        }
    }

    if let Some(user_id) = joined {
        let remaining = registry.lock().await.remove(&user_id);
        info!(user = %user_id, "participant left");
        let notice = SignalEvent::UserLeft(user_id);
        for peer in remaining {
            send_event(&peer, &notice);
        }
    }
    Ok(())
}

fn send_event(tx: &PeerSender, event: &SignalEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json));
        }
        Err(e) => warn!(error = %e, "unserializable relay event"),
    }
}
