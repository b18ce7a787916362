use std::sync::Arc;
use tokio::sync::watch;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Observed status of one peer link.
///
/// State changes are published for anyone watching and logged by the link;
/// nothing reacts to them automatically (no reconnect).
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub peer_state: RTCPeerConnectionState,
    pub last_error: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            peer_state: RTCPeerConnectionState::New,
            last_error: None,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<LinkStatus>>,
    receiver: watch::Receiver<LinkStatus>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(LinkStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update_peer_state(&self, state: RTCPeerConnectionState) {
        self.status.send_modify(|status| {
            status.peer_state = state;
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.receiver.clone()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_changes_reach_subscribers() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();
        assert_eq!(rx.borrow().peer_state, RTCPeerConnectionState::New);

        monitor.update_peer_state(RTCPeerConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().peer_state, RTCPeerConnectionState::Connected);

        monitor.set_error("negotiation failed".into());
        rx.changed().await.unwrap();
        let status = rx.borrow().clone();
        assert_eq!(status.peer_state, RTCPeerConnectionState::Connected);
        assert_eq!(status.last_error.as_deref(), Some("negotiation failed"));
    }
}
