use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("webrtc failure: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("media failure: {0}")]
    Media(String),

    #[error("signaling channel closed")]
    SignalingClosed,

    #[error("a live peer link already exists for {0}")]
    LinkExists(String),

    #[error("join attempted while a session is already active")]
    AlreadyJoined,
}

pub type Result<T> = std::result::Result<T, Error>;
