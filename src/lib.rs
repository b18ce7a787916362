//! Mesh lesson-room coordinator.
//!
//! Two cooperating halves: a websocket signaling relay ([`relay`]) that
//! tracks room membership and forwards offer/answer/candidate envelopes,
//! and a client stack ([`room`], [`peer`], [`channel`], [`media`]) that
//! establishes one direct transport per remote participant and keeps chat,
//! editor snapshots and media tracks consistent as people come and go.
//!
//! Media flows only peer-to-peer; the relay never carries it. Every
//! participant connects to every other participant, which keeps rooms small
//! by design.

pub mod channel;
pub mod error;
pub mod media;
pub mod peer;
pub mod relay;
pub mod room;
pub mod signaling;

pub use error::{Error, Result};
