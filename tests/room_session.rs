//! Membership and connection-manager flows driven over an in-memory
//! signaling transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use lessonmesh::media::LocalMedia;
use lessonmesh::room::{RoomPhase, RoomSession, RoomState};
use lessonmesh::signaling::{Participant, SignalEvent, SignalingClient};

struct Harness {
    session: RoomSession,
    outbound: mpsc::Receiver<SignalEvent>,
}

fn harness() -> Harness {
    let (client_tx, outbound) = mpsc::channel(64);
    let (_inbound_tx, client_rx) = mpsc::channel(64);
    let client = SignalingClient::from_channels(client_tx, client_rx);
    let media = Arc::new(LocalMedia::new());
    let state = Arc::new(RoomState::new());
    Harness {
        session: RoomSession::new(client, media, state),
        outbound,
    }
}

fn member(id: &str, nickname: &str) -> Participant {
    Participant {
        id: id.into(),
        nickname: nickname.into(),
        joined_at: None,
    }
}

/// Next non-candidate outbound event; ICE gathering interleaves candidates
/// with offers/answers at its own pace, so tests skip them.
async fn next_signal(outbound: &mut mpsc::Receiver<SignalEvent>) -> SignalEvent {
    loop {
        let event = timeout(Duration::from_secs(5), outbound.recv())
            .await
            .expect("timed out waiting for outbound event")
            .expect("outbound channel closed");
        if !matches!(event, SignalEvent::Ice { .. }) {
            return event;
        }
    }
}

async fn assert_no_offer(outbound: &mut mpsc::Receiver<SignalEvent>) {
    let deadline = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return,
            event = outbound.recv() => match event {
                Some(SignalEvent::Offer { .. }) => panic!("receiver side must not offer"),
                Some(_) => {}
                None => return,
            },
        }
    }
}

/// A syntactically real offer, produced by an actual peer connection.
async fn real_offer() -> RTCSessionDescription {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();
    let _dc = pc.create_data_channel("chat", None).await.unwrap();
    pc.create_offer(None).await.unwrap()
}

#[tokio::test]
async fn joiner_waits_for_offers_from_existing_members() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    assert_eq!(h.session.phase(), RoomPhase::Joining);

    match next_signal(&mut h.outbound).await {
        SignalEvent::JoinRoom {
            room_name,
            user_id,
            nickname,
        } => {
            assert_eq!(room_name, "r1");
            assert_eq!(user_id, h.session.local_id());
            assert_eq!(nickname, "Alice");
        }
        other => panic!("expected join announcement, got {other:?}"),
    }

    h.session
        .handle_event(SignalEvent::RoomUsers(vec![member("T", "Tutor")]))
        .await;
    assert_eq!(h.session.phase(), RoomPhase::InRoom);

    // The roster member was here first, so it initiates; the joiner only
    // prepares the answering side and stays quiet.
    let manager = h.session.manager();
    assert_eq!(manager.link_count().await, 1);
    let link = manager.link("T").await.expect("link for roster member");
    assert!(!link.is_initiator());
    assert_no_offer(&mut h.outbound).await;
}

#[tokio::test]
async fn existing_member_initiates_toward_each_newcomer() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await; // join announcement
    h.session.handle_event(SignalEvent::RoomUsers(vec![])).await;

    h.session
        .handle_event(SignalEvent::UserJoined {
            id: "N".into(),
            nickname: "Newbie".into(),
        })
        .await;

    let manager = h.session.manager();
    let link = manager.link("N").await.expect("initiating link");
    assert!(link.is_initiator());

    match next_signal(&mut h.outbound).await {
        SignalEvent::Offer {
            description,
            from_id,
            to_id,
        } => {
            assert_eq!(from_id, h.session.local_id());
            assert_eq!(to_id, "N");
            assert!(!description.sdp.is_empty());
        }
        other => panic!("expected offer toward newcomer, got {other:?}"),
    }
}

#[tokio::test]
async fn first_participant_sends_first_and_never_receives_from_a_latecomer() {
    // First in the room.
    let mut a = harness();
    a.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut a.outbound).await;
    a.session.handle_event(SignalEvent::RoomUsers(vec![])).await;
    let a_id = a.session.local_id().to_owned();

    // Strict latecomer: sees the first participant in its roster and must
    // not offer toward it.
    let mut b = harness();
    b.session.join("r1", "Bob").await.unwrap();
    let _ = next_signal(&mut b.outbound).await;
    b.session
        .handle_event(SignalEvent::RoomUsers(vec![member(&a_id, "Alice")]))
        .await;
    let b_id = b.session.local_id().to_owned();

    let b_link = b.session.manager().link(&a_id).await.unwrap();
    assert!(!b_link.is_initiator());
    assert_no_offer(&mut b.outbound).await;

    // The first participant offers the moment it learns about the newcomer.
    a.session
        .handle_event(SignalEvent::UserJoined {
            id: b_id.clone(),
            nickname: "Bob".into(),
        })
        .await;
    match next_signal(&mut a.outbound).await {
        SignalEvent::Offer { from_id, to_id, .. } => {
            assert_eq!(from_id, a_id);
            assert_eq!(to_id, b_id);
        }
        other => panic!("expected offer from the earlier participant, got {other:?}"),
    }
}

#[tokio::test]
async fn inbound_offer_produces_an_answer() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    h.session.handle_event(SignalEvent::RoomUsers(vec![])).await;

    let local_id = h.session.local_id().to_owned();
    h.session
        .handle_event(SignalEvent::Offer {
            description: real_offer().await,
            from_id: "N".into(),
            to_id: local_id.clone(),
        })
        .await;

    assert!(h.session.manager().link("N").await.is_some());
    match next_signal(&mut h.outbound).await {
        SignalEvent::Answer {
            description,
            from_id,
            to_id,
        } => {
            assert_eq!(from_id, local_id);
            assert_eq!(to_id, "N");
            assert!(!description.sdp.is_empty());
        }
        other => panic!("expected answer, got {other:?}"),
    }
}

#[tokio::test]
async fn misrouted_envelopes_are_ignored() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    h.session.handle_event(SignalEvent::RoomUsers(vec![])).await;

    h.session
        .handle_event(SignalEvent::Offer {
            description: real_offer().await,
            from_id: "N".into(),
            to_id: "someone-else".into(),
        })
        .await;

    assert_eq!(h.session.manager().link_count().await, 0);
}

#[tokio::test]
async fn early_candidates_queue_until_the_offer_lands() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    // One existing member: it will initiate toward us, but its candidates
    // can outrun its offer.
    h.session
        .handle_event(SignalEvent::RoomUsers(vec![member("N", "Newbie")]))
        .await;

    let local_id = h.session.local_id().to_owned();
    let candidate = RTCIceCandidateInit {
        candidate: "candidate:3288811962 1 udp 2122260223 127.0.0.1 56143 typ host".into(),
        ..Default::default()
    };
    h.session
        .handle_event(SignalEvent::Ice {
            candidate,
            from_id: "N".into(),
            to_id: local_id.clone(),
        })
        .await;

    let link = h.session.manager().link("N").await.unwrap();
    assert_eq!(link.pending_candidates().await, 1);

    h.session
        .handle_event(SignalEvent::Offer {
            description: real_offer().await,
            from_id: "N".into(),
            to_id: local_id,
        })
        .await;

    // Applying the remote description drains the queue.
    assert_eq!(link.pending_candidates().await, 0);
    match next_signal(&mut h.outbound).await {
        SignalEvent::Answer { to_id, .. } => assert_eq!(to_id, "N"),
        other => panic!("expected answer after queued flush, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_leaving_tears_down_exactly_its_link() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    h.session
        .handle_event(SignalEvent::RoomUsers(vec![
            member("T", "Tutor"),
            member("S", "Student"),
        ]))
        .await;

    let manager = h.session.manager();
    assert_eq!(manager.link_count().await, 2);

    h.session.handle_event(SignalEvent::UserLeft("T".into())).await;
    assert_eq!(manager.link_count().await, 1);
    assert!(manager.link("T").await.is_none());
    assert!(manager.link("S").await.is_some());

    // Duplicate teardown for an already-gone peer changes nothing.
    h.session.handle_event(SignalEvent::UserLeft("T".into())).await;
    assert_eq!(manager.link_count().await, 1);
}

#[tokio::test]
async fn leaving_empties_the_link_map_and_stops_media() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    h.session
        .handle_event(SignalEvent::RoomUsers(vec![member("T", "Tutor")]))
        .await;
    let manager = h.session.manager();
    assert_eq!(manager.link_count().await, 1);

    h.session.leave().await;
    assert_eq!(h.session.phase(), RoomPhase::Idle);
    assert_eq!(manager.link_count().await, 0);
}

#[tokio::test]
async fn own_chat_is_recorded_once_with_no_wire_echo() {
    let mut h = harness();
    h.session.join("r1", "Alice").await.unwrap();
    let _ = next_signal(&mut h.outbound).await;
    h.session.handle_event(SignalEvent::RoomUsers(vec![])).await;

    h.session.send_chat("hello").await;

    let log = h.session.state().chat_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].message, "hello");
    assert_eq!(log[0].user_id, h.session.local_id());
}
