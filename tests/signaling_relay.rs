//! SDP/ICE relay through a live room: candidate buffering, flush order,
//! glare handling, renegotiation and TURN credentials.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{Harness, TestClient};
use tandem_signaling::config::Config;
use tandem_signaling::protocol::{CallMode, ClientMessage, ServerMessage};

async fn video_call(h: &Harness) -> (TestClient, TestClient, String) {
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;
    (alice, bob, room_id)
}

fn offer(room_id: &str, sdp: &str) -> ClientMessage {
    ClientMessage::Offer {
        room_id: room_id.to_string(),
        sdp: sdp.to_string(),
    }
}

fn answer(room_id: &str, sdp: &str) -> ClientMessage {
    ClientMessage::Answer {
        room_id: room_id.to_string(),
        sdp: sdp.to_string(),
    }
}

fn ice(room_id: &str, candidate: &str) -> ClientMessage {
    ClientMessage::IceCandidate {
        room_id: room_id.to_string(),
        candidate: candidate.to_string(),
    }
}

fn candidates(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::IceCandidate { candidate, .. } => Some(candidate.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn early_candidates_wait_for_the_answer_and_keep_order() {
    let h = Harness::new();
    let (mut alice, mut bob, room_id) = video_call(&h).await;

    h.send(&alice, offer(&room_id, "offer-sdp")).await;
    h.send(&alice, ice(&room_id, "a1")).await;
    h.send(&alice, ice(&room_id, "a2")).await;

    let delivered = bob.drain();
    assert!(matches!(
        delivered.as_slice(),
        [ServerMessage::Offer { sdp, from, .. }] if sdp == "offer-sdp" && from == "alice"
    ));

    h.send(&bob, answer(&room_id, "answer-sdp")).await;
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerMessage::Answer { sdp, .. }] if sdp == "answer-sdp"
    ));
    assert_eq!(candidates(&bob.drain()), vec!["a1", "a2"]);

    // Once applied, candidates flow straight through
    h.send(&alice, ice(&room_id, "a3")).await;
    assert_eq!(candidates(&bob.drain()), vec!["a3"]);
}

#[tokio::test(start_paused = true)]
async fn answerer_candidates_wait_for_remote_applied() {
    let h = Harness::new();
    let (mut alice, mut bob, room_id) = video_call(&h).await;

    h.send(&alice, offer(&room_id, "offer")).await;
    h.send(&bob, answer(&room_id, "answer")).await;
    alice.drain();
    bob.drain();

    h.send(&bob, ice(&room_id, "b1")).await;
    h.send(&bob, ice(&room_id, "b2")).await;
    assert!(alice.drain().is_empty());

    h.send(
        &alice,
        ClientMessage::RemoteApplied {
            room_id: room_id.clone(),
        },
    )
    .await;
    let flushed = alice.drain();
    assert_eq!(candidates(&flushed), vec!["b1", "b2"]);
    assert!(flushed.iter().all(|m| matches!(
        m,
        ServerMessage::IceCandidate { from, .. } if from == "bob"
    )));

    h.send(&bob, ice(&room_id, "b3")).await;
    assert_eq!(candidates(&alice.drain()), vec!["b3"]);
}

#[tokio::test(start_paused = true)]
async fn initiator_offer_wins_glare() {
    let h = Harness::new();
    let (mut alice, mut bob, room_id) = video_call(&h).await;

    h.send(&alice, offer(&room_id, "from-alice")).await;
    h.send(&bob, offer(&room_id, "from-bob")).await;

    assert!(alice.drain().is_empty());
    assert!(matches!(
        bob.drain().as_slice(),
        [ServerMessage::Offer { sdp, .. }] if sdp == "from-alice"
    ));

    // A renegotiation request while an offer is outstanding is absorbed
    h.send(
        &bob,
        ClientMessage::Renegotiate {
            room_id: room_id.clone(),
        },
    )
    .await;
    assert!(alice.drain().is_empty());

    h.send(&bob, answer(&room_id, "answer")).await;
    alice.drain();
    h.send(
        &bob,
        ClientMessage::Renegotiate {
            room_id: room_id.clone(),
        },
    )
    .await;
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerMessage::Renegotiate { from, .. }] if from == "bob"
    ));
}

#[tokio::test(start_paused = true)]
async fn candidate_buffer_is_bounded() {
    let mut config = Config::default();
    config.room.max_buffered_candidates = 2;
    let h = Harness::with_config(config);
    let (mut alice, _bob, room_id) = video_call(&h).await;

    h.send(&alice, ice(&room_id, "a1")).await;
    h.send(&alice, ice(&room_id, "a2")).await;
    assert!(alice.drain().is_empty());

    h.send(&alice, ice(&room_id, "a3")).await;
    match alice.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(code, "buffer_overflow"),
        other => panic!("expected buffer_overflow, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn relay_rejects_non_members_and_text_rooms() {
    let h = Harness::new();
    let (_alice, mut bob, room_id) = video_call(&h).await;
    let mut eve = h.queued("eve").await;

    h.send(&eve, offer(&room_id, "sneaky")).await;
    match eve.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(code, "not_participant"),
        other => panic!("expected not_participant, got {other:?}"),
    }
    assert!(bob.drain().is_empty());

    let mut carol = h.queued("carol").await;
    let mut dave = h.queued("dave").await;
    let text_room = h.start_call(&mut carol, &mut dave, 120, 120, CallMode::Text).await;
    carol.drain();
    h.send(&carol, offer(&text_room, "sdp")).await;
    match carol.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(code, "bad_request"),
        other => panic!("expected bad_request, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn turn_config_is_issued_to_participants_only() {
    let mut config = Config::default();
    config.turn.url = "turn.example.net".to_string();
    config.turn.secret = "s3cret".to_string();
    let h = Harness::with_config(config);
    let (mut alice, _bob, room_id) = video_call(&h).await;
    let mut eve = h.queued("eve").await;

    h.send(
        &alice,
        ClientMessage::RequestTurnConfig {
            room_id: room_id.clone(),
        },
    )
    .await;
    match alice.drain().as_slice() {
        [ServerMessage::TurnConfig {
            success: true,
            data: Some(data),
            ..
        }] => {
            assert_eq!(data.room_id, room_id);
            assert!(data
                .ice_servers
                .iter()
                .any(|s| s.username.as_deref().is_some_and(|u| u.ends_with(":alice"))));
        }
        other => panic!("expected TURN config, got {other:?}"),
    }

    h.send(&eve, ClientMessage::RequestTurnConfig { room_id }).await;
    match eve.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(code, "not_participant"),
        other => panic!("expected not_participant, got {other:?}"),
    }
}
