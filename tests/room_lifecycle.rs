//! Room lifecycle: countdown start, expiry, leave, grace period and rejoin,
//! connect deadline, text-mode inactivity and moderation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{advance, Harness};
use tandem_signaling::handlers;
use tandem_signaling::protocol::{CallMode, ClientMessage, EndReason, LeaveReason, ServerMessage};

fn ended_reason(messages: &[ServerMessage]) -> Option<EndReason> {
    messages.iter().find_map(|m| match m {
        ServerMessage::RoomEnded { reason, .. } | ServerMessage::RoomEndedByDisconnect { reason, .. } => {
            Some(*reason)
        }
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn timer_starts_only_after_both_sides_are_ready() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 300, CallMode::Video).await;

    h.send(
        &alice,
        ClientMessage::MediaReady {
            room_id: room_id.clone(),
        },
    )
    .await;
    assert!(alice.drain().is_empty());

    h.send(
        &bob,
        ClientMessage::MediaReady {
            room_id: room_id.clone(),
        },
    )
    .await;
    for client in [&mut alice, &mut bob] {
        assert!(matches!(
            client.drain().as_slice(),
            [ServerMessage::TimerStarted {
                remaining_seconds: 210,
                ..
            }]
        ));
    }

    // A repeated report never restarts the countdown
    advance(Duration::from_secs(10)).await;
    h.send(&bob, ClientMessage::MediaReady { room_id }).await;
    assert!(bob.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_ends_room_once_and_records_credit() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 60, 60, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    advance(Duration::from_secs(59)).await;
    assert!(alice.drain().is_empty());

    advance(Duration::from_secs(1)).await;
    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::Completed));
    assert_eq!(ended_reason(&bob.drain()), Some(EndReason::Completed));

    assert!(h.state.rooms.is_empty());
    assert!(h.state.presence.is_available("alice"));
    assert!(h.state.presence.is_available("bob"));
    assert_eq!(h.state.collaborators.credits.count("alice"), 1);
    assert!(h.state.cooldowns.has("alice", "bob"));

    // A late leave is rejected, no second ending
    h.send(
        &alice,
        ClientMessage::End {
            room_id,
            reason: LeaveReason::Left,
        },
    )
    .await;
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerMessage::Error { .. }]
    ));
    assert!(bob.drain().is_empty());
    assert_eq!(h.state.collaborators.credits.count("alice"), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_leave_before_threshold_earns_no_credit() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    advance(Duration::from_secs(20)).await;
    h.send(
        &bob,
        ClientMessage::End {
            room_id,
            reason: LeaveReason::Left,
        },
    )
    .await;

    assert_eq!(ended_reason(&bob.drain()), Some(EndReason::UserLeft));
    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::PartnerLeft));
    assert_eq!(h.state.collaborators.credits.count("bob"), 0);
    assert!(!h.state.cooldowns.has("alice", "bob"));

    // The session timer was cancelled with the room
    advance(Duration::from_secs(200)).await;
    assert!(alice.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejoin_within_grace_resumes_timer() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 300, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    advance(Duration::from_secs(50)).await;
    h.disconnect(&bob).await;
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerMessage::PartnerDisconnected {
            grace_period_seconds: 10,
            ..
        }]
    ));
    assert!(!h.state.presence.is_available("alice"));

    advance(Duration::from_secs(6)).await;
    let mut bob = h.connect("bob").await;
    h.send(
        &bob,
        ClientMessage::Rejoin {
            room_id: room_id.clone(),
        },
    )
    .await;

    assert!(matches!(
        bob.drain().as_slice(),
        [ServerMessage::Rejoined {
            remaining_seconds: 160,
            timer_running: true,
            is_initiator: false,
            ..
        }]
    ));
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerMessage::PartnerReconnected {
            remaining_seconds: 160,
            ..
        }]
    ));

    // The grace deadline no longer applies
    advance(Duration::from_secs(10)).await;
    assert!(alice.drain().is_empty());

    advance(Duration::from_secs(150)).await;
    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::Completed));
    assert_eq!(ended_reason(&bob.drain()), Some(EndReason::Completed));
}

#[tokio::test(start_paused = true)]
async fn missing_rejoin_ends_with_disconnect_timeout() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    advance(Duration::from_secs(40)).await;
    h.disconnect(&bob).await;
    alice.drain();

    advance(Duration::from_secs(9)).await;
    assert!(alice.drain().is_empty());

    advance(Duration::from_secs(1)).await;
    match alice.drain().as_slice() {
        [ServerMessage::RoomEndedByDisconnect { reason, .. }] => {
            assert_eq!(*reason, EndReason::PartnerDisconnectTimeout)
        }
        other => panic!("expected room.ended-by-disconnect, got {other:?}"),
    }
    assert!(h.state.rooms.is_empty());
    assert!(h.state.presence.is_available("alice"));

    // Rejoining afterwards is rejected
    let mut bob = h.connect("bob").await;
    h.send(&bob, ClientMessage::Rejoin { room_id }).await;
    match bob.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(code, "room_not_found"),
        other => panic!("expected room_not_found, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn both_sides_disconnecting_ends_immediately() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    h.disconnect(&bob).await;
    h.disconnect(&alice).await;
    assert!(h.state.rooms.is_empty());
}

#[tokio::test(start_paused = true)]
async fn video_room_without_media_fails_after_connect_deadline() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;

    advance(Duration::from_secs(30)).await;
    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::MediaFailed));
    assert_eq!(ended_reason(&bob.drain()), Some(EndReason::MediaFailed));
}

#[tokio::test(start_paused = true)]
async fn text_room_relays_chat_and_ends_on_inactivity() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;

    h.send(
        &alice,
        ClientMessage::Invite {
            to_user_id: "bob".to_string(),
            requested_seconds: 500,
            mode: CallMode::Text,
        },
    )
    .await;
    alice.drain();
    let invite_id = bob.invite_id();
    h.send(
        &bob,
        ClientMessage::Accept {
            invite_id,
            requested_seconds: 500,
        },
    )
    .await;
    let messages = alice.drain();
    let room_id = messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::Start { room_id, .. } => Some(room_id.clone()),
            _ => None,
        })
        .unwrap();
    // Text rooms start counting immediately
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::TimerStarted { .. })));
    bob.drain();

    advance(Duration::from_secs(100)).await;
    h.send(
        &alice,
        ClientMessage::Chat {
            room_id: room_id.clone(),
            text: "hello".to_string(),
        },
    )
    .await;
    match bob.drain().as_slice() {
        [ServerMessage::Chat { from, text, .. }] => {
            assert_eq!(from, "alice");
            assert_eq!(text, "hello");
        }
        other => panic!("expected chat, got {other:?}"),
    }

    // The message passed the torch: 120s from the last message, not from the start
    advance(Duration::from_secs(119)).await;
    assert!(alice.drain().is_empty());
    advance(Duration::from_secs(1)).await;
    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::Inactivity));
}

#[tokio::test(start_paused = true)]
async fn moderation_ends_room_without_credit() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;
    h.media_ready(&mut alice, &mut bob, &room_id).await;

    advance(Duration::from_secs(60)).await;
    assert!(handlers::force_terminate(&h.state, "bob").await);

    assert_eq!(ended_reason(&alice.drain()), Some(EndReason::Moderation));
    assert_eq!(h.state.collaborators.credits.count("alice"), 0);
    assert!(h.state.collaborators.moderation.is_banned("bob"));

    // A banned user cannot rejoin the queue
    h.send(&bob, ClientMessage::QueueJoin).await;
    assert!(bob.drain().iter().any(|m| matches!(
        m,
        ServerMessage::Error { code, .. } if code == "banned"
    )));
}

#[tokio::test(start_paused = true)]
async fn outsiders_cannot_touch_a_room() {
    let h = Harness::new();
    let mut alice = h.queued("alice").await;
    let mut bob = h.queued("bob").await;
    let mut eve = h.queued("eve").await;
    let room_id = h.start_call(&mut alice, &mut bob, 120, 120, CallMode::Video).await;

    h.send(
        &eve,
        ClientMessage::End {
            room_id: room_id.clone(),
            reason: LeaveReason::Left,
        },
    )
    .await;
    match eve.drain().as_slice() {
        [ServerMessage::Error { code, room_id: Some(id), .. }] => {
            assert_eq!(code, "not_participant");
            assert_eq!(id, &room_id);
        }
        other => panic!("expected not_participant, got {other:?}"),
    }
    assert_eq!(h.state.rooms.len(), 1);
}
