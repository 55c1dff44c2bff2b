//! WebRTC 시그널링 핸들러
//!
//! SDP와 ICE 후보는 내용을 해석하지 않고 방의 상대 참가자에게 전달한다.
//! 방 잠금 아래에서 전달하므로 같은 방의 메시지 순서는 보존된다.

use crate::error::CallError;
use crate::protocol::{CallMode, ServerMessage};
use crate::relay::{CandidateOutcome, DescriptionKind, DescriptionOutcome};
use crate::room::{Room, RoomStatus, Slot};
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Offer 처리
pub async fn handle_offer(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    sdp: &str,
) -> Result<(), CallError> {
    handle_description(state, user_id, room_id, sdp, DescriptionKind::Offer).await
}

/// Answer 처리. 응답자 쪽으로 보류된 후보가 있으면 이어서 내보낸다.
pub async fn handle_answer(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    sdp: &str,
) -> Result<(), CallError> {
    handle_description(state, user_id, room_id, sdp, DescriptionKind::Answer).await
}

/// ICE Candidate 처리
pub async fn handle_ice_candidate(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    candidate: &str,
) -> Result<(), CallError> {
    let handle = media_room(state, room_id)?;
    let mut room = lock_active(&handle, room_id).await?;
    let slot = room.require_slot(user_id)?;
    let peer = room.participant(slot.other()).to_string();

    match room.relay.on_candidate(slot, candidate) {
        CandidateOutcome::Forward => {
            state.send_to_user(
                &peer,
                ServerMessage::IceCandidate {
                    room_id: room_id.to_string(),
                    from: user_id.to_string(),
                    candidate: candidate.to_string(),
                },
            );
        }
        CandidateOutcome::Buffered => {
            tracing::trace!(
                room_id = %room_id,
                from = %user_id,
                buffered = room.relay.buffered(slot.other()),
                "Buffered ICE candidate"
            );
        }
        CandidateOutcome::Overflow => {
            return Err(CallError::BufferOverflow(room_id.to_string()));
        }
    }
    Ok(())
}

/// 클라이언트가 상대 설명 적용을 알림 → 보류 후보 전달
pub async fn handle_remote_applied(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
) -> Result<(), CallError> {
    let handle = media_room(state, room_id)?;
    let mut room = lock_active(&handle, room_id).await?;
    let slot = room.require_slot(user_id)?;

    let flushed = room.relay.mark_applied(slot);
    flush_candidates(state, &room, slot, flushed);
    Ok(())
}

/// 비시작자의 재협상 요청. 시작자가 새 offer를 만들도록 전달한다.
pub async fn handle_renegotiate(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
) -> Result<(), CallError> {
    let handle = media_room(state, room_id)?;
    let room = lock_active(&handle, room_id).await?;
    let slot = room.require_slot(user_id)?;

    if slot == Slot::A {
        return Err(CallError::BadRequest(
            "the initiator renegotiates by sending a new offer".to_string(),
        ));
    }
    if room.relay.pending_offer().is_some() {
        tracing::debug!(room_id = %room_id, "Renegotiation already in flight, ignoring request");
        return Ok(());
    }

    state.send_to_user(
        room.participant(Slot::A),
        ServerMessage::Renegotiate {
            room_id: room_id.to_string(),
            from: user_id.to_string(),
        },
    );
    tracing::info!(room_id = %room_id, from = %user_id, "Relayed renegotiation request");
    Ok(())
}

async fn handle_description(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    sdp: &str,
    kind: DescriptionKind,
) -> Result<(), CallError> {
    let handle = media_room(state, room_id)?;
    let mut room = lock_active(&handle, room_id).await?;
    let slot = room.require_slot(user_id)?;
    let peer = room.participant(slot.other()).to_string();

    let flushed = match room.relay.on_description(slot, kind) {
        DescriptionOutcome::Forward { flush } => flush,
        DescriptionOutcome::DropGlare => {
            tracing::debug!(room_id = %room_id, from = %user_id, "Dropped colliding offer");
            return Ok(());
        }
        DescriptionOutcome::Unexpected => {
            tracing::warn!(room_id = %room_id, from = %user_id, "Answer without a pending offer");
            return Ok(());
        }
    };

    let message = match kind {
        DescriptionKind::Offer => ServerMessage::Offer {
            room_id: room_id.to_string(),
            from: user_id.to_string(),
            sdp: sdp.to_string(),
        },
        DescriptionKind::Answer => ServerMessage::Answer {
            room_id: room_id.to_string(),
            from: user_id.to_string(),
            sdp: sdp.to_string(),
        },
    };
    state.send_to_user(&peer, message);
    flush_candidates(state, &room, slot, flushed);

    tracing::debug!(from = %user_id, room_id = %room_id, kind = ?kind, "Relayed description");
    Ok(())
}

/// `receiver`를 위해 보류됐던 후보를 순서대로 전달
fn flush_candidates(state: &AppState, room: &Room, receiver: Slot, candidates: Vec<String>) {
    if candidates.is_empty() {
        return;
    }
    let from = room.participant(receiver.other()).to_string();
    let count = candidates.len();
    for candidate in candidates {
        state.send_to_user(
            room.participant(receiver),
            ServerMessage::IceCandidate {
                room_id: room.id.clone(),
                from: from.clone(),
                candidate,
            },
        );
    }
    tracing::debug!(room_id = %room.id, to = %room.participant(receiver), count = count, "Flushed buffered ICE candidates");
}

fn media_room(state: &AppState, room_id: &str) -> Result<Arc<Mutex<Room>>, CallError> {
    state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))
}

async fn lock_active<'a>(
    handle: &'a Arc<Mutex<Room>>,
    room_id: &str,
) -> Result<MutexGuard<'a, Room>, CallError> {
    let room = handle.lock().await;
    if room.status != RoomStatus::Active {
        return Err(CallError::RoomNotActive(room_id.to_string()));
    }
    if room.mode == CallMode::Text {
        return Err(CallError::BadRequest("text rooms carry no media".to_string()));
    }
    Ok(room)
}
