//! 초대 핸들러

use crate::error::CallError;
use crate::handlers::room;
use crate::invite::{Invite, InviteRequest};
use crate::protocol::{CallMode, DeclineReason, PeerUser, ServerMessage};
use crate::state::AppState;
use crate::timer::ScheduledTask;
use std::sync::Arc;
use uuid::Uuid;

/// 초대 전송
pub fn handle_invite(
    state: &Arc<AppState>,
    from_user_id: &str,
    to_user_id: &str,
    requested_seconds: u32,
    mode: CallMode,
) -> Result<(), CallError> {
    let moderation = &state.collaborators.moderation;
    if moderation.is_banned(from_user_id) {
        return Err(CallError::Banned);
    }
    if moderation.is_banned(to_user_id) {
        return Err(CallError::RecipientUnavailable(to_user_id.to_string()));
    }

    let invite_id = Uuid::new_v4().to_string();
    let ttl = state.invites.ttl();
    let deadline = ScheduledTask::after(ttl, expire_invite(state.clone(), invite_id.clone()));

    let invite = state.invites.invite(
        &state.presence,
        &state.cooldowns,
        invite_id,
        InviteRequest {
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            requested_seconds,
            mode,
        },
        Some(deadline),
    )?;

    let ttl_ms = ttl.as_millis() as u64;
    state.send_to_user(
        &invite.from_user_id,
        ServerMessage::InviteSent {
            invite_id: invite.id.clone(),
            to_user_id: invite.to_user_id.clone(),
            ttl_ms,
        },
    );
    state.send_to_user(
        &invite.to_user_id,
        ServerMessage::Notify {
            invite_id: invite.id.clone(),
            from_user: PeerUser {
                user_id: invite.from_user_id.clone(),
            },
            requested_seconds: invite.requested_seconds,
            mode: invite.mode,
            ttl_ms,
        },
    );
    Ok(())
}

/// 초대 수락 → 방 생성
pub async fn handle_accept(
    state: &Arc<AppState>,
    user_id: &str,
    invite_id: &str,
    requested_seconds: u32,
) -> Result<(), CallError> {
    if state.rooms.room_of(user_id).is_some() {
        return Err(CallError::Busy);
    }

    let accepted = state.invites.accept(invite_id, user_id, requested_seconds)?;

    // 수락자가 보낸 초대가 있으면 조용히 거둬들인다
    if let Some(own) = state.invites.withdraw_silently(user_id) {
        state.send_to_user(
            &own.to_user_id,
            ServerMessage::Rescinded {
                invite_id: own.id.clone(),
            },
        );
    }

    let caller = accepted.invite.from_user_id.clone();
    let invite_id = accepted.invite.id.clone();
    if let Err(err) = room::create_room(state, accepted).await {
        // 동시에 수락된 다른 초대가 먼저 방을 잡았다
        tracing::warn!(invite_id = %invite_id, caller = %caller, acceptor = %user_id, "Room reservation lost");
        for user in [caller.as_str(), user_id] {
            if state.rooms.room_of(user).is_none() {
                state.presence.set_available(user, true);
            }
        }
        if state.rooms.room_of(&caller).is_none() {
            state.send_to_user(
                &caller,
                ServerMessage::declined(Some(&invite_id), Some(user_id), DeclineReason::Unavailable),
            );
        }
        return Err(err);
    }
    Ok(())
}

/// 명시적 거절
pub fn handle_decline(state: &AppState, user_id: &str, invite_id: &str) -> Result<(), CallError> {
    let invite = state
        .invites
        .decline(&state.presence, &state.cooldowns, invite_id, user_id)?;

    state.send_to_user(
        &invite.from_user_id,
        ServerMessage::declined(
            Some(&invite.id),
            Some(&invite.to_user_id),
            DeclineReason::UserDeclined,
        ),
    );
    Ok(())
}

/// 발신자의 철회
pub fn handle_rescind(state: &AppState, user_id: &str, to_user_id: &str) -> Result<(), CallError> {
    let invite = state
        .invites
        .rescind(&state.presence, &state.cooldowns, user_id, to_user_id)?;

    state.send_to_user(
        &invite.to_user_id,
        ServerMessage::Rescinded {
            invite_id: invite.id,
        },
    );
    Ok(())
}

/// 응답 마감 경과 → 자동 거절 (`timeout`)
pub async fn expire_invite(state: Arc<AppState>, invite_id: String) {
    let Some(invite) = state
        .invites
        .expire(&state.presence, &state.cooldowns, &invite_id)
    else {
        return;
    };

    state.send_to_user(
        &invite.from_user_id,
        ServerMessage::declined(
            Some(&invite.id),
            Some(&invite.to_user_id),
            DeclineReason::Timeout,
        ),
    );
    // 수신자의 알림 창도 닫는다
    state.send_to_user(
        &invite.to_user_id,
        ServerMessage::Rescinded {
            invite_id: invite.id,
        },
    );
}

/// 연결 종료/유휴로 정리된 초대를 상대에게 알림
pub fn notify_abandoned(state: &AppState, sent: Option<Invite>, received: Option<Invite>) {
    if let Some(invite) = sent {
        state.send_to_user(
            &invite.to_user_id,
            ServerMessage::Rescinded {
                invite_id: invite.id,
            },
        );
    }
    if let Some(invite) = received {
        state.send_to_user(
            &invite.from_user_id,
            ServerMessage::declined(
                Some(&invite.id),
                Some(&invite.to_user_id),
                DeclineReason::Unavailable,
            ),
        );
    }
}
