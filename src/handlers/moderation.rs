//! 운영 조치와 주기 정리

use crate::error::CallError;
use crate::handlers::{call, room};
use crate::protocol::ServerMessage;
use crate::state::AppState;
use std::sync::Arc;

/// 사용자 제재: 대기열과 초대에서 제거하고 진행 중인 방을 종료한다.
/// 모더레이션 종료는 세션 크레딧을 남기지 않는다.
pub async fn force_terminate(state: &Arc<AppState>, user_id: &str) -> bool {
    state.collaborators.moderation.ban(user_id);
    state.presence.withdraw(user_id);

    let (sent, received) = state
        .invites
        .abandon(&state.presence, &state.cooldowns, user_id);
    call::notify_abandoned(state, sent, received);

    let ended = room::terminate_for_moderation(state, user_id).await;
    state.send_to_user(user_id, ServerMessage::error(&CallError::Banned));

    tracing::warn!(user_id = %user_id, room_ended = ended, "User force-terminated by moderation");
    ended
}

/// 주기 정리: 만료된 쿨다운과 하트비트가 끊긴 대기자를 정리한다.
pub fn sweep(state: &AppState) {
    let purged = state.cooldowns.purge_expired();
    let idle = state
        .presence
        .sweep_idle(state.config.presence.idle_timeout());

    for user_id in &idle {
        let (sent, received) = state
            .invites
            .abandon(&state.presence, &state.cooldowns, user_id);
        call::notify_abandoned(state, sent, received);
    }

    if purged > 0 || !idle.is_empty() {
        tracing::debug!(
            purged_cooldowns = purged,
            idle_users = idle.len(),
            online = state.presence.online_count(),
            "Sweep completed"
        );
    }
}
