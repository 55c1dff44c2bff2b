//! 대기열 핸들러

use crate::error::CallError;
use crate::handlers::call;
use crate::protocol::{QueueEntry, ServerMessage};
use crate::state::AppState;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedSender;

/// 대기열 참여
pub fn handle_join_queue(
    state: &AppState,
    user_id: &str,
    sender: &UnboundedSender<ServerMessage>,
) -> Result<(), CallError> {
    if state.collaborators.moderation.is_banned(user_id) {
        return Err(CallError::Banned);
    }
    if !state.collaborators.profiles.is_complete(user_id) {
        return Err(CallError::ProfileIncomplete);
    }

    state.presence.join(user_id);
    send_snapshot(state, user_id, sender);

    tracing::info!(user_id = %user_id, "Joined queue");
    Ok(())
}

/// 대기열 이탈. 대기 중인 초대도 함께 정리한다.
pub fn handle_leave_queue(state: &AppState, user_id: &str) {
    state.presence.withdraw(user_id);
    release_invites(state, user_id);
    tracing::info!(user_id = %user_id, "Left queue");
}

/// 탭 숨김/표시
pub fn handle_visibility(state: &AppState, user_id: &str, hidden: bool) {
    state.presence.set_hidden(user_id, hidden);
    if hidden {
        release_invites(state, user_id);
    }
    tracing::debug!(user_id = %user_id, hidden = hidden, "Visibility changed");
}

/// 사용자 차단
pub fn handle_block(
    state: &AppState,
    user_id: &str,
    target: &str,
    sender: &UnboundedSender<ServerMessage>,
) -> Result<(), CallError> {
    if user_id == target {
        return Err(CallError::BadRequest("cannot block yourself".to_string()));
    }
    state.presence.block(user_id, target);

    // 서로의 목록에서 즉시 제거
    let _ = sender.send(ServerMessage::QueueDelta {
        user_id: target.to_string(),
        available: false,
        distance_km: None,
    });
    state.send_to_user(
        target,
        ServerMessage::QueueDelta {
            user_id: user_id.to_string(),
            available: false,
            distance_km: None,
        },
    );

    tracing::info!(user_id = %user_id, target = %target, "User blocked");
    Ok(())
}

/// 현재 대기열 스냅샷 전송
pub fn send_snapshot(state: &AppState, user_id: &str, sender: &UnboundedSender<ServerMessage>) {
    let users = build_snapshot(state, user_id);
    let _ = sender.send(ServerMessage::QueueSnapshot { users });
}

/// `viewer`가 볼 수 있는 대기열.
///
/// 거리 정보가 있으면 가까운 순, 없으면 무작위 순서.
pub fn build_snapshot(state: &AppState, viewer: &str) -> Vec<QueueEntry> {
    let mut entries: Vec<QueueEntry> = state
        .presence
        .list_available(viewer, &state.cooldowns)
        .into_iter()
        .map(|user_id| QueueEntry {
            distance_km: distance(state, viewer, &user_id),
            user_id,
        })
        .collect();

    if entries.iter().any(|e| e.distance_km.is_some()) {
        entries.sort_by(|a, b| match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    } else {
        entries.shuffle(&mut rand::thread_rng());
    }
    entries
}

/// 프레즌스 델타를 구독해 `user_id`의 채널로 전달한다.
///
/// 채널이 닫히면 종료한다. 수신이 밀리면 전체 스냅샷으로 다시 맞춘다.
pub async fn forward_deltas(
    state: Arc<AppState>,
    user_id: String,
    sender: UnboundedSender<ServerMessage>,
) {
    let mut deltas = state.presence.subscribe();

    loop {
        let message = match deltas.recv().await {
            Ok(delta) => {
                if delta.user_id == user_id {
                    continue;
                }
                if delta.available
                    && !state
                        .presence
                        .is_visible_to(&user_id, &delta.user_id, &state.cooldowns)
                {
                    continue;
                }
                ServerMessage::QueueDelta {
                    distance_km: if delta.available {
                        distance(&state, &user_id, &delta.user_id)
                    } else {
                        None
                    },
                    user_id: delta.user_id,
                    available: delta.available,
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(user_id = %user_id, skipped = skipped, "Queue deltas lagged, resyncing");
                ServerMessage::QueueSnapshot {
                    users: build_snapshot(&state, &user_id),
                }
            }
            Err(RecvError::Closed) => break,
        };

        if sender.send(message).is_err() {
            break;
        }
    }
}

fn distance(state: &AppState, from: &str, to: &str) -> Option<f64> {
    state
        .collaborators
        .distance
        .as_ref()
        .and_then(|provider| provider.distance_km(from, to))
}

fn release_invites(state: &AppState, user_id: &str) {
    let (sent, received) = state
        .invites
        .abandon(&state.presence, &state.cooldowns, user_id);
    call::notify_abandoned(state, sent, received);
}
