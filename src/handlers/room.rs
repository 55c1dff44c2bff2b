//! 방 관리 핸들러
//!
//! 방 상태를 바꾸는 모든 경로(클라이언트 메시지, 연결 종료, 타이머)는 방 잠금을
//! 잡은 뒤에 상태를 확인한다. 이미 종료된 방이나 교체된 타이머의 콜백은
//! 아무 일도 하지 않는다.

use crate::error::CallError;
use crate::handlers::unix_millis;
use crate::invite::AcceptedInvite;
use crate::protocol::{CallMode, EndReason, LeaveReason, PeerUser, ServerMessage};
use crate::room::{Room, RoomStatus, Slot, TimerKind};
use crate::state::AppState;
use crate::timer::ScheduledTask;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const MAX_CHAT_LENGTH: usize = 2000;

/// 방 종료 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// 양쪽에 같은 사유
    Uniform(EndReason),
    /// 한쪽이 나감
    Left { by: Slot },
    /// 유예 기간 만료
    DisconnectTimeout,
}

impl Ending {
    fn canonical(self) -> EndReason {
        match self {
            Ending::Uniform(reason) => reason,
            Ending::Left { .. } => EndReason::UserLeft,
            Ending::DisconnectTimeout => EndReason::PartnerDisconnectTimeout,
        }
    }

    fn message_for(self, room_id: &str, slot: Slot) -> ServerMessage {
        match self {
            Ending::Uniform(reason) => ServerMessage::room_ended(room_id, reason),
            Ending::Left { by } => ServerMessage::room_ended(
                room_id,
                EndReason::from_leave(LeaveReason::Left, by == slot),
            ),
            Ending::DisconnectTimeout => {
                let reason = EndReason::PartnerDisconnectTimeout;
                ServerMessage::RoomEndedByDisconnect {
                    room_id: room_id.to_string(),
                    reason,
                    message: reason.message().to_string(),
                }
            }
        }
    }
}

/// 수락된 초대로 방 생성. 방 ID를 반환한다.
///
/// 참가자 중 누군가 이미 다른 방에 들어가 있으면 `Busy`.
pub async fn create_room(
    state: &Arc<AppState>,
    accepted: AcceptedInvite,
) -> Result<String, CallError> {
    let AcceptedInvite {
        invite,
        agreed_seconds,
    } = accepted;
    let room_id = Uuid::new_v4().to_string();
    let room_config = &state.config.room;

    let handle = state.rooms.insert(Room::new(
        room_id.clone(),
        invite.from_user_id.clone(),
        invite.to_user_id.clone(),
        agreed_seconds,
        invite.mode,
        room_config.max_buffered_candidates,
    ))?;
    let mut room = handle.lock().await;

    state.presence.set_available(&invite.from_user_id, false);
    state.presence.set_available(&invite.to_user_id, false);

    for slot in [Slot::A, Slot::B] {
        state.send_to_user(
            room.participant(slot),
            ServerMessage::Start {
                room_id: room_id.clone(),
                agreed_seconds,
                is_initiator: slot == Slot::A,
                mode: room.mode,
                peer_user: PeerUser {
                    user_id: room.participant(slot.other()).to_string(),
                },
            },
        );
    }

    match room.mode {
        CallMode::Text => {
            // 텍스트 모드는 미디어 협상이 없으므로 즉시 시작
            start_countdown(state, &mut room);
            schedule(state, &mut room, TimerKind::Inactivity, room_config.text_inactivity());
        }
        CallMode::Video => {
            schedule(state, &mut room, TimerKind::Connect, room_config.connect_timeout());
        }
    }

    tracing::info!(
        room_id = %room_id,
        initiator = %invite.from_user_id,
        responder = %invite.to_user_id,
        agreed_seconds = agreed_seconds,
        mode = ?room.mode,
        "Room created"
    );

    // 수락 직전에 발신자 연결이 끊겼다면 바로 유예 기간으로
    for slot in [Slot::A, Slot::B] {
        let user = room.participant(slot).to_string();
        if !state.peers.contains_key(&user) {
            begin_grace(state, &mut room, slot);
        }
    }

    Ok(room_id)
}

/// 미디어 준비 보고 (전송 연결 + 원격 트랙 수신)
pub async fn handle_media_ready(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
) -> Result<(), CallError> {
    let handle = state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))?;
    let mut room = handle.lock().await;
    let slot = room.require_slot(user_id)?;
    if room.status != RoomStatus::Active {
        return Err(CallError::RoomNotActive(room_id.to_string()));
    }

    if room.mark_media_ready(slot) && !room.clock.is_started() {
        start_countdown(state, &mut room);
    }
    Ok(())
}

/// 명시적 종료 요청
pub async fn handle_leave(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    reason: LeaveReason,
) -> Result<(), CallError> {
    let handle = state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))?;
    let mut room = handle.lock().await;
    let slot = room.require_slot(user_id)?;

    let ending = match reason {
        LeaveReason::Left => Ending::Left { by: slot },
        LeaveReason::MediaFailed => Ending::Uniform(EndReason::MediaFailed),
        LeaveReason::QualityTimeout => Ending::Uniform(EndReason::QualityTimeout),
    };
    if !finish(state, &mut room, ending) {
        return Err(CallError::RoomNotFound(room_id.to_string()));
    }
    Ok(())
}

/// 참가자의 채널이 예기치 않게 끊김
pub async fn handle_transport_lost(state: &Arc<AppState>, user_id: &str) {
    let Some(room_id) = state.rooms.room_of(user_id) else {
        return;
    };
    let Some(handle) = state.rooms.get(&room_id) else {
        return;
    };
    let mut room = handle.lock().await;
    let Some(slot) = room.slot_of(user_id) else {
        return;
    };

    match room.status {
        RoomStatus::Active => begin_grace(state, &mut room, slot),
        RoomStatus::GracePeriod if room.disconnected_slot() != Some(slot) => {
            // 양쪽 모두 끊김: 기다릴 상대가 없다
            finish(state, &mut room, Ending::DisconnectTimeout);
        }
        _ => {}
    }
}

/// 새 연결로 같은 방에 다시 참여
pub async fn handle_rejoin(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
) -> Result<(), CallError> {
    let handle = state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))?;
    let mut room = handle.lock().await;
    let slot = room.require_slot(user_id)?;

    match room.status {
        RoomStatus::GracePeriod if room.disconnected_slot() == Some(slot) => {
            room.resume_from_grace(slot)?;
            if room.clock.is_running() {
                schedule_session_timer(state, &mut room);
            }
            state.send_to_user(
                room.participant(slot.other()),
                ServerMessage::PartnerReconnected {
                    room_id: room.id.clone(),
                    remaining_seconds: room.remaining_secs(),
                },
            );
            tracing::info!(room_id = %room.id, user_id = %user_id, "Participant rejoined within grace period");
        }
        RoomStatus::Active => {
            // 유예 없이 연결이 교체됨: 상대 쪽 피어 연결은 죽었으므로 다시 협상
            room.replace_connection(slot)?;
            state.send_to_user(
                room.participant(slot.other()),
                ServerMessage::PartnerReconnected {
                    room_id: room.id.clone(),
                    remaining_seconds: room.remaining_secs(),
                },
            );
            tracing::info!(room_id = %room.id, user_id = %user_id, "Participant rejoined on a new connection");
        }
        _ => return Err(CallError::RoomNotActive(room_id.to_string())),
    }

    state.presence.set_available(user_id, false);
    state.send_to_user(
        user_id,
        ServerMessage::Rejoined {
            room_id: room.id.clone(),
            agreed_seconds: room.agreed_seconds,
            remaining_seconds: room.remaining_secs(),
            timer_running: room.clock.is_running(),
            is_initiator: slot == Slot::A,
            mode: room.mode,
            peer_user: PeerUser {
                user_id: room.participant(slot.other()).to_string(),
            },
        },
    );
    Ok(())
}

/// 텍스트 메시지 중계. 비활성 타이머(토치 규칙)를 연장한다.
pub async fn handle_chat(
    state: &Arc<AppState>,
    user_id: &str,
    room_id: &str,
    text: &str,
) -> Result<(), CallError> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_CHAT_LENGTH {
        return Err(CallError::BadRequest("chat message must be 1-2000 characters".to_string()));
    }

    let handle = state
        .rooms
        .get(room_id)
        .ok_or_else(|| CallError::RoomNotFound(room_id.to_string()))?;
    let mut room = handle.lock().await;
    let slot = room.require_slot(user_id)?;
    if room.status != RoomStatus::Active {
        return Err(CallError::RoomNotActive(room_id.to_string()));
    }

    room.last_message_at = Instant::now();
    state.send_to_user(
        room.participant(slot.other()),
        ServerMessage::Chat {
            room_id: room.id.clone(),
            from: user_id.to_string(),
            text: text.to_string(),
            sent_at: unix_millis(),
        },
    );
    Ok(())
}

/// 모더레이션에 의한 강제 종료 (크레딧 없음)
pub async fn terminate_for_moderation(state: &Arc<AppState>, user_id: &str) -> bool {
    let Some(room_id) = state.rooms.room_of(user_id) else {
        return false;
    };
    let Some(handle) = state.rooms.get(&room_id) else {
        return false;
    };
    let mut room = handle.lock().await;
    finish(state, &mut room, Ending::Uniform(EndReason::Moderation))
}

/// 방 종료 처리. 이미 종료된 방이면 `false`.
///
/// 양쪽 가용성을 복구하고, 최소 시간 이상 진행된 세션이면 크레딧과 쿨다운을 기록한다.
pub fn finish(state: &AppState, room: &mut Room, ending: Ending) -> bool {
    let Some(summary) = room.end(ending.canonical()) else {
        return false;
    };
    state.rooms.remove(&summary.room_id, &summary.participants);

    for user in &summary.participants {
        state.presence.release(user);
    }

    let min_credit = Duration::from_secs(state.config.room.min_credit_seconds);
    let credited = summary.reason != EndReason::Moderation && summary.elapsed >= min_credit;
    if credited {
        let [a, b] = &summary.participants;
        state.collaborators.credits.record_success(a, b);
        state
            .cooldowns
            .set(a, b, state.config.matching.session_cooldown());
    }

    for slot in [Slot::A, Slot::B] {
        if ending == Ending::DisconnectTimeout && !room.is_connected(slot) {
            continue;
        }
        state.send_to_user(
            room.participant(slot),
            ending.message_for(&summary.room_id, slot),
        );
    }

    tracing::info!(
        room_id = %summary.room_id,
        reason = ?summary.reason,
        elapsed_secs = summary.elapsed.as_secs(),
        credited = credited,
        "Room ended"
    );
    true
}

fn begin_grace(state: &Arc<AppState>, room: &mut Room, slot: Slot) {
    let window = state.config.room.grace_period();
    if room.enter_grace(slot, window).is_err() {
        return;
    }
    schedule(state, room, TimerKind::Grace, window);

    state.send_to_user(
        room.participant(slot.other()),
        ServerMessage::PartnerDisconnected {
            room_id: room.id.clone(),
            grace_period_seconds: window.as_secs(),
        },
    );
    tracing::info!(
        room_id = %room.id,
        user_id = %room.participant(slot),
        grace_ms = window.as_millis() as u64,
        "Participant disconnected, grace period started"
    );
}

fn start_countdown(state: &Arc<AppState>, room: &mut Room) {
    if !room.start_clock() {
        return;
    }
    schedule_session_timer(state, room);

    let remaining_seconds = room.remaining_secs();
    for slot in [Slot::A, Slot::B] {
        state.send_to_user(
            room.participant(slot),
            ServerMessage::TimerStarted {
                room_id: room.id.clone(),
                remaining_seconds,
            },
        );
    }
    tracing::info!(room_id = %room.id, remaining_seconds = remaining_seconds, "Session timer started");
}

fn schedule_session_timer(state: &Arc<AppState>, room: &mut Room) {
    let remaining = room.clock.remaining(Instant::now());
    schedule(state, room, TimerKind::Session, remaining);
}

fn schedule(state: &Arc<AppState>, room: &mut Room, kind: TimerKind, delay: Duration) {
    let epoch = room.next_epoch(kind);
    let task = ScheduledTask::after(
        delay,
        on_timer(state.clone(), room.id.clone(), kind, epoch),
    );
    room.set_timer(kind, task);
}

fn on_timer(state: Arc<AppState>, room_id: String, kind: TimerKind, epoch: u64) -> BoxFuture<'static, ()> {
    async move {
        let Some(handle) = state.rooms.get(&room_id) else {
            return;
        };
        let mut room = handle.lock().await;
        if !room.is_current(kind, epoch) {
            return;
        }

        let now = Instant::now();
        match kind {
            TimerKind::Session => {
                if room.clock.is_expired(now) {
                    finish(&state, &mut room, Ending::Uniform(EndReason::Completed));
                } else if room.clock.is_running() {
                    schedule_session_timer(&state, &mut room);
                }
            }
            TimerKind::Grace => {
                if room.status == RoomStatus::GracePeriod {
                    finish(&state, &mut room, Ending::DisconnectTimeout);
                }
            }
            TimerKind::Connect => {
                if !room.clock.is_started() {
                    tracing::warn!(room_id = %room_id, "Media never became ready");
                    finish(&state, &mut room, Ending::Uniform(EndReason::MediaFailed));
                }
            }
            TimerKind::Inactivity => {
                let idle = now.saturating_duration_since(room.last_message_at);
                let limit = state.config.room.text_inactivity();
                if idle >= limit {
                    finish(&state, &mut room, Ending::Uniform(EndReason::Inactivity));
                } else {
                    schedule(&state, &mut room, TimerKind::Inactivity, limit - idle);
                }
            }
        }
    }
    .boxed()
}
