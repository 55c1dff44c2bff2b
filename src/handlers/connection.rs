//! 연결 핸들러

use crate::handlers::{call, room};
use crate::protocol::ServerMessage;
use crate::state::{AppState, PeerSession};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 등록된 연결
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: String,
    /// 같은 사용자의 새 연결이 이 연결을 대체하면 취소된다
    pub closed: CancellationToken,
}

/// 새 연결 처리.
///
/// 같은 사용자의 기존 연결은 새 연결로 교체되며, 이전 연결의 종료 이벤트는 무시된다.
pub async fn handle_connection(
    state: Arc<AppState>,
    user_id: &str,
    sender: UnboundedSender<ServerMessage>,
) -> Connection {
    let connection_id = Uuid::new_v4().to_string();
    let closed = CancellationToken::new();

    let session = PeerSession {
        user_id: user_id.to_string(),
        connection_id: connection_id.clone(),
        sender: sender.clone(),
        connected_at: Instant::now(),
        closed: closed.clone(),
    };

    if let Some(previous) = state.peers.insert(user_id.to_string(), session) {
        let _ = previous.sender.send(ServerMessage::Error {
            code: "superseded".to_string(),
            message: "Signed in from another connection".to_string(),
            invite_id: None,
            room_id: None,
        });
        previous.closed.cancel();
        tracing::info!(
            user_id = %user_id,
            previous_connection = %previous.connection_id,
            "Connection superseded"
        );
    }

    state.presence.connect(user_id, &connection_id);
    // 유예 중인 방이 있으면 재접속 전까지도 대기열에 노출되지 않게 유지
    if state.rooms.room_of(user_id).is_some() {
        state.presence.set_available(user_id, false);
    }

    let _ = sender.send(ServerMessage::Connected {
        user_id: user_id.to_string(),
        connection_id: connection_id.clone(),
    });

    tracing::info!(user_id = %user_id, connection_id = %connection_id, "New connection established");
    Connection {
        connection_id,
        closed,
    }
}

/// 연결 해제 처리
pub async fn handle_disconnect(state: Arc<AppState>, user_id: &str, connection_id: &str) {
    let removed = state
        .peers
        .remove_if(user_id, |_, session| session.connection_id == connection_id);
    let Some((_, session)) = removed else {
        tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Stale connection closed");
        return;
    };

    // 방이 살아 있으면 재접속에 대비해 레코드를 남긴다
    if state.rooms.room_of(user_id).is_some() {
        state.presence.suspend(user_id, connection_id);
    } else {
        state.presence.leave(user_id, connection_id);
    }

    // 대기 중인 초대는 자동 철회/거절
    let (sent, received) = state
        .invites
        .abandon(&state.presence, &state.cooldowns, user_id);
    call::notify_abandoned(&state, sent, received);

    room::handle_transport_lost(&state, user_id).await;

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %connection_id,
        duration_secs = session.connected_at.elapsed().as_secs(),
        "Connection closed"
    );
}

/// Heartbeat 처리
pub fn handle_heartbeat(state: &AppState, user_id: &str, sender: &UnboundedSender<ServerMessage>) {
    state.presence.touch(user_id);
    let _ = sender.send(ServerMessage::HeartbeatAck);
}
