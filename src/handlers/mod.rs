//! 핸들러 모듈

pub mod call;
pub mod connection;
pub mod moderation;
pub mod queue;
pub mod room;
pub mod signaling;
pub mod turn;

pub use call::*;
pub use connection::*;
pub use moderation::*;
pub use queue::*;
pub use room::*;
pub use signaling::*;
pub use turn::*;

use crate::error::CallError;
use crate::protocol::{ClientMessage, DeclineReason, ServerMessage};
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// 클라이언트 메시지 라우팅.
///
/// 처리 중 발생한 에러는 요청자에게 `error` 프레임으로 돌려주고 채널은 유지한다.
pub async fn dispatch(
    state: &Arc<AppState>,
    user_id: &str,
    sender: &UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    let result = match &msg {
        ClientMessage::Heartbeat { .. } => {
            handle_heartbeat(state, user_id, sender);
            Ok(())
        }
        ClientMessage::Visibility { hidden } => {
            handle_visibility(state, user_id, *hidden);
            Ok(())
        }
        ClientMessage::QueueJoin => handle_join_queue(state, user_id, sender),
        ClientMessage::QueueLeave => {
            handle_leave_queue(state, user_id);
            Ok(())
        }
        ClientMessage::QueueList => {
            send_snapshot(state, user_id, sender);
            Ok(())
        }
        ClientMessage::Block { user_id: target } => handle_block(state, user_id, target, sender),
        ClientMessage::Invite {
            to_user_id,
            requested_seconds,
            mode,
        } => handle_invite(state, user_id, to_user_id, *requested_seconds, *mode),
        ClientMessage::Accept {
            invite_id,
            requested_seconds,
        } => handle_accept(state, user_id, invite_id, *requested_seconds).await,
        ClientMessage::Decline { invite_id } => handle_decline(state, user_id, invite_id),
        ClientMessage::Rescind { to_user_id } => handle_rescind(state, user_id, to_user_id),
        ClientMessage::End { room_id, reason } => {
            handle_leave(state, user_id, room_id, *reason).await
        }
        ClientMessage::Rejoin { room_id } => handle_rejoin(state, user_id, room_id).await,
        ClientMessage::MediaReady { room_id } => {
            handle_media_ready(state, user_id, room_id).await
        }
        ClientMessage::Chat { room_id, text } => {
            handle_chat(state, user_id, room_id, text).await
        }
        ClientMessage::Offer { room_id, sdp } => handle_offer(state, user_id, room_id, sdp).await,
        ClientMessage::Answer { room_id, sdp } => {
            handle_answer(state, user_id, room_id, sdp).await
        }
        ClientMessage::IceCandidate { room_id, candidate } => {
            handle_ice_candidate(state, user_id, room_id, candidate).await
        }
        ClientMessage::RemoteApplied { room_id } => {
            handle_remote_applied(state, user_id, room_id).await
        }
        ClientMessage::Renegotiate { room_id } => {
            handle_renegotiate(state, user_id, room_id).await
        }
        ClientMessage::RequestTurnConfig { room_id } => {
            handle_turn_config_request(state, user_id, sender, room_id).await
        }
    };

    if let Err(err) = result {
        tracing::warn!(user_id = %user_id, code = err.code(), error = %err, "Request rejected");
        let _ = sender.send(error_frame(&err, &msg));
    }
}

/// 요청 맥락을 붙인 에러 프레임
pub fn error_frame(err: &CallError, msg: &ClientMessage) -> ServerMessage {
    match (err, msg) {
        (CallError::Cooldown, ClientMessage::Invite { to_user_id, .. }) => {
            ServerMessage::declined(None, Some(to_user_id), DeclineReason::Cooldown)
        }
        (_, ClientMessage::Accept { invite_id, .. } | ClientMessage::Decline { invite_id }) => {
            ServerMessage::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                invite_id: Some(invite_id.clone()),
                room_id: None,
            }
        }
        (
            _,
            ClientMessage::End { room_id, .. }
            | ClientMessage::Rejoin { room_id }
            | ClientMessage::MediaReady { room_id }
            | ClientMessage::Chat { room_id, .. }
            | ClientMessage::Offer { room_id, .. }
            | ClientMessage::Answer { room_id, .. }
            | ClientMessage::IceCandidate { room_id, .. }
            | ClientMessage::RemoteApplied { room_id }
            | ClientMessage::Renegotiate { room_id }
            | ClientMessage::RequestTurnConfig { room_id },
        ) => ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            invite_id: None,
            room_id: Some(room_id.clone()),
        },
        _ => ServerMessage::error(err),
    }
}

/// 현재 시각 (epoch ms)
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_on_invite_is_reported_as_decline() {
        let msg = ClientMessage::Invite {
            to_user_id: "bob".to_string(),
            requested_seconds: 120,
            mode: Default::default(),
        };
        match error_frame(&CallError::Cooldown, &msg) {
            ServerMessage::Declined {
                reason, to_user_id, ..
            } => {
                assert_eq!(reason, DeclineReason::Cooldown);
                assert_eq!(to_user_id.as_deref(), Some("bob"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn stale_accept_carries_invite_id() {
        let msg = ClientMessage::Accept {
            invite_id: "inv-9".to_string(),
            requested_seconds: 120,
        };
        let err = CallError::StaleInvite("inv-9".to_string());
        match error_frame(&err, &msg) {
            ServerMessage::Error { code, invite_id, .. } => {
                assert_eq!(code, "stale_invite");
                assert_eq!(invite_id.as_deref(), Some("inv-9"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
