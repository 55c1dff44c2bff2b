//! 초대/방 에러 타입
//!
//! 모든 에러는 감지된 지점에서 복구되어 `error` 프레임으로 전달되며,
//! 공유 채널을 닫지 않는다.

use thiserror::Error;

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 잘못된 요청 (상태 변경 없음)
    Validation,
    /// 정책 위반 (쿨다운, 중복 초대 등)
    Policy,
    /// 이미 만료되었거나 처리된 대상
    Timing,
    /// 릴레이/전송 계층 문제
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("requested duration {0}s is outside the allowed range")]
    InvalidDuration(u32),

    #[error("cannot invite yourself")]
    SelfInvite,

    #[error("user {0} is offline")]
    UserOffline(String),

    #[error("invite is addressed to another user")]
    NotRecipient,

    #[error("not a participant of room {0}")]
    NotParticipant(String),

    #[error("a cooldown is active between these users")]
    Cooldown,

    #[error("an invite is already waiting for a response")]
    AlreadyWaiting,

    #[error("you are not available for a call")]
    Busy,

    #[error("user {0} is not available")]
    RecipientUnavailable(String),

    #[error("user {0} is already considering another invite")]
    RecipientBusy(String),

    #[error("profile is missing required media")]
    ProfileIncomplete,

    #[error("account is suspended")]
    Banned,

    #[error("user is blocked")]
    Blocked,

    #[error("invite {0} is no longer pending")]
    StaleInvite(String),

    #[error("no pending invite to {0}")]
    NoPendingInvite(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is not accepting this action in its current state")]
    RoomNotActive(String),

    #[error("candidate buffer for room {0} is full")]
    BufferOverflow(String),

    #[error("malformed message: {0}")]
    BadRequest(String),
}

impl CallError {
    /// 클라이언트에 전달되는 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            CallError::InvalidDuration(_) => "invalid_duration",
            CallError::SelfInvite => "self_invite",
            CallError::UserOffline(_) => "user_offline",
            CallError::NotRecipient => "not_recipient",
            CallError::NotParticipant(_) => "not_participant",
            CallError::Cooldown => "cooldown",
            CallError::AlreadyWaiting => "already_waiting",
            CallError::Busy => "busy",
            CallError::RecipientUnavailable(_) => "recipient_unavailable",
            CallError::RecipientBusy(_) => "recipient_busy",
            CallError::ProfileIncomplete => "profile_incomplete",
            CallError::Banned => "banned",
            CallError::Blocked => "blocked",
            CallError::StaleInvite(_) => "stale_invite",
            CallError::NoPendingInvite(_) => "no_pending_invite",
            CallError::RoomNotFound(_) => "room_not_found",
            CallError::RoomNotActive(_) => "room_not_active",
            CallError::BufferOverflow(_) => "buffer_overflow",
            CallError::BadRequest(_) => "bad_request",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::InvalidDuration(_)
            | CallError::SelfInvite
            | CallError::UserOffline(_)
            | CallError::NotRecipient
            | CallError::NotParticipant(_)
            | CallError::BadRequest(_) => ErrorKind::Validation,
            CallError::Cooldown
            | CallError::AlreadyWaiting
            | CallError::Busy
            | CallError::RecipientUnavailable(_)
            | CallError::RecipientBusy(_)
            | CallError::ProfileIncomplete
            | CallError::Banned
            | CallError::Blocked => ErrorKind::Policy,
            CallError::StaleInvite(_)
            | CallError::NoPendingInvite(_)
            | CallError::RoomNotFound(_)
            | CallError::RoomNotActive(_) => ErrorKind::Timing,
            CallError::BufferOverflow(_) => ErrorKind::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_invite_is_a_timing_error() {
        let err = CallError::StaleInvite("inv-1".to_string());
        assert_eq!(err.kind(), ErrorKind::Timing);
        assert_eq!(err.code(), "stale_invite");
    }

    #[test]
    fn cooldown_is_a_policy_error() {
        assert_eq!(CallError::Cooldown.kind(), ErrorKind::Policy);
    }
}
