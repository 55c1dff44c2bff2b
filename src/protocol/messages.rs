//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 프레임은 `{"type": "<event>", "payload": {...}}` 형태이다.

use serde::{Deserialize, Serialize};

/// 통화 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    #[default]
    Video,
    Text,
}

/// 초대 거절 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    UserDeclined,
    Cooldown,
    Timeout,
    /// 수신자가 응답 전에 연결이 끊김
    Unavailable,
}

impl DeclineReason {
    pub fn message(&self) -> &'static str {
        match self {
            DeclineReason::UserDeclined => "They declined your invite",
            DeclineReason::Cooldown => "You can't invite this person again yet",
            DeclineReason::Timeout => "No response, the invite timed out",
            DeclineReason::Unavailable => "They are no longer available",
        }
    }
}

/// 클라이언트가 직접 방을 떠나는 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    #[default]
    Left,
    MediaFailed,
    QualityTimeout,
}

/// 방 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    UserLeft,
    PartnerLeft,
    PartnerDisconnectTimeout,
    QualityTimeout,
    MediaFailed,
    Moderation,
    Inactivity,
}

impl EndReason {
    /// 방을 떠난 쪽과 남은 쪽에 보이는 사유
    pub fn from_leave(reason: LeaveReason, self_initiated: bool) -> Self {
        match (reason, self_initiated) {
            (LeaveReason::Left, true) => EndReason::UserLeft,
            (LeaveReason::Left, false) => EndReason::PartnerLeft,
            (LeaveReason::MediaFailed, _) => EndReason::MediaFailed,
            (LeaveReason::QualityTimeout, _) => EndReason::QualityTimeout,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            EndReason::Completed => "Time's up, the call is complete",
            EndReason::UserLeft => "You left the call",
            EndReason::PartnerLeft => "Your partner left the call",
            EndReason::PartnerDisconnectTimeout => "Your partner disconnected and did not return",
            EndReason::QualityTimeout => "The call ended because of a poor connection",
            EndReason::MediaFailed => "The media connection could not be established",
            EndReason::Moderation => "The call was ended by a moderator",
            EndReason::Inactivity => "The chat ended after a period of inactivity",
        }
    }
}

/// 대기열 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// 통화 상대 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerUser {
    pub user_id: String,
}

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    // Connection
    #[serde(rename = "heartbeat")]
    Heartbeat {
        #[serde(default)]
        timestamp: Option<u64>,
    },
    #[serde(rename = "presence.visibility")]
    Visibility { hidden: bool },

    // Queue
    #[serde(rename = "queue.join")]
    QueueJoin,
    #[serde(rename = "queue.leave")]
    QueueLeave,
    #[serde(rename = "queue.list")]
    QueueList,
    #[serde(rename = "user.block", rename_all = "camelCase")]
    Block { user_id: String },

    // Invite
    #[serde(rename = "call.invite", rename_all = "camelCase")]
    Invite {
        to_user_id: String,
        requested_seconds: u32,
        #[serde(default)]
        mode: CallMode,
    },
    #[serde(rename = "call.accept", rename_all = "camelCase")]
    Accept {
        invite_id: String,
        requested_seconds: u32,
    },
    #[serde(rename = "call.decline", rename_all = "camelCase")]
    Decline { invite_id: String },
    #[serde(rename = "call.rescind", rename_all = "camelCase")]
    Rescind { to_user_id: String },

    // Room
    #[serde(rename = "call.end", rename_all = "camelCase")]
    End {
        room_id: String,
        #[serde(default)]
        reason: LeaveReason,
    },
    #[serde(rename = "room.rejoin", rename_all = "camelCase")]
    Rejoin { room_id: String },
    #[serde(rename = "room.media-ready", rename_all = "camelCase")]
    MediaReady { room_id: String },
    #[serde(rename = "chat.message", rename_all = "camelCase")]
    Chat { room_id: String, text: String },

    // WebRTC Signaling
    #[serde(rename = "rtc.offer", rename_all = "camelCase")]
    Offer { room_id: String, sdp: String },
    #[serde(rename = "rtc.answer", rename_all = "camelCase")]
    Answer { room_id: String, sdp: String },
    #[serde(rename = "rtc.ice", rename_all = "camelCase")]
    IceCandidate { room_id: String, candidate: String },
    #[serde(rename = "rtc.remote-applied", rename_all = "camelCase")]
    RemoteApplied { room_id: String },
    #[serde(rename = "rtc.renegotiate", rename_all = "camelCase")]
    Renegotiate { room_id: String },

    // TURN
    #[serde(rename = "rtc.turn-config", rename_all = "camelCase")]
    RequestTurnConfig { room_id: String },
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    // Connection
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        user_id: String,
        connection_id: String,
    },
    #[serde(rename = "heartbeat.ack")]
    HeartbeatAck,
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    // Queue
    #[serde(rename = "queue.snapshot")]
    QueueSnapshot { users: Vec<QueueEntry> },
    #[serde(rename = "queue.delta", rename_all = "camelCase")]
    QueueDelta {
        user_id: String,
        available: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_km: Option<f64>,
    },

    // Invite
    #[serde(rename = "call.invite-sent", rename_all = "camelCase")]
    InviteSent {
        invite_id: String,
        to_user_id: String,
        ttl_ms: u64,
    },
    #[serde(rename = "call.notify", rename_all = "camelCase")]
    Notify {
        invite_id: String,
        from_user: PeerUser,
        requested_seconds: u32,
        mode: CallMode,
        ttl_ms: u64,
    },
    #[serde(rename = "call.declined", rename_all = "camelCase")]
    Declined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_user_id: Option<String>,
        reason: DeclineReason,
        message: String,
    },
    #[serde(rename = "call.rescinded", rename_all = "camelCase")]
    Rescinded { invite_id: String },
    #[serde(rename = "call.start", rename_all = "camelCase")]
    Start {
        room_id: String,
        agreed_seconds: u32,
        is_initiator: bool,
        mode: CallMode,
        peer_user: PeerUser,
    },

    // Room
    #[serde(rename = "room.rejoined", rename_all = "camelCase")]
    Rejoined {
        room_id: String,
        agreed_seconds: u32,
        remaining_seconds: u64,
        timer_running: bool,
        is_initiator: bool,
        mode: CallMode,
        peer_user: PeerUser,
    },
    #[serde(rename = "room.timer-started", rename_all = "camelCase")]
    TimerStarted {
        room_id: String,
        remaining_seconds: u64,
    },
    #[serde(rename = "room.partner-disconnected", rename_all = "camelCase")]
    PartnerDisconnected {
        room_id: String,
        grace_period_seconds: u64,
    },
    #[serde(rename = "room.partner-reconnected", rename_all = "camelCase")]
    PartnerReconnected {
        room_id: String,
        remaining_seconds: u64,
    },
    #[serde(rename = "room.ended", rename_all = "camelCase")]
    RoomEnded {
        room_id: String,
        reason: EndReason,
        message: String,
    },
    #[serde(rename = "room.ended-by-disconnect", rename_all = "camelCase")]
    RoomEndedByDisconnect {
        room_id: String,
        reason: EndReason,
        message: String,
    },
    #[serde(rename = "chat.message", rename_all = "camelCase")]
    Chat {
        room_id: String,
        from: String,
        text: String,
        sent_at: u64,
    },

    // WebRTC Signaling
    #[serde(rename = "rtc.offer", rename_all = "camelCase")]
    Offer {
        room_id: String,
        from: String,
        sdp: String,
    },
    #[serde(rename = "rtc.answer", rename_all = "camelCase")]
    Answer {
        room_id: String,
        from: String,
        sdp: String,
    },
    #[serde(rename = "rtc.ice", rename_all = "camelCase")]
    IceCandidate {
        room_id: String,
        from: String,
        candidate: String,
    },
    #[serde(rename = "rtc.renegotiate", rename_all = "camelCase")]
    Renegotiate { room_id: String, from: String },

    // TURN
    #[serde(rename = "rtc.turn-config", rename_all = "camelCase")]
    TurnConfig {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<TurnConfigData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(err: &crate::error::CallError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            invite_id: None,
            room_id: None,
        }
    }

    pub fn room_ended(room_id: &str, reason: EndReason) -> Self {
        ServerMessage::RoomEnded {
            room_id: room_id.to_string(),
            reason,
            message: reason.message().to_string(),
        }
    }

    pub fn declined(invite_id: Option<&str>, to_user_id: Option<&str>, reason: DeclineReason) -> Self {
        ServerMessage::Declined {
            invite_id: invite_id.map(str::to_string),
            to_user_id: to_user_id.map(str::to_string),
            reason,
            message: reason.message().to_string(),
        }
    }
}

/// TURN 설정 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnConfigData {
    pub ice_servers: Vec<IceServer>,
    pub ttl: u64,
    pub timestamp: u64,
    pub room_id: String,
}

/// ICE 서버 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<String>,
}
