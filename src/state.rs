//! 애플리케이션 상태 관리

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::cooldown::CooldownLedger;
use crate::invite::InviteBroker;
use crate::presence::PresenceRegistry;
use crate::protocol::ServerMessage;
use crate::room::RoomManager;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// 전역 애플리케이션 상태
///
/// 각 하위 저장소는 키 단위로 잠금을 가진다 (사용자, 초대, 방).
pub struct AppState {
    /// 연결 세션 (user_id -> PeerSession)
    pub peers: DashMap<String, PeerSession>,
    pub presence: PresenceRegistry,
    pub cooldowns: CooldownLedger,
    pub invites: InviteBroker,
    pub rooms: RoomManager,
    pub collaborators: Collaborators,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Self {
        Self {
            peers: DashMap::new(),
            presence: PresenceRegistry::new(),
            cooldowns: CooldownLedger::new(),
            invites: InviteBroker::new(config.matching.clone()),
            rooms: RoomManager::new(),
            collaborators,
            config: Arc::new(config),
        }
    }

    /// 사용자에게 메시지 전송. 연결이 없으면 `false`.
    pub fn send_to_user(&self, user_id: &str, message: ServerMessage) -> bool {
        match self.peers.get(user_id) {
            Some(session) => session.sender.send(message).is_ok(),
            None => false,
        }
    }
}

/// 피어 세션 정보
pub struct PeerSession {
    pub user_id: String,
    pub connection_id: String,
    pub sender: UnboundedSender<ServerMessage>,
    pub connected_at: Instant,
    /// 새 연결로 교체되면 취소된다
    pub closed: CancellationToken,
}
