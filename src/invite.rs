//! 초대 브로커
//!
//! 상태: `none → waiting → {accepted, declined, timeout, rescinded, cooldown_rejected}`.
//!
//! 초대 맵에서의 `remove`가 각 전이의 선형화 지점이다. 수락, 거절, 철회, 만료가
//! 경쟁해도 초대를 먼저 꺼낸 쪽만 성공하고 나머지는 `StaleInvite`를 받는다.

use crate::config::MatchConfig;
use crate::cooldown::CooldownLedger;
use crate::error::CallError;
use crate::presence::PresenceRegistry;
use crate::protocol::CallMode;
use crate::timer::ScheduledTask;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 초대 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub requested_seconds: u32,
    pub mode: CallMode,
    pub created_at: Instant,
    pub deadline: Instant,
}

/// 초대 요청
#[derive(Debug, Clone)]
pub struct InviteRequest {
    pub from_user_id: String,
    pub to_user_id: String,
    pub requested_seconds: u32,
    pub mode: CallMode,
}

/// 수락 결과
#[derive(Debug, Clone)]
pub struct AcceptedInvite {
    pub invite: Invite,
    pub agreed_seconds: u32,
}

/// 만료/정리로 인한 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Declined,
    Rescinded,
    Timeout,
    /// 수신자 연결 종료
    Abandoned,
}

struct PendingInvite {
    invite: Invite,
    // drop 시 마감 타이머 취소
    _deadline: Option<ScheduledTask>,
}

pub struct InviteBroker {
    invites: DashMap<String, PendingInvite>,
    /// 발신자 → 초대 ID
    outgoing: DashMap<String, String>,
    /// 수신자 → 초대 ID
    incoming: DashMap<String, String>,
    policy: MatchConfig,
}

/// `round((a + b) / 2)`를 허용 범위로 제한
pub fn agreed_seconds(caller: u32, recipient: u32, min: u32, max: u32) -> u32 {
    let avg = (u64::from(caller) + u64::from(recipient) + 1) / 2;
    let clamped = avg.clamp(u64::from(min), u64::from(max));
    u32::try_from(clamped).unwrap_or(max)
}

impl InviteBroker {
    pub fn new(policy: MatchConfig) -> Self {
        Self {
            invites: DashMap::new(),
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            policy,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.policy.invite_ttl()
    }

    pub fn validate_duration(&self, seconds: u32) -> Result<(), CallError> {
        if (self.policy.min_seconds..=self.policy.max_seconds).contains(&seconds) {
            Ok(())
        } else {
            Err(CallError::InvalidDuration(seconds))
        }
    }

    /// 새 초대 생성.
    ///
    /// 실패 시 상태는 변경되지 않는다. 성공하면 발신자는 `available=false`가 되고
    /// `deadline` 작업은 초대가 해소될 때 함께 취소된다.
    pub fn invite(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        invite_id: String,
        request: InviteRequest,
        deadline: Option<ScheduledTask>,
    ) -> Result<Invite, CallError> {
        let InviteRequest {
            from_user_id: from,
            to_user_id: to,
            requested_seconds,
            mode,
        } = request;

        self.validate_duration(requested_seconds)?;
        if from == to {
            return Err(CallError::SelfInvite);
        }
        if !presence.is_online(&to) {
            return Err(CallError::UserOffline(to));
        }
        if presence.is_blocked(&from, &to) {
            return Err(CallError::Blocked);
        }
        if cooldowns.has(&from, &to) {
            return Err(CallError::Cooldown);
        }
        if self.outgoing.contains_key(&from) {
            return Err(CallError::AlreadyWaiting);
        }
        if !presence.is_available(&from) {
            return Err(CallError::Busy);
        }
        if !presence.is_available(&to) {
            return Err(CallError::RecipientUnavailable(to));
        }

        // 발신자 단위 배타성
        match self.outgoing.entry(from.clone()) {
            Entry::Occupied(_) => return Err(CallError::AlreadyWaiting),
            Entry::Vacant(slot) => {
                slot.insert(invite_id.clone());
            }
        }
        // 수신자에게는 한 번에 하나의 알림만
        match self.incoming.entry(to.clone()) {
            Entry::Occupied(_) => {
                self.outgoing.remove_if(&from, |_, id| *id == invite_id);
                return Err(CallError::RecipientBusy(to));
            }
            Entry::Vacant(slot) => {
                slot.insert(invite_id.clone());
            }
        }

        let now = Instant::now();
        let invite = Invite {
            id: invite_id.clone(),
            from_user_id: from.clone(),
            to_user_id: to,
            requested_seconds,
            mode,
            created_at: now,
            deadline: now + self.ttl(),
        };
        self.invites.insert(
            invite_id,
            PendingInvite {
                invite: invite.clone(),
                _deadline: deadline,
            },
        );
        presence.set_available(&from, false);

        tracing::info!(
            invite_id = %invite.id,
            from = %invite.from_user_id,
            to = %invite.to_user_id,
            requested_seconds = requested_seconds,
            "Invite created"
        );
        Ok(invite)
    }

    /// 수신자의 수락. 방 생성은 호출자가 담당한다.
    pub fn accept(
        &self,
        invite_id: &str,
        acceptor: &str,
        recipient_seconds: u32,
    ) -> Result<AcceptedInvite, CallError> {
        self.check_recipient(invite_id, acceptor)?;
        self.validate_duration(recipient_seconds)?;

        let invite = self
            .take(invite_id)
            .ok_or_else(|| CallError::StaleInvite(invite_id.to_string()))?;
        let agreed = agreed_seconds(
            invite.requested_seconds,
            recipient_seconds,
            self.policy.min_seconds,
            self.policy.max_seconds,
        );

        tracing::info!(
            invite_id = %invite_id,
            from = %invite.from_user_id,
            to = %invite.to_user_id,
            agreed_seconds = agreed,
            "Invite accepted"
        );
        Ok(AcceptedInvite {
            invite,
            agreed_seconds: agreed,
        })
    }

    /// 명시적 거절: 24시간 쿨다운, 발신자 가용성 복구
    pub fn decline(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        invite_id: &str,
        decliner: &str,
    ) -> Result<Invite, CallError> {
        self.check_recipient(invite_id, decliner)?;
        let invite = self
            .resolve(presence, cooldowns, invite_id, Resolution::Declined)
            .ok_or_else(|| CallError::StaleInvite(invite_id.to_string()))?;
        Ok(invite)
    }

    /// 발신자의 철회: 1시간 쿨다운
    pub fn rescind(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<Invite, CallError> {
        let invite_id = self
            .outgoing
            .get(from_user_id)
            .map(|id| id.clone())
            .ok_or_else(|| CallError::NoPendingInvite(to_user_id.to_string()))?;

        let targets_user = self
            .invites
            .get(&invite_id)
            .map(|p| p.invite.to_user_id == to_user_id)
            .unwrap_or(false);
        if !targets_user {
            return Err(CallError::NoPendingInvite(to_user_id.to_string()));
        }

        self.resolve(presence, cooldowns, &invite_id, Resolution::Rescinded)
            .ok_or_else(|| CallError::NoPendingInvite(to_user_id.to_string()))
    }

    /// 마감 시간 경과. 이미 해소된 초대면 `None`.
    pub fn expire(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        invite_id: &str,
    ) -> Option<Invite> {
        self.resolve(presence, cooldowns, invite_id, Resolution::Timeout)
    }

    /// 연결 종료/유휴/숨김 처리.
    ///
    /// 보낸 초대는 철회로, 받은 초대는 쿨다운 없는 자동 거절로 정리한다.
    pub fn abandon(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        user_id: &str,
    ) -> (Option<Invite>, Option<Invite>) {
        let sent = self
            .outgoing
            .get(user_id)
            .map(|id| id.clone())
            .and_then(|id| self.resolve(presence, cooldowns, &id, Resolution::Rescinded));
        let received = self
            .incoming
            .get(user_id)
            .map(|id| id.clone())
            .and_then(|id| self.resolve(presence, cooldowns, &id, Resolution::Abandoned));
        (sent, received)
    }

    /// 발신자로서 대기 중인 초대를 조용히 정리 (쿨다운 없음).
    ///
    /// 다른 초대를 수락해 방에 들어가는 사용자에게 사용한다.
    pub fn withdraw_silently(&self, user_id: &str) -> Option<Invite> {
        let invite_id = self.outgoing.get(user_id).map(|id| id.clone())?;
        self.take(&invite_id)
    }

    pub fn get(&self, invite_id: &str) -> Option<Invite> {
        self.invites.get(invite_id).map(|p| p.invite.clone())
    }

    pub fn outgoing_of(&self, user_id: &str) -> Option<Invite> {
        let invite_id = self.outgoing.get(user_id).map(|id| id.clone())?;
        self.get(&invite_id)
    }

    pub fn incoming_of(&self, user_id: &str) -> Option<Invite> {
        let invite_id = self.incoming.get(user_id).map(|id| id.clone())?;
        self.get(&invite_id)
    }

    pub fn waiting_count(&self) -> usize {
        self.invites.len()
    }

    fn check_recipient(&self, invite_id: &str, user_id: &str) -> Result<(), CallError> {
        let pending = self
            .invites
            .get(invite_id)
            .ok_or_else(|| CallError::StaleInvite(invite_id.to_string()))?;
        if pending.invite.to_user_id != user_id {
            return Err(CallError::NotRecipient);
        }
        if Instant::now() >= pending.invite.deadline {
            // 마감 타이머가 곧 정리한다
            return Err(CallError::StaleInvite(invite_id.to_string()));
        }
        Ok(())
    }

    /// 초대를 원자적으로 제거하고 인덱스를 정리한다.
    fn take(&self, invite_id: &str) -> Option<Invite> {
        let (_, pending) = self.invites.remove(invite_id)?;
        let invite = pending.invite.clone();
        self.outgoing
            .remove_if(&invite.from_user_id, |_, id| id == invite_id);
        self.incoming
            .remove_if(&invite.to_user_id, |_, id| id == invite_id);
        Some(invite)
    }

    fn resolve(
        &self,
        presence: &PresenceRegistry,
        cooldowns: &CooldownLedger,
        invite_id: &str,
        resolution: Resolution,
    ) -> Option<Invite> {
        let invite = self.take(invite_id)?;

        let cooldown = match resolution {
            Resolution::Declined => Some(self.policy.decline_cooldown()),
            Resolution::Rescinded => Some(self.policy.rescind_cooldown()),
            Resolution::Timeout => self.policy.timeout_cooldown(),
            Resolution::Abandoned => None,
        };
        if let Some(duration) = cooldown {
            cooldowns.set(&invite.from_user_id, &invite.to_user_id, duration);
        }
        presence.set_available(&invite.from_user_id, true);

        tracing::info!(
            invite_id = %invite.id,
            from = %invite.from_user_id,
            to = %invite.to_user_id,
            resolution = ?resolution,
            "Invite resolved"
        );
        Some(invite)
    }
}
