//! 프레즌스 레지스트리
//!
//! 온라인 여부와 초대 수신 가능 여부를 추적한다. 유효한 `available` 값은
//! 대기열 참여, 탭 가시성, 유휴 상태, 통화 중 여부를 모두 반영하며, 값이 바뀔
//! 때마다 구독자에게 델타로 전파된다.

use crate::cooldown::CooldownLedger;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const DELTA_CHANNEL_CAPACITY: usize = 1024;

/// 사용자별 프레즌스 레코드
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub user_id: String,
    pub connection_id: String,
    pub online: bool,
    pub available: bool,
    pub last_active_at: Instant,
    queued: bool,
    hidden: bool,
    idle: bool,
    engaged: bool,
}

impl PresenceRecord {
    fn new(user_id: &str, connection_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            online: true,
            available: false,
            last_active_at: Instant::now(),
            queued: false,
            hidden: false,
            idle: false,
            engaged: false,
        }
    }

    fn effective_available(&self) -> bool {
        self.online && self.queued && !self.hidden && !self.idle && !self.engaged
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }
}

/// 대기열 변경 델타
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceDelta {
    pub user_id: String,
    pub available: bool,
}

pub struct PresenceRegistry {
    records: DashMap<String, PresenceRecord>,
    blocks: DashMap<String, HashSet<String>>,
    deltas: broadcast::Sender<PresenceDelta>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (deltas, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            blocks: DashMap::new(),
            deltas,
        }
    }

    /// 연결 등록. 기존 레코드가 있으면 연결 ID만 교체한다.
    pub fn connect(&self, user_id: &str, connection_id: &str) {
        self.mutate_or_insert(user_id, connection_id, |record| {
            record.connection_id = connection_id.to_string();
            record.online = true;
            record.idle = false;
            record.last_active_at = Instant::now();
        });
    }

    /// 대기열 참여: 온라인 + 대기 상태
    pub fn join(&self, user_id: &str) {
        self.mutate(user_id, |record| {
            record.online = true;
            record.queued = true;
            record.idle = false;
            record.last_active_at = Instant::now();
        });
    }

    /// 대기열에서만 빠진다 (온라인 유지)
    pub fn withdraw(&self, user_id: &str) {
        self.mutate(user_id, |record| record.queued = false);
    }

    /// 오프라인 처리 및 레코드 삭제.
    ///
    /// `connection_id`가 현재 연결과 다르면 (이미 새 연결로 교체된 경우) 무시한다.
    pub fn leave(&self, user_id: &str, connection_id: &str) -> bool {
        let removed = self
            .records
            .remove_if(user_id, |_, record| record.connection_id == connection_id);

        match removed {
            Some((_, record)) => {
                if record.available {
                    self.publish(user_id, false);
                }
                true
            }
            None => false,
        }
    }

    /// 통화 중 연결 끊김: 오프라인으로 표시하되 레코드는 남긴다.
    ///
    /// 같은 방으로 재접속하면 대기열 참여 상태가 그대로 이어진다.
    pub fn suspend(&self, user_id: &str, connection_id: &str) -> bool {
        let mut current = false;
        self.mutate(user_id, |record| {
            if record.connection_id == connection_id {
                record.online = false;
                current = true;
            }
        });
        current
    }

    /// 통화 종료 후 해제. 그 사이 돌아오지 않은 사용자의 레코드는 지운다.
    pub fn release(&self, user_id: &str) {
        self.mutate(user_id, |record| record.engaged = false);
        self.records.remove_if(user_id, |_, record| !record.online);
    }

    /// 통화/초대 진행 여부에 따른 가용성 토글 (온라인 상태는 유지)
    pub fn set_available(&self, user_id: &str, available: bool) {
        self.mutate(user_id, |record| record.engaged = !available);
    }

    /// 탭 가시성
    pub fn set_hidden(&self, user_id: &str, hidden: bool) {
        self.mutate(user_id, |record| record.hidden = hidden);
    }

    /// heartbeat 수신
    pub fn touch(&self, user_id: &str) {
        self.mutate(user_id, |record| {
            record.last_active_at = Instant::now();
            record.idle = false;
        });
    }

    /// `idle_timeout` 동안 활동이 없던 사용자를 유휴 상태로 전환하고 그 목록을 반환한다.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|r| {
                r.online && !r.idle && now.saturating_duration_since(r.last_active_at) > idle_timeout
            })
            .map(|r| r.user_id.clone())
            .collect();

        for user_id in &stale {
            self.mutate(user_id, |record| record.idle = true);
        }
        stale
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.records.get(user_id).map(|r| r.online).unwrap_or(false)
    }

    pub fn is_available(&self, user_id: &str) -> bool {
        self.records.get(user_id).map(|r| r.available).unwrap_or(false)
    }

    pub fn is_queued(&self, user_id: &str) -> bool {
        self.records.get(user_id).map(|r| r.queued).unwrap_or(false)
    }

    pub fn record(&self, user_id: &str) -> Option<PresenceRecord> {
        self.records.get(user_id).map(|r| r.clone())
    }

    pub fn online_count(&self) -> usize {
        self.records.iter().filter(|r| r.online).count()
    }

    /// 사용자 차단 (양방향으로 목록에서 숨김)
    pub fn block(&self, user_id: &str, target: &str) {
        self.blocks
            .entry(user_id.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn is_blocked(&self, a: &str, b: &str) -> bool {
        let blocked_by = |x: &str, y: &str| {
            self.blocks
                .get(x)
                .map(|set| set.contains(y))
                .unwrap_or(false)
        };
        blocked_by(a, b) || blocked_by(b, a)
    }

    /// `viewer`에게 보여줄 수 있는 상대인지
    pub fn is_visible_to(&self, viewer: &str, candidate: &str, cooldowns: &CooldownLedger) -> bool {
        viewer != candidate
            && !self.is_blocked(viewer, candidate)
            && !cooldowns.has(viewer, candidate)
    }

    /// 초대 가능한 사용자 목록 (본인, 차단, 쿨다운 상대 제외)
    pub fn list_available(&self, excluding: &str, cooldowns: &CooldownLedger) -> Vec<String> {
        let candidates: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.available)
            .map(|r| r.user_id.clone())
            .collect();

        candidates
            .into_iter()
            .filter(|candidate| self.is_visible_to(excluding, candidate, cooldowns))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceDelta> {
        self.deltas.subscribe()
    }

    fn mutate<F>(&self, user_id: &str, f: F)
    where
        F: FnOnce(&mut PresenceRecord),
    {
        let change = match self.records.get_mut(user_id) {
            Some(mut record) => Self::apply(&mut record, f),
            None => None,
        };
        if let Some(available) = change {
            self.publish(user_id, available);
        }
    }

    fn mutate_or_insert<F>(&self, user_id: &str, connection_id: &str, f: F)
    where
        F: FnOnce(&mut PresenceRecord),
    {
        let change = {
            let mut record = self
                .records
                .entry(user_id.to_string())
                .or_insert_with(|| PresenceRecord::new(user_id, connection_id));
            Self::apply(&mut record, f)
        };
        if let Some(available) = change {
            self.publish(user_id, available);
        }
    }

    /// 변경을 적용하고 유효 가용성이 바뀌었으면 새 값을 반환
    fn apply<F>(record: &mut PresenceRecord, f: F) -> Option<bool>
    where
        F: FnOnce(&mut PresenceRecord),
    {
        let before = record.available;
        f(record);
        record.available = record.effective_available();
        (record.available != before).then_some(record.available)
    }

    fn publish(&self, user_id: &str, available: bool) {
        // 구독자가 없으면 전송 실패는 무시
        let _ = self.deltas.send(PresenceDelta {
            user_id: user_id.to_string(),
            available,
        });
    }
}
