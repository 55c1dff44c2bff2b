//! 방(세션) 상태와 저장소
//!
//! 상태: `active → grace_period → ended` (자발적 종료는 바로 `ended`).
//! 한 방의 모든 전이는 그 방의 `Mutex` 아래에서 일어난다. 서로 다른 방은
//! 완전히 병렬로 처리된다.

use crate::clock::SessionClock;
use crate::error::CallError;
use crate::protocol::{CallMode, EndReason};
use crate::relay::RelayState;
use crate::timer::ScheduledTask;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 참가자 슬롯. A는 항상 원래 발신자이자 offer 시작자이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    GracePeriod,
    Ended,
}

/// 방 타이머 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Session,
    Grace,
    Connect,
    Inactivity,
}

#[derive(Debug, Default)]
struct RoomTimers {
    session: Option<ScheduledTask>,
    grace: Option<ScheduledTask>,
    connect: Option<ScheduledTask>,
    inactivity: Option<ScheduledTask>,
}

impl TimerKind {
    fn index(self) -> usize {
        match self {
            TimerKind::Session => 0,
            TimerKind::Grace => 1,
            TimerKind::Connect => 2,
            TimerKind::Inactivity => 3,
        }
    }
}

impl RoomTimers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<ScheduledTask> {
        match kind {
            TimerKind::Session => &mut self.session,
            TimerKind::Grace => &mut self.grace,
            TimerKind::Connect => &mut self.connect,
            TimerKind::Inactivity => &mut self.inactivity,
        }
    }
}

/// 수락된 통화 한 건
#[derive(Debug)]
pub struct Room {
    pub id: String,
    participants: [String; 2],
    pub agreed_seconds: u32,
    pub mode: CallMode,
    pub status: RoomStatus,
    pub started_at: Instant,
    connected: [bool; 2],
    media_ready: [bool; 2],
    pub grace_period_expires_at: Option<Instant>,
    pub end_reason: Option<EndReason>,
    pub clock: SessionClock,
    pub relay: RelayState,
    pub last_message_at: Instant,
    timers: RoomTimers,
    epochs: [u64; 4],
}

/// 종료 처리 결과
#[derive(Debug, Clone)]
pub struct EndSummary {
    pub room_id: String,
    pub participants: [String; 2],
    pub reason: EndReason,
    pub elapsed: Duration,
}

impl Room {
    pub fn new(
        id: String,
        initiator: String,
        responder: String,
        agreed_seconds: u32,
        mode: CallMode,
        max_buffered: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            participants: [initiator, responder],
            agreed_seconds,
            mode,
            status: RoomStatus::Active,
            started_at: now,
            connected: [true, true],
            media_ready: [false, false],
            grace_period_expires_at: None,
            end_reason: None,
            clock: SessionClock::new(Duration::from_secs(u64::from(agreed_seconds))),
            relay: RelayState::new(Slot::A, max_buffered),
            last_message_at: now,
            timers: RoomTimers::default(),
            epochs: [0; 4],
        }
    }

    pub fn participant(&self, slot: Slot) -> &str {
        &self.participants[slot.index()]
    }

    pub fn participants(&self) -> &[String; 2] {
        &self.participants
    }

    pub fn slot_of(&self, user_id: &str) -> Option<Slot> {
        if self.participants[0] == user_id {
            Some(Slot::A)
        } else if self.participants[1] == user_id {
            Some(Slot::B)
        } else {
            None
        }
    }

    /// 참가자 확인 후 슬롯 반환
    pub fn require_slot(&self, user_id: &str) -> Result<Slot, CallError> {
        self.slot_of(user_id)
            .ok_or_else(|| CallError::NotParticipant(self.id.clone()))
    }

    pub fn is_connected(&self, slot: Slot) -> bool {
        self.connected[slot.index()]
    }

    pub fn is_ended(&self) -> bool {
        self.status == RoomStatus::Ended
    }

    /// 현재 슬롯의 연결이 끊긴 상태(유예 중)인지
    pub fn disconnected_slot(&self) -> Option<Slot> {
        [Slot::A, Slot::B]
            .into_iter()
            .find(|slot| !self.connected[slot.index()])
    }

    /// 타이머 종류별 새 epoch. 콜백은 이 값이 여전히 유효할 때만 동작해야 한다.
    pub fn next_epoch(&mut self, kind: TimerKind) -> u64 {
        let epoch = &mut self.epochs[kind.index()];
        *epoch += 1;
        *epoch
    }

    pub fn is_current(&self, kind: TimerKind, epoch: u64) -> bool {
        !self.is_ended() && self.epochs[kind.index()] == epoch
    }

    pub fn set_timer(&mut self, kind: TimerKind, task: ScheduledTask) {
        *self.timers.slot(kind) = Some(task);
    }

    pub fn cancel_timer(&mut self, kind: TimerKind) {
        self.timers.slot(kind).take();
    }

    pub fn has_timer(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Session => self.timers.session.is_some(),
            TimerKind::Grace => self.timers.grace.is_some(),
            TimerKind::Connect => self.timers.connect.is_some(),
            TimerKind::Inactivity => self.timers.inactivity.is_some(),
        }
    }

    /// 미디어 준비 보고. 양쪽 모두 준비되면 `true`.
    pub fn mark_media_ready(&mut self, slot: Slot) -> bool {
        self.media_ready[slot.index()] = true;
        self.media_ready.iter().all(|ready| *ready)
    }

    /// 카운트다운 시작 (한 번만)
    pub fn start_clock(&mut self) -> bool {
        let started = self.clock.start(Instant::now());
        if started {
            self.cancel_timer(TimerKind::Connect);
        }
        started
    }

    pub fn remaining_secs(&self) -> u64 {
        self.clock.remaining_secs(Instant::now())
    }

    /// 예기치 않은 연결 종료 → 유예 기간
    pub fn enter_grace(&mut self, slot: Slot, window: Duration) -> Result<(), CallError> {
        if self.status != RoomStatus::Active {
            return Err(CallError::RoomNotActive(self.id.clone()));
        }
        let now = Instant::now();
        self.status = RoomStatus::GracePeriod;
        self.connected[slot.index()] = false;
        self.media_ready[slot.index()] = false;
        self.grace_period_expires_at = Some(now + window);
        self.clock.pause(now);
        self.cancel_timer(TimerKind::Session);
        Ok(())
    }

    /// 유예 기간 내 재접속 → 활성 상태로 복귀, 경과 시간 유지
    pub fn resume_from_grace(&mut self, slot: Slot) -> Result<(), CallError> {
        if self.status != RoomStatus::GracePeriod || self.connected[slot.index()] {
            return Err(CallError::RoomNotActive(self.id.clone()));
        }
        self.status = RoomStatus::Active;
        self.connected[slot.index()] = true;
        self.grace_period_expires_at = None;
        self.cancel_timer(TimerKind::Grace);
        self.clock.resume(Instant::now());
        self.relay.reset();
        Ok(())
    }

    /// 유예 기간 없이 새 연결로 교체된 참가자. 협상을 처음부터 다시 한다.
    pub fn replace_connection(&mut self, slot: Slot) -> Result<(), CallError> {
        if self.status != RoomStatus::Active {
            return Err(CallError::RoomNotActive(self.id.clone()));
        }
        self.media_ready[slot.index()] = false;
        self.relay.reset();
        Ok(())
    }

    /// 종료. 모든 타이머를 취소하고 경과 시간을 고정한다.
    pub fn end(&mut self, reason: EndReason) -> Option<EndSummary> {
        if self.is_ended() {
            return None;
        }
        let now = Instant::now();
        self.clock.pause(now);
        self.status = RoomStatus::Ended;
        self.end_reason = Some(reason);
        self.grace_period_expires_at = None;
        self.timers = RoomTimers::default();
        self.relay.reset();

        Some(EndSummary {
            room_id: self.id.clone(),
            participants: self.participants.clone(),
            reason,
            elapsed: self.clock.elapsed(now),
        })
    }
}

/// 방 저장소: 방 ID별 잠금 + 사용자 → 방 인덱스
pub struct RoomManager {
    rooms: DashMap<String, Arc<Mutex<Room>>>,
    by_user: DashMap<String, String>,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// 방 등록. 두 참가자를 원자적으로 예약하며, 한 명이라도 이미 다른 방에
    /// 있으면 예약을 되돌리고 `Busy`를 반환한다.
    pub fn insert(&self, room: Room) -> Result<Arc<Mutex<Room>>, CallError> {
        let id = room.id.clone();
        let mut reserved: Vec<&str> = Vec::with_capacity(2);
        for user in room.participants() {
            let taken = match self.by_user.entry(user.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(id.clone());
                    false
                }
                Entry::Occupied(_) => true,
            };
            if taken {
                for user in reserved {
                    self.by_user.remove_if(user, |_, room_id| *room_id == id);
                }
                return Err(CallError::Busy);
            }
            reserved.push(user.as_str());
        }

        let handle = Arc::new(Mutex::new(room));
        self.rooms.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    pub fn room_of(&self, user_id: &str) -> Option<String> {
        self.by_user.get(user_id).map(|id| id.clone())
    }

    /// 방 제거. 사용자 인덱스가 이 방을 가리킬 때만 함께 지운다.
    pub fn remove(&self, room_id: &str, participants: &[String; 2]) {
        self.rooms.remove(room_id);
        for user in participants {
            self.by_user.remove_if(user, |_, id| id == room_id);
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
