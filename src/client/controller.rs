//! 클라이언트 통화 컨트롤러
//!
//! 서버 이벤트와 로컬 전송 이벤트를 받아 피어 연결을 조작하고, 서버로 보낼
//! 메시지를 outbox에 쌓는다. 호출 측은 [`CallController::drain_outbox`]로
//! 꺼내 채널에 쓴다.
//!
//! offer는 항상 시작자(원래 발신자)만 만든다. 비시작자는 재협상이 필요하면
//! `rtc.renegotiate`로 요청한다.

use crate::client::health::HealthEvent;
use crate::clock::SessionClock;
use crate::protocol::{CallMode, ClientMessage, EndReason, LeaveReason, ServerMessage};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// 자동 재협상 허용 횟수
const MAX_RENEGOTIATIONS: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer transport failure: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// 피어 연결 추상화
pub trait PeerTransport {
    /// 로컬 offer 생성 및 적용
    fn create_offer(&mut self, ice_restart: bool) -> Result<String, TransportError>;
    /// 로컬 answer 생성 및 적용 (원격 offer 적용 후)
    fn create_answer(&mut self) -> Result<String, TransportError>;
    fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), TransportError>;
    fn add_ice_candidate(&mut self, candidate: &str) -> Result<(), TransportError>;
    /// 적용했지만 응답받지 못한 로컬 offer 되돌리기
    fn rollback(&mut self) -> Result<(), TransportError>;
    fn has_local_offer(&self) -> bool;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Negotiating,
    Connected,
    /// 상대 연결 끊김 또는 재협상 중
    Reconnecting,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub room_id: String,
    pub peer_user_id: String,
    pub is_initiator: bool,
    pub mode: CallMode,
    pub agreed_seconds: u32,
}

pub struct CallController<T: PeerTransport> {
    transport: T,
    session: Option<CallSession>,
    phase: CallPhase,
    remote_applied: bool,
    pending_candidates: VecDeque<String>,
    transport_connected: bool,
    remote_track: bool,
    media_ready_sent: bool,
    renegotiations_left: u8,
    clock: Option<SessionClock>,
    end_reason: Option<EndReason>,
    outbox: Vec<ClientMessage>,
}

impl<T: PeerTransport> CallController<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            session: None,
            phase: CallPhase::Idle,
            remote_applied: false,
            pending_candidates: VecDeque::new(),
            transport_connected: false,
            remote_track: false,
            media_ready_sent: false,
            renegotiations_left: MAX_RENEGOTIATIONS,
            clock: None,
            end_reason: None,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 화면에 표시할 남은 시간 (카운트다운 시작 전이면 `None`)
    pub fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.clock.as_ref().map(|clock| clock.remaining_secs(now))
    }

    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// 서버 이벤트 처리. 이 방과 무관한 이벤트는 무시한다.
    pub fn on_server_message(&mut self, message: &ServerMessage, now: Instant) {
        if self.phase == CallPhase::Ended {
            return;
        }
        match message {
            ServerMessage::Start {
                room_id,
                agreed_seconds,
                is_initiator,
                mode,
                peer_user,
            } => {
                self.begin(CallSession {
                    room_id: room_id.clone(),
                    peer_user_id: peer_user.user_id.clone(),
                    is_initiator: *is_initiator,
                    mode: *mode,
                    agreed_seconds: *agreed_seconds,
                });
            }
            ServerMessage::Rejoined {
                room_id,
                agreed_seconds,
                remaining_seconds,
                timer_running,
                is_initiator,
                mode,
                peer_user,
            } => {
                if *timer_running {
                    self.restart_clock(*remaining_seconds, now);
                } else {
                    self.clock = None;
                }
                self.begin(CallSession {
                    room_id: room_id.clone(),
                    peer_user_id: peer_user.user_id.clone(),
                    is_initiator: *is_initiator,
                    mode: *mode,
                    agreed_seconds: *agreed_seconds,
                });
            }
            _ if !self.is_current_room(message) => {}
            ServerMessage::TimerStarted {
                remaining_seconds, ..
            } => self.restart_clock(*remaining_seconds, now),
            ServerMessage::PartnerDisconnected { .. } => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.pause(now);
                }
                self.phase = CallPhase::Reconnecting;
            }
            ServerMessage::PartnerReconnected {
                remaining_seconds, ..
            } => {
                if self.clock.is_some() {
                    self.restart_clock(*remaining_seconds, now);
                }
                // 상대는 새 연결이므로 시작자가 다시 협상을 연다
                self.remote_applied = false;
                self.pending_candidates.clear();
                self.phase = CallPhase::Negotiating;
                if self.is_initiator() && self.is_video() {
                    self.send_offer(true);
                }
            }
            ServerMessage::Offer { sdp, .. } => self.on_remote_offer(sdp),
            ServerMessage::Answer { sdp, .. } => self.on_remote_answer(sdp),
            ServerMessage::IceCandidate { candidate, .. } => self.on_remote_candidate(candidate),
            ServerMessage::Renegotiate { .. } => {
                if self.is_initiator() && !self.transport.has_local_offer() {
                    self.send_offer(true);
                }
            }
            ServerMessage::RoomEnded { reason, .. }
            | ServerMessage::RoomEndedByDisconnect { reason, .. } => {
                self.finish(*reason);
            }
            _ => {}
        }
    }

    /// 로컬에서 수집된 ICE 후보
    pub fn on_local_candidate(&mut self, candidate: &str) {
        if let Some(room_id) = self.room_id() {
            self.outbox.push(ClientMessage::IceCandidate {
                room_id,
                candidate: candidate.to_string(),
            });
        }
    }

    pub fn on_transport_connected(&mut self) {
        self.transport_connected = true;
        if matches!(self.phase, CallPhase::Negotiating | CallPhase::Reconnecting) {
            self.phase = CallPhase::Connected;
        }
        self.maybe_media_ready();
    }

    pub fn on_remote_track(&mut self) {
        self.remote_track = true;
        self.maybe_media_ready();
    }

    /// 전송 실패. 한 번은 재협상하고, 그 뒤에는 `media_failed`로 종료한다.
    pub fn on_transport_failed(&mut self) {
        if self.phase == CallPhase::Ended || self.session.is_none() {
            return;
        }
        self.transport_connected = false;
        if self.renegotiations_left == 0 {
            tracing::warn!(room_id = ?self.room_id(), "Media negotiation failed, giving up");
            self.leave_with(LeaveReason::MediaFailed);
            return;
        }

        self.renegotiations_left -= 1;
        self.phase = CallPhase::Reconnecting;
        if self.is_initiator() {
            self.send_offer(true);
        } else if let Some(room_id) = self.room_id() {
            self.outbox.push(ClientMessage::Renegotiate { room_id });
        }
    }

    pub fn on_health_event(&mut self, event: HealthEvent) {
        if event == HealthEvent::Timeout {
            self.leave_with(LeaveReason::QualityTimeout);
        }
    }

    /// 사용자가 통화를 끝냄
    pub fn leave(&mut self) {
        self.leave_with(LeaveReason::Left);
    }

    fn begin(&mut self, session: CallSession) {
        tracing::debug!(room_id = %session.room_id, initiator = session.is_initiator, "Call session started");
        let video = session.mode == CallMode::Video;
        let initiator = session.is_initiator;
        self.session = Some(session);
        // 새 피어 연결: 이전 연결의 협상/미디어 상태는 모두 무효
        self.remote_applied = false;
        self.pending_candidates.clear();
        self.transport_connected = false;
        self.remote_track = false;
        self.media_ready_sent = false;
        self.renegotiations_left = MAX_RENEGOTIATIONS;

        if !video {
            self.phase = CallPhase::Connected;
            return;
        }
        self.phase = CallPhase::Negotiating;
        if initiator {
            self.send_offer(false);
        }
    }

    fn on_remote_offer(&mut self, sdp: &str) {
        if self.transport.has_local_offer() {
            if self.is_initiator() {
                // 시작자의 offer가 우선
                tracing::debug!("Ignoring colliding offer from non-initiator");
                return;
            }
            if let Err(err) = self.transport.rollback() {
                tracing::warn!(error = %err, "Rollback failed");
                return self.on_transport_failed();
            }
        }

        self.remote_applied = false;
        if let Err(err) = self.transport.set_remote_description(SdpKind::Offer, sdp) {
            tracing::warn!(error = %err, "Failed to apply remote offer");
            return self.on_transport_failed();
        }
        self.on_remote_applied();

        match self.transport.create_answer() {
            Ok(answer) => {
                if let Some(room_id) = self.room_id() {
                    self.outbox.push(ClientMessage::Answer { room_id, sdp: answer });
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to create answer");
                self.on_transport_failed();
            }
        }
    }

    fn on_remote_answer(&mut self, sdp: &str) {
        if !self.transport.has_local_offer() {
            tracing::debug!("Ignoring answer without a local offer");
            return;
        }
        if let Err(err) = self.transport.set_remote_description(SdpKind::Answer, sdp) {
            tracing::warn!(error = %err, "Failed to apply remote answer");
            return self.on_transport_failed();
        }
        self.on_remote_applied();
    }

    fn on_remote_candidate(&mut self, candidate: &str) {
        if !self.remote_applied {
            self.pending_candidates.push_back(candidate.to_string());
            return;
        }
        if let Err(err) = self.transport.add_ice_candidate(candidate) {
            tracing::debug!(error = %err, "Dropping unusable ICE candidate");
        }
    }

    /// 원격 설명 적용 완료: 보류 후보 반영 후 서버에 알림
    fn on_remote_applied(&mut self) {
        self.remote_applied = true;
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = self.transport.add_ice_candidate(&candidate) {
                tracing::debug!(error = %err, "Dropping unusable ICE candidate");
            }
        }
        if let Some(room_id) = self.room_id() {
            self.outbox.push(ClientMessage::RemoteApplied { room_id });
        }
    }

    fn send_offer(&mut self, ice_restart: bool) {
        match self.transport.create_offer(ice_restart) {
            Ok(sdp) => {
                if let Some(room_id) = self.room_id() {
                    self.outbox.push(ClientMessage::Offer { room_id, sdp });
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to create offer");
                if self.renegotiations_left == 0 {
                    self.leave_with(LeaveReason::MediaFailed);
                } else {
                    self.on_transport_failed();
                }
            }
        }
    }

    fn maybe_media_ready(&mut self) {
        if self.media_ready_sent || !self.transport_connected || !self.remote_track {
            return;
        }
        if let Some(room_id) = self.room_id() {
            self.media_ready_sent = true;
            self.outbox.push(ClientMessage::MediaReady { room_id });
        }
    }

    fn restart_clock(&mut self, remaining_seconds: u64, now: Instant) {
        let mut clock = SessionClock::new(Duration::from_secs(remaining_seconds));
        clock.start(now);
        self.clock = Some(clock);
    }

    fn leave_with(&mut self, reason: LeaveReason) {
        if self.phase == CallPhase::Ended {
            return;
        }
        if let Some(room_id) = self.room_id() {
            self.outbox.push(ClientMessage::End { room_id, reason });
        }
        self.finish(EndReason::from_leave(reason, true));
    }

    fn finish(&mut self, reason: EndReason) {
        self.phase = CallPhase::Ended;
        self.end_reason = Some(reason);
        self.pending_candidates.clear();
        self.transport.close();
    }

    fn room_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.room_id.clone())
    }

    fn is_initiator(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_initiator)
    }

    fn is_video(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.mode == CallMode::Video)
    }

    fn is_current_room(&self, message: &ServerMessage) -> bool {
        let room_id = match message {
            ServerMessage::TimerStarted { room_id, .. }
            | ServerMessage::PartnerDisconnected { room_id, .. }
            | ServerMessage::PartnerReconnected { room_id, .. }
            | ServerMessage::RoomEnded { room_id, .. }
            | ServerMessage::RoomEndedByDisconnect { room_id, .. }
            | ServerMessage::Offer { room_id, .. }
            | ServerMessage::Answer { room_id, .. }
            | ServerMessage::IceCandidate { room_id, .. }
            | ServerMessage::Renegotiate { room_id, .. } => room_id,
            _ => return true,
        };
        self.session.as_ref().is_some_and(|s| &s.room_id == room_id)
    }
}
