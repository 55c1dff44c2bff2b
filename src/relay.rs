//! 방 단위 시그널링 릴레이 상태
//!
//! SDP와 ICE 후보는 그대로 전달한다. 수신 측이 상대의 원격 설명(remote
//! description)을 적용하기 전에 도착한 후보는 방향별 FIFO 버퍼에 보관했다가
//! 적용이 확인되는 즉시 순서대로 내보낸다.

use crate::room::Slot;
use std::collections::VecDeque;

/// 설명 메시지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// 설명 메시지 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionOutcome {
    /// 상대에게 전달. `flush`는 발신자 쪽으로 가는 버퍼에서 꺼낸 후보
    Forward { flush: Vec<String> },
    /// 동시 offer 충돌에서 진 쪽의 offer는 버린다
    DropGlare,
    /// 대응하는 offer가 없는 answer
    Unexpected,
}

/// 후보 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Forward,
    Buffered,
    Overflow,
}

#[derive(Debug)]
pub struct RelayState {
    initiator: Slot,
    /// 수신자 슬롯별: 상대 설명을 적용했는지
    applied: [bool; 2],
    /// 수신자 슬롯별 대기 후보
    buffers: [VecDeque<String>; 2],
    pending_offer: Option<Slot>,
    max_buffered: usize,
}

impl RelayState {
    pub fn new(initiator: Slot, max_buffered: usize) -> Self {
        Self {
            initiator,
            applied: [false, false],
            buffers: [VecDeque::new(), VecDeque::new()],
            pending_offer: None,
            max_buffered,
        }
    }

    /// `from`이 보낸 설명 처리
    pub fn on_description(&mut self, from: Slot, kind: DescriptionKind) -> DescriptionOutcome {
        let to = from.other();
        match kind {
            DescriptionKind::Offer => {
                if self.pending_offer == Some(to) && from != self.initiator {
                    // 시작자의 offer가 이김. 비시작자는 롤백 후 응답한다
                    return DescriptionOutcome::DropGlare;
                }
                self.pending_offer = Some(from);
                // 재협상: 수신자는 새 offer를 적용해야 한다
                self.applied[to.index()] = false;
                DescriptionOutcome::Forward { flush: Vec::new() }
            }
            DescriptionKind::Answer => {
                if self.pending_offer != Some(to) {
                    return DescriptionOutcome::Unexpected;
                }
                self.pending_offer = None;
                self.applied[to.index()] = false;
                // answer를 보냈다는 것은 발신자가 offer를 적용했다는 뜻
                let flush = self.mark_applied(from);
                DescriptionOutcome::Forward { flush }
            }
        }
    }

    /// `receiver`가 상대 설명을 적용했다. 버퍼에 있던 후보를 순서대로 반환한다.
    pub fn mark_applied(&mut self, receiver: Slot) -> Vec<String> {
        self.applied[receiver.index()] = true;
        self.buffers[receiver.index()].drain(..).collect()
    }

    /// `from`이 보낸 후보 처리
    pub fn on_candidate(&mut self, from: Slot, candidate: &str) -> CandidateOutcome {
        let to = from.other().index();
        if self.applied[to] && self.buffers[to].is_empty() {
            return CandidateOutcome::Forward;
        }
        if self.buffers[to].len() >= self.max_buffered {
            return CandidateOutcome::Overflow;
        }
        self.buffers[to].push_back(candidate.to_string());
        CandidateOutcome::Buffered
    }

    pub fn is_applied(&self, receiver: Slot) -> bool {
        self.applied[receiver.index()]
    }

    pub fn buffered(&self, receiver: Slot) -> usize {
        self.buffers[receiver.index()].len()
    }

    pub fn pending_offer(&self) -> Option<Slot> {
        self.pending_offer
    }

    /// 재접속 후 새 협상을 위해 초기화
    pub fn reset(&mut self) {
        self.applied = [false, false];
        self.buffers.iter_mut().for_each(VecDeque::clear);
        self.pending_offer = None;
    }
}
