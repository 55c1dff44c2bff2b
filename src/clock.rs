//! 일시정지 가능한 세션 카운트다운

use std::time::Duration;
use tokio::time::Instant;

/// 합의된 통화 시간 카운트다운.
///
/// 경과 시간은 실행 중일 때만 누적된다. 유예 기간 동안 멈췄다가 재개해도
/// 이미 흐른 시간은 유지된다.
#[derive(Debug, Clone)]
pub struct SessionClock {
    total: Duration,
    elapsed_before: Duration,
    running_since: Option<Instant>,
    started: bool,
}

impl SessionClock {
    pub fn new(total: Duration) -> Self {
        Self {
            total,
            elapsed_before: Duration::ZERO,
            running_since: None,
            started: false,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// 최초 시작. 이미 시작된 경우 `false`.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.running_since = Some(now);
        true
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.elapsed_before += now.saturating_duration_since(since);
        }
    }

    /// 시작된 적 있고 멈춰 있을 때만 재개한다.
    pub fn resume(&mut self, now: Instant) -> bool {
        if !self.started || self.running_since.is_some() {
            return false;
        }
        self.running_since = Some(now);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let running = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        (self.elapsed_before + running).min(self.total)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.total.saturating_sub(self.elapsed(now))
    }

    /// 남은 시간을 초 단위로 올림
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        let remaining = self.remaining(now);
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.started && self.remaining(now).is_zero()
    }
}
