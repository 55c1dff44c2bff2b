//! 연결 품질 감시
//!
//! 주기적으로 전송 통계를 받아 `good / fair / poor`로 분류한다. `poor`에
//! 진입하면 한 번의 카운트다운을 시작하고, 그 안에 `fair` 이상으로 회복하지
//! 못하면 [`HealthEvent::Timeout`]을 낸다. 종료는 이 쪽에서 일방적으로 결정한다.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 기본 샘플링 주기
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// `poor` 지속 허용 시간
pub const POOR_WINDOW: Duration = Duration::from_secs(10);

/// 전송 계층 통계 한 건
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportStats {
    /// 0.0 ~ 1.0
    pub packet_loss_ratio: f64,
    pub jitter_ms: f64,
    pub rtt_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Quality {
    Poor,
    Fair,
    Good,
}

/// 품질 분류 기준 (어느 하나라도 넘으면 해당 등급)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub poor_loss: f64,
    pub poor_jitter_ms: f64,
    pub poor_rtt_ms: f64,
    pub fair_loss: f64,
    pub fair_jitter_ms: f64,
    pub fair_rtt_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            poor_loss: 0.10,
            poor_jitter_ms: 100.0,
            poor_rtt_ms: 300.0,
            fair_loss: 0.05,
            fair_jitter_ms: 50.0,
            fair_rtt_ms: 150.0,
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, stats: &TransportStats) -> Quality {
        if stats.packet_loss_ratio > self.poor_loss
            || stats.jitter_ms > self.poor_jitter_ms
            || stats.rtt_ms > self.poor_rtt_ms
        {
            Quality::Poor
        } else if stats.packet_loss_ratio > self.fair_loss
            || stats.jitter_ms > self.fair_jitter_ms
            || stats.rtt_ms > self.fair_rtt_ms
        {
            Quality::Fair
        } else {
            Quality::Good
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    QualityChanged(Quality),
    /// `poor` 진입. 이 시각까지 회복하지 못하면 종료
    PoorCountdownStarted { deadline: Instant },
    /// 카운트다운 중 회복
    Recovered,
    /// `poor`가 허용 시간 이상 지속됨
    Timeout,
}

/// 입출력 없는 품질 상태 기계
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    poor_window: Duration,
    quality: Option<Quality>,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthThresholds::default(), POOR_WINDOW)
    }
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds, poor_window: Duration) -> Self {
        Self {
            thresholds,
            poor_window,
            quality: None,
            deadline: None,
            timed_out: false,
        }
    }

    pub fn quality(&self) -> Option<Quality> {
        self.quality
    }

    /// 진행 중인 카운트다운의 마감 시각
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// 새 샘플 반영
    pub fn observe(&mut self, stats: &TransportStats, now: Instant) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        if self.timed_out {
            return events;
        }
        if let Some(event) = self.poll(now) {
            events.push(event);
            return events;
        }

        let quality = self.thresholds.classify(stats);
        if self.quality != Some(quality) {
            self.quality = Some(quality);
            events.push(HealthEvent::QualityChanged(quality));
        }

        match (quality, self.deadline) {
            (Quality::Poor, None) => {
                let deadline = now + self.poor_window;
                self.deadline = Some(deadline);
                events.push(HealthEvent::PoorCountdownStarted { deadline });
            }
            (Quality::Fair | Quality::Good, Some(_)) => {
                self.deadline = None;
                events.push(HealthEvent::Recovered);
            }
            _ => {}
        }
        events
    }

    /// 마감 확인. 카운트다운이 끝났으면 한 번만 `Timeout`.
    pub fn poll(&mut self, now: Instant) -> Option<HealthEvent> {
        match self.deadline {
            Some(deadline) if now >= deadline && !self.timed_out => {
                self.deadline = None;
                self.timed_out = true;
                Some(HealthEvent::Timeout)
            }
            _ => None,
        }
    }
}

/// 전송 통계 수집기 (피어 연결의 `getStats` 등)
pub trait StatsSampler: Send {
    /// 연결이 아직 없으면 `None`
    fn sample(&mut self) -> BoxFuture<'_, Option<TransportStats>>;
}

/// 샘플러를 `interval`마다 호출하며 이벤트를 보낸다.
///
/// `Timeout`을 보낸 뒤, 취소되었을 때, 또는 수신 측이 닫혔을 때 끝난다.
pub async fn run_health_monitor<S: StatsSampler>(
    mut sampler: S,
    mut monitor: HealthMonitor,
    interval: Duration,
    events: UnboundedSender<HealthEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let deadline = monitor.deadline();
        let batch: Vec<HealthEvent> = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = wait_until(deadline) => monitor.poll(Instant::now()).into_iter().collect(),
            _ = ticker.tick() => match sampler.sample().await {
                Some(stats) => monitor.observe(&stats, Instant::now()),
                None => Vec::new(),
            },
        };

        for event in batch {
            if events.send(event).is_err() {
                return;
            }
            if event == HealthEvent::Timeout {
                tracing::info!("Connection quality stayed poor, ending call");
                return;
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    fn stats(loss: f64, jitter: f64, rtt: f64) -> TransportStats {
        TransportStats {
            packet_loss_ratio: loss,
            jitter_ms: jitter,
            rtt_ms: rtt,
        }
    }

    fn poor() -> TransportStats {
        stats(0.2, 10.0, 50.0)
    }

    fn fair() -> TransportStats {
        stats(0.0, 60.0, 50.0)
    }

    #[test]
    fn classification_uses_any_threshold() {
        let t = HealthThresholds::default();
        assert_eq!(t.classify(&stats(0.0, 0.0, 0.0)), Quality::Good);
        assert_eq!(t.classify(&stats(0.06, 0.0, 0.0)), Quality::Fair);
        assert_eq!(t.classify(&stats(0.0, 0.0, 200.0)), Quality::Fair);
        assert_eq!(t.classify(&stats(0.11, 0.0, 0.0)), Quality::Poor);
        assert_eq!(t.classify(&stats(0.0, 101.0, 0.0)), Quality::Poor);
        assert_eq!(t.classify(&stats(0.0, 0.0, 301.0)), Quality::Poor);
        // 경계값은 한 단계 위
        assert_eq!(t.classify(&stats(0.10, 100.0, 300.0)), Quality::Fair);
    }

    #[tokio::test(start_paused = true)]
    async fn poor_for_full_window_times_out() {
        let mut monitor = HealthMonitor::default();
        let start = Instant::now();

        let events = monitor.observe(&poor(), start);
        assert!(events.contains(&HealthEvent::PoorCountdownStarted {
            deadline: start + POOR_WINDOW
        }));
        assert_eq!(monitor.poll(start + Duration::from_secs(5)), None);
        assert_eq!(monitor.poll(start + POOR_WINDOW), Some(HealthEvent::Timeout));
        assert_eq!(monitor.poll(start + POOR_WINDOW), None);
        assert!(monitor.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_at_nine_seconds_cancels() {
        let mut monitor = HealthMonitor::default();
        let start = Instant::now();

        monitor.observe(&poor(), start);
        let events = monitor.observe(&fair(), start + Duration::from_secs(9));
        assert!(events.contains(&HealthEvent::Recovered));
        assert_eq!(monitor.poll(start + Duration::from_secs(10)), None);
        assert!(!monitor.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_poor_samples_keep_the_first_deadline() {
        let mut monitor = HealthMonitor::default();
        let start = Instant::now();

        monitor.observe(&poor(), start);
        let events = monitor.observe(&poor(), start + Duration::from_secs(5));
        assert!(events.is_empty());
        assert_eq!(monitor.deadline(), Some(start + POOR_WINDOW));
    }

    struct ScriptedSampler {
        samples: VecDeque<TransportStats>,
        fallback: TransportStats,
    }

    impl StatsSampler for ScriptedSampler {
        fn sample(&mut self) -> BoxFuture<'_, Option<TransportStats>> {
            let next = self.samples.pop_front().unwrap_or(self.fallback);
            async move { Some(next) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn driver_ends_call_after_sustained_poor_quality() {
        let sampler = ScriptedSampler {
            samples: VecDeque::new(),
            fallback: poor(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let task = tokio::spawn(run_health_monitor(
            sampler,
            HealthMonitor::default(),
            SAMPLE_INTERVAL,
            tx,
            CancellationToken::new(),
        ));

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        task.await.unwrap();
        assert_eq!(last, Some(HealthEvent::Timeout));
        assert_eq!(start.elapsed(), POOR_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_keeps_running_after_recovery() {
        let sampler = ScriptedSampler {
            samples: VecDeque::from([poor()]),
            fallback: fair(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_health_monitor(
            sampler,
            HealthMonitor::default(),
            SAMPLE_INTERVAL,
            tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        task.await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&HealthEvent::Recovered));
        assert!(!events.contains(&HealthEvent::Timeout));
    }
}
