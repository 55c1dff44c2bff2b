//! 클라이언트 측 통화 로직
//!
//! 입출력 없는 상태 기계로 작성되어 있다. 브라우저나 네이티브 앱은 실제
//! 피어 연결과 통계 수집기를 트레이트 구현으로 연결한다.

pub mod controller;
pub mod health;
pub mod queue_view;

pub use controller::{CallController, CallPhase, CallSession, PeerTransport, SdpKind, TransportError};
pub use health::{
    run_health_monitor, HealthEvent, HealthMonitor, HealthThresholds, Quality, StatsSampler,
    TransportStats,
};
pub use queue_view::{QueueDiff, QueueView};
