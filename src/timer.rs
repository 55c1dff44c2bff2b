//! 취소 가능한 예약 작업
//!
//! 타이머는 자신이 보호하는 엔티티(초대, 방)가 소유한다. 엔티티가 해당 상태를
//! 벗어나면서 `ScheduledTask`를 drop하면 대기 중인 콜백은 실행되지 않는다.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// `delay` 후에 `task`를 실행한다. 그 전에 취소되면 아무것도 하지 않는다.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        // 마감 시각은 예약 시점 기준
        let deadline = tokio::time::Instant::now() + delay;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => task.await,
            }
        });

        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
