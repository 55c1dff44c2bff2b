//! 외부 협력 시스템 인터페이스
//!
//! 프로필 검증, 모더레이션, 거리 계산, 세션 크레딧은 이 서버 밖에서 구현된다.
//! 여기서는 계약과 메모리 기반 기본 구현만 제공한다.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// 대기열 참여에 필요한 최소 미디어를 갖췄는지
pub trait ProfileCheck: Send + Sync {
    fn is_complete(&self, user_id: &str) -> bool;
}

/// 정지(ban) 여부 조회 및 기록
pub trait ModerationCheck: Send + Sync {
    fn is_banned(&self, user_id: &str) -> bool;
    fn ban(&self, user_id: &str);
}

/// 대기열 정렬용 거리 (km)
pub trait DistanceProvider: Send + Sync {
    fn distance_km(&self, from: &str, to: &str) -> Option<f64>;
}

/// 최소 시간 이상 진행된 세션 기록 (잠금 해제 시스템이 소비)
pub trait SessionCredits: Send + Sync {
    fn record_success(&self, user_a: &str, user_b: &str);
    fn count(&self, user_id: &str) -> u32;
}

pub struct AllowAllProfiles;

impl ProfileCheck for AllowAllProfiles {
    fn is_complete(&self, _user_id: &str) -> bool {
        true
    }
}

#[derive(Default)]
pub struct InMemoryModeration {
    banned: DashSet<String>,
}

impl ModerationCheck for InMemoryModeration {
    fn is_banned(&self, user_id: &str) -> bool {
        self.banned.contains(user_id)
    }

    fn ban(&self, user_id: &str) {
        self.banned.insert(user_id.to_string());
    }
}

#[derive(Default)]
pub struct InMemoryCredits {
    counts: DashMap<String, u32>,
}

impl SessionCredits for InMemoryCredits {
    fn record_success(&self, user_a: &str, user_b: &str) {
        for user in [user_a, user_b] {
            *self.counts.entry(user.to_string()).or_insert(0) += 1;
        }
    }

    fn count(&self, user_id: &str) -> u32 {
        self.counts.get(user_id).map(|c| *c).unwrap_or(0)
    }
}

/// 서버가 사용하는 협력 시스템 묶음
#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileCheck>,
    pub moderation: Arc<dyn ModerationCheck>,
    pub distance: Option<Arc<dyn DistanceProvider>>,
    pub credits: Arc<dyn SessionCredits>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            profiles: Arc::new(AllowAllProfiles),
            moderation: Arc::new(InMemoryModeration::default()),
            distance: None,
            credits: Arc::new(InMemoryCredits::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_are_recorded_for_both_users() {
        let credits = InMemoryCredits::default();
        credits.record_success("a", "b");
        credits.record_success("a", "c");
        assert_eq!(credits.count("a"), 2);
        assert_eq!(credits.count("b"), 1);
        assert_eq!(credits.count("z"), 0);
    }

    #[test]
    fn moderation_ban_is_remembered() {
        let moderation = InMemoryModeration::default();
        assert!(!moderation.is_banned("mallory"));
        moderation.ban("mallory");
        assert!(moderation.is_banned("mallory"));
    }
}
