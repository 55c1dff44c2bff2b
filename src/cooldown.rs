//! 사용자 쌍 쿨다운 원장

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 순서에 무관한 사용자 쌍 키
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey(String);

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        // 사용자 ID에 구분자가 포함되어도 충돌하지 않도록 길이를 앞에 붙임
        Self(format!("{}:{}|{}", lo.len(), lo, hi))
    }
}

pub struct CooldownLedger {
    entries: DashMap<PairKey, Instant>,
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 쿨다운 설정. 기존 항목이 더 늦게 만료되면 그대로 둔다.
    pub fn set(&self, a: &str, b: &str, duration: Duration) {
        let expires_at = Instant::now() + duration;
        self.entries
            .entry(PairKey::new(a, b))
            .and_modify(|current| {
                if *current < expires_at {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);

        tracing::debug!(user_a = %a, user_b = %b, duration_ms = duration.as_millis() as u64, "Cooldown set");
    }

    /// 만료된 항목은 조회 시점에 제거한다.
    pub fn has(&self, a: &str, b: &str) -> bool {
        self.remaining(a, b).is_some()
    }

    pub fn remaining(&self, a: &str, b: &str) -> Option<Duration> {
        let key = PairKey::new(a, b);
        let now = Instant::now();

        let expires_at = *self.entries.get(&key)?;
        if expires_at > now {
            return Some(expires_at - now);
        }

        self.entries.remove_if(&key, |_, exp| *exp <= now);
        None
    }

    /// 만료 항목 일괄 정리
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(PairKey::new("alice", "bob"), PairKey::new("bob", "alice"));
        assert_ne!(PairKey::new("a|b", "c"), PairKey::new("a", "b|c"));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_is_symmetric() {
        let ledger = CooldownLedger::new();
        ledger.set("x", "y", Duration::from_secs(60));
        assert!(ledger.has("x", "y"));
        assert!(ledger.has("y", "x"));
        assert!(!ledger.has("x", "z"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_removed_on_read() {
        let ledger = CooldownLedger::new();
        ledger.set("x", "y", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!ledger.has("y", "x"));
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_cooldown_does_not_shorten_longer_one() {
        let ledger = CooldownLedger::new();
        ledger.set("x", "y", Duration::from_secs(86_400));
        ledger.set("y", "x", Duration::from_secs(3600));

        tokio::time::advance(Duration::from_secs(7200)).await;
        assert!(ledger.has("x", "y"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let ledger = CooldownLedger::new();
        ledger.set("a", "b", Duration::from_secs(10));
        ledger.set("c", "d", Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(ledger.purge_expired(), 1);
        assert_eq!(ledger.len(), 1);
    }
}
