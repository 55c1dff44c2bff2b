//! 클라이언트 대기열 화면 모델
//!
//! 델타가 주 경로이고, 스냅샷은 놓친 델타를 바로잡는 보정 경로이다.
//! 스냅샷 적용은 현재 목록과의 차이만 반영하므로 여러 번 적용해도 같다.

use crate::protocol::{QueueEntry, ServerMessage};
use std::collections::HashSet;

/// 스냅샷 적용으로 생긴 변화
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl QueueDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueView {
    entries: Vec<QueueEntry>,
}

impl QueueView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.position(user_id).is_some()
    }

    /// 대기열 관련 서버 이벤트 반영. 목록이 바뀌었으면 `true`.
    pub fn on_server_message(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::QueueSnapshot { users } => !self.reconcile(users).is_empty(),
            ServerMessage::QueueDelta {
                user_id,
                available,
                distance_km,
            } => self.apply_delta(user_id, *available, *distance_km),
            _ => false,
        }
    }

    /// 단일 사용자 변화. 목록이 바뀌었으면 `true`.
    pub fn apply_delta(&mut self, user_id: &str, available: bool, distance_km: Option<f64>) -> bool {
        match (self.position(user_id), available) {
            (Some(index), false) => {
                self.entries.remove(index);
                true
            }
            (None, true) => {
                let entry = QueueEntry {
                    user_id: user_id.to_string(),
                    distance_km,
                };
                match (distance_km, self.insertion_point(distance_km)) {
                    (Some(_), Some(index)) => self.entries.insert(index, entry),
                    _ => self.entries.push(entry),
                }
                true
            }
            (Some(index), true) => {
                let changed = self.entries[index].distance_km != distance_km && distance_km.is_some();
                if changed {
                    self.entries[index].distance_km = distance_km;
                }
                changed
            }
            (None, false) => false,
        }
    }

    /// 스냅샷과 비교해 빠진 항목은 지우고 새 항목은 스냅샷 순서대로 덧붙인다.
    /// 기존 항목의 순서는 유지한다.
    pub fn reconcile(&mut self, snapshot: &[QueueEntry]) -> QueueDiff {
        let wanted: HashSet<&str> = snapshot.iter().map(|e| e.user_id.as_str()).collect();
        let mut diff = QueueDiff::default();

        self.entries.retain(|entry| {
            let keep = wanted.contains(entry.user_id.as_str());
            if !keep {
                diff.removed.push(entry.user_id.clone());
            }
            keep
        });

        for incoming in snapshot {
            match self.position(&incoming.user_id) {
                Some(index) => self.entries[index].distance_km = incoming.distance_km,
                None => {
                    diff.added.push(incoming.user_id.clone());
                    self.entries.push(incoming.clone());
                }
            }
        }
        diff
    }

    /// 초대를 보냈거나 받은 상대를 목록에서 즉시 숨긴다.
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.apply_delta(user_id, false, None)
    }

    fn position(&self, user_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.user_id == user_id)
    }

    /// 거리순 목록에서 새 항목이 들어갈 자리
    fn insertion_point(&self, distance_km: Option<f64>) -> Option<usize> {
        let distance = distance_km?;
        if self.entries.iter().any(|e| e.distance_km.is_none()) {
            return None;
        }
        Some(
            self.entries
                .iter()
                .position(|e| e.distance_km.is_some_and(|d| d > distance))
                .unwrap_or(self.entries.len()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: &str, distance_km: Option<f64>) -> QueueEntry {
        QueueEntry {
            user_id: user_id.to_string(),
            distance_km,
        }
    }

    fn ids(view: &QueueView) -> Vec<&str> {
        view.entries().iter().map(|e| e.user_id.as_str()).collect()
    }

    #[test]
    fn deltas_add_and_remove() {
        let mut view = QueueView::new();
        assert!(view.apply_delta("bob", true, None));
        assert!(view.apply_delta("carol", true, None));
        assert!(!view.apply_delta("bob", true, None));
        assert!(view.apply_delta("bob", false, None));
        assert!(!view.apply_delta("bob", false, None));
        assert_eq!(ids(&view), vec!["carol"]);
    }

    #[test]
    fn reconcile_patches_only_the_difference() {
        let mut view = QueueView::new();
        view.apply_delta("bob", true, None);
        view.apply_delta("carol", true, None);

        let snapshot = vec![entry("dave", None), entry("carol", None)];
        let diff = view.reconcile(&snapshot);
        assert_eq!(diff.added, vec!["dave".to_string()]);
        assert_eq!(diff.removed, vec!["bob".to_string()]);
        assert_eq!(ids(&view), vec!["carol", "dave"]);

        assert!(view.reconcile(&snapshot).is_empty());
        assert_eq!(ids(&view), vec!["carol", "dave"]);
    }

    #[test]
    fn distance_ordered_inserts() {
        let mut view = QueueView::new();
        view.reconcile(&[entry("near", Some(1.0)), entry("far", Some(20.0))]);
        view.apply_delta("mid", true, Some(5.0));
        assert_eq!(ids(&view), vec!["near", "mid", "far"]);
    }

    #[test]
    fn server_messages_drive_the_view() {
        let mut view = QueueView::new();
        assert!(view.on_server_message(&ServerMessage::QueueSnapshot {
            users: vec![entry("bob", None)],
        }));
        assert!(view.on_server_message(&ServerMessage::QueueDelta {
            user_id: "bob".to_string(),
            available: false,
            distance_km: None,
        }));
        assert!(view.is_empty());
        assert!(!view.on_server_message(&ServerMessage::HeartbeatAck));
    }
}
