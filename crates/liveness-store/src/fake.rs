//! An in-memory [`Store`] used by `liveness-core`'s and `liveness-api`'s test
//! suites. The real Postgres transport is out of scope per spec.md §1, so
//! tests exercise the `Store` trait boundary against this double instead.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use liveness_models::{NewTarget, Notification, NotificationId, Target, TargetId};

use crate::{NewNotification, Store};

#[derive(Default)]
struct Inner {
    targets: HashMap<TargetId, Target>,
    notifications: HashMap<NotificationId, Notification>,
    next_target_id: i64,
    next_notification_id: i64,
}

/// A `Store` backed by `Mutex<HashMap<..>>`, sufficient for single-process
/// tests that never need real concurrency control.
#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl FakeStore {
    pub fn new() -> FakeStore {
        FakeStore::default()
    }

    /// Test helper: insert a target with an explicit id, shard, and active
    /// flag, bypassing validation — used to seed recovery scenarios.
    pub fn seed_target(&self, target: Target) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_target_id = inner.next_target_id.max(target.id.0 + 1);
        inner.targets.insert(target.id, target);
    }

    /// Test helper: insert a notification with an explicit id.
    pub fn seed_notification(&self, notification: Notification) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_notification_id = inner.next_notification_id.max(notification.id.0 + 1);
        inner
            .notifications
            .insert(notification.id, notification);
    }
}

#[async_trait::async_trait]
impl Store for FakeStore {
    async fn save_target(
        &self,
        target: NewTarget,
        shard_index: i32,
    ) -> anyhow::Result<TargetId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_target_id += 1;
        let id = TargetId(inner.next_target_id);
        inner.targets.insert(
            id,
            Target {
                id,
                url: target.url,
                primary_email: target.primary_email,
                secondary_email: target.secondary_email,
                period_ms: target.period_ms,
                window_ms: target.window_ms,
                response_time_ms: target.response_time_ms,
                shard_index,
                is_active: true,
            },
        );
        Ok(id)
    }

    async fn set_target_inactive(&self, id: TargetId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(target) = inner.targets.get_mut(&id) {
            target.is_active = false;
        }
        Ok(())
    }

    async fn get_target_by_primary_email(&self, email: &str) -> anyhow::Result<Vec<Target>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Target> = inner
            .targets
            .values()
            .filter(|t| t.primary_email == email)
            .cloned()
            .collect();
        matches.sort_by_key(|t| t.id);
        Ok(matches)
    }

    async fn get_targets_for_shard(&self, shard_index: i32) -> anyhow::Result<Vec<Target>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Target> = inner
            .targets
            .values()
            .filter(|t| t.shard_index == shard_index)
            .cloned()
            .collect();
        matches.sort_by_key(|t| t.id);
        Ok(matches)
    }

    async fn get_active_target_ids(&self, shard_index: i32) -> anyhow::Result<HashSet<TargetId>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .targets
            .values()
            .filter(|t| t.shard_index == shard_index && t.is_active)
            .map(|t| t.id)
            .collect())
    }

    async fn save_notification(
        &self,
        notification: NewNotification,
    ) -> anyhow::Result<NotificationId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_notification_id += 1;
        let id = NotificationId(inner.next_notification_id);
        inner.notifications.insert(
            id,
            Notification {
                id,
                target_id: notification.target_id,
                time_sent: notification.time_sent,
                stage: notification.stage,
                acknowledged: false,
            },
        );
        Ok(id)
    }

    async fn get_notification_by_id(
        &self,
        id: NotificationId,
    ) -> anyhow::Result<Option<Notification>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.notifications.get(&id).cloned())
    }

    async fn get_notifications_for_targets(
        &self,
        ids: &[TargetId],
    ) -> anyhow::Result<HashMap<TargetId, Vec<Notification>>> {
        let inner = self.inner.lock().unwrap();
        let wanted: HashSet<TargetId> = ids.iter().copied().collect();
        let mut by_target: HashMap<TargetId, Vec<Notification>> = HashMap::new();
        let mut all: Vec<&Notification> = inner
            .notifications
            .values()
            .filter(|n| wanted.contains(&n.target_id))
            .collect();
        all.sort_by_key(|n| n.time_sent);
        for notification in all {
            by_target
                .entry(notification.target_id)
                .or_default()
                .push(notification.clone());
        }
        Ok(by_target)
    }

    async fn set_notification_acknowledged(&self, id: NotificationId) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.notifications.get_mut(&id) {
            Some(n) if !n.acknowledged => {
                n.acknowledged = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveness_models::Stage;

    fn new_target(email: &str) -> NewTarget {
        NewTarget {
            url: url::Url::parse("http://example.test/healthz").unwrap(),
            primary_email: email.into(),
            secondary_email: "secondary@example.test".into(),
            period_ms: 100,
            window_ms: 1000,
            response_time_ms: 5000,
        }
    }

    #[tokio::test]
    async fn save_and_fetch_target_by_email() {
        let store = FakeStore::new();
        let id = store
            .save_target(new_target("admin@example.test"), 0)
            .await
            .unwrap();

        let matches = store
            .get_target_by_primary_email("admin@example.test")
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);
        assert!(matches[0].is_active);
    }

    #[tokio::test]
    async fn set_target_inactive_removes_from_active_ids() {
        let store = FakeStore::new();
        let id = store
            .save_target(new_target("admin@example.test"), 2)
            .await
            .unwrap();

        assert!(store.get_active_target_ids(2).await.unwrap().contains(&id));
        store.set_target_inactive(id).await.unwrap();
        assert!(!store.get_active_target_ids(2).await.unwrap().contains(&id));
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent_and_reports_whether_it_applied() {
        let store = FakeStore::new();
        let target_id = store
            .save_target(new_target("admin@example.test"), 0)
            .await
            .unwrap();
        let notification_id = store
            .save_notification(NewNotification {
                target_id,
                time_sent: Utc::now(),
                stage: Stage::Primary,
            })
            .await
            .unwrap();

        assert!(store
            .set_notification_acknowledged(notification_id)
            .await
            .unwrap());
        assert!(!store
            .set_notification_acknowledged(notification_id)
            .await
            .unwrap());

        let notification = store
            .get_notification_by_id(notification_id)
            .await
            .unwrap()
            .unwrap();
        assert!(notification.acknowledged);
    }

    #[tokio::test]
    async fn get_notifications_for_targets_groups_and_omits_unmatched() {
        let store = FakeStore::new();
        let t1 = store
            .save_target(new_target("a@example.test"), 0)
            .await
            .unwrap();
        let t2 = store
            .save_target(new_target("b@example.test"), 0)
            .await
            .unwrap();

        store
            .save_notification(NewNotification {
                target_id: t1,
                time_sent: Utc::now(),
                stage: Stage::Primary,
            })
            .await
            .unwrap();

        let by_target = store
            .get_notifications_for_targets(&[t1, t2])
            .await
            .unwrap();
        assert_eq!(by_target.len(), 1);
        assert!(by_target.contains_key(&t1));
        assert!(!by_target.contains_key(&t2));
    }
}
