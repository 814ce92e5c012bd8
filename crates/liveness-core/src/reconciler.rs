//! The Owner Reconciler (spec.md §4.3): a singleton per replica that
//! periodically republishes the set of targets this replica currently owns.
//! Grounded on the teacher's control-plane snapshot pattern (e.g.
//! `agent::api::Snapshot`), generalized from a `RwLock` to a lock-free
//! `arc_swap::ArcSwap` since there is exactly one writer.

use std::sync::Arc;
use std::time::Duration;

use liveness_store::Store;

use crate::OwnedSet;

/// A single long-running task per replica, republishing the owned set every
/// `refresh_interval` (spec.md §4.3's hardcoded one second, externalized here
/// as `OWNER_REFRESH_INTERVAL_MS`).
pub struct OwnerReconciler<S: Store> {
    store: Arc<S>,
    shard_index: i32,
    owned_set: OwnedSet,
    refresh_interval: Duration,
}

impl<S: Store> OwnerReconciler<S> {
    pub fn new(
        store: Arc<S>,
        shard_index: i32,
        owned_set: OwnedSet,
        refresh_interval: Duration,
    ) -> OwnerReconciler<S> {
        OwnerReconciler {
            store,
            shard_index,
            owned_set,
            refresh_interval,
        }
    }

    /// Performs a single refresh: queries the Store and, on success,
    /// atomically replaces the published owned set. On failure, logs and
    /// retains the previous set — "no spurious mass-cancellation" (spec.md
    /// §4.3). Exposed so the binary can perform one synchronous refresh
    /// before recovery spawns any Probers (spec.md §4.3's "Lifecycle" note),
    /// then hand the rest of the cadence to [`OwnerReconciler::run`].
    #[tracing::instrument(skip(self))]
    pub async fn refresh_once(&self) {
        match self.store.get_active_target_ids(self.shard_index).await {
            Ok(ids) => {
                metrics::gauge!("owned_set_size").set(ids.len() as f64);
                self.owned_set.store(Arc::new(ids));
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh owned set, retaining previous snapshot");
            }
        }
    }

    /// Runs the refresh loop every `refresh_interval` until shutdown.
    /// Callers that need a populated owned set before spawning recovered
    /// Probers should call [`OwnerReconciler::refresh_once`] once up front
    /// (spec.md §4.3's "Lifecycle" note), then hand off to this loop.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            self.refresh_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveness_models::NewTarget;
    use liveness_store::fake::FakeStore;

    fn new_target() -> NewTarget {
        NewTarget {
            url: url::Url::parse("http://example.test/healthz").unwrap(),
            primary_email: "a@example.test".into(),
            secondary_email: "b@example.test".into(),
            period_ms: 100,
            window_ms: 1000,
            response_time_ms: 5000,
        }
    }

    #[tokio::test]
    async fn refresh_publishes_active_targets_for_this_shard() {
        let store = Arc::new(FakeStore::new());
        let owned = crate::new_owned_set();
        let id = store.save_target(new_target(), 3).await.unwrap();

        let reconciler = OwnerReconciler::new(store, 3, owned.clone(), Duration::from_millis(10));
        reconciler.refresh_once().await;

        assert!(owned.load().contains(&id));
    }

    #[tokio::test]
    async fn refresh_excludes_other_shards() {
        let store = Arc::new(FakeStore::new());
        let owned = crate::new_owned_set();
        store.save_target(new_target(), 3).await.unwrap();

        let reconciler = OwnerReconciler::new(store, 7, owned.clone(), Duration::from_millis(10));
        reconciler.refresh_once().await;

        assert!(owned.load().is_empty());
    }
}
