//! Startup recovery and runtime Prober/Escalator spawning (spec.md §4.4).
//! The Supervisor also backs the admin API's application state, so the
//! `/add_service` handler can write a Target and spawn its Prober
//! synchronously in one call, matching spec.md §4.4's "Runtime spawning"
//! ordering requirement.

use std::sync::Arc;

use liveness_mailer::{Mailer, Renderer};
use liveness_models::{NewTarget, Target, TargetId};
use liveness_store::{newest_stalled_stage1, Store};

use crate::escalator::{self, AckUrlConfig, EscalationEntry};
use crate::prober::{self, ProberExit};
use crate::OwnedSet;

/// Counts of tasks spawned during startup recovery, returned for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub probers_spawned: usize,
    pub escalators_spawned: usize,
}

/// Owns everything needed to spawn and recover Probers and Escalators for
/// this replica's shard. Generic over `S: Store` and `M: Mailer` rather than
/// boxed trait objects, mirroring `agent::alerts::evaluator::AlertEvaluator<V: AlertView>`.
pub struct Supervisor<S: Store, M: Mailer> {
    store: Arc<S>,
    mailer: Arc<M>,
    renderer: Arc<Renderer>,
    http_client: reqwest::Client,
    owned_set: OwnedSet,
    shard_index: i32,
    ack_urls: AckUrlConfig,
    shutdown: tokio::sync::watch::Receiver<bool>,
}

// Derived `Clone` would require `S: Clone, M: Clone`, which is both untrue
// (they're accessed only through `Arc`) and unnecessary.
impl<S: Store, M: Mailer> Clone for Supervisor<S, M> {
    fn clone(&self) -> Self {
        Supervisor {
            store: self.store.clone(),
            mailer: self.mailer.clone(),
            renderer: self.renderer.clone(),
            http_client: self.http_client.clone(),
            owned_set: self.owned_set.clone(),
            shard_index: self.shard_index,
            ack_urls: self.ack_urls.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: Store, M: Mailer> Supervisor<S, M> {
    pub fn new(
        store: Arc<S>,
        mailer: Arc<M>,
        renderer: Arc<Renderer>,
        http_client: reqwest::Client,
        owned_set: OwnedSet,
        shard_index: i32,
        ack_urls: AckUrlConfig,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Supervisor<S, M> {
        Supervisor {
            store,
            mailer,
            renderer,
            http_client,
            owned_set,
            shard_index,
            ack_urls,
            shutdown,
        }
    }

    pub fn shard_index(&self) -> i32 {
        self.shard_index
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Startup procedure (spec.md §4.4): fetches every target assigned to
    /// this shard, partitions it into active/stalled, and spawns a Prober or
    /// a recovery-seeded Escalator for each. Does not start the Owner
    /// Reconciler; the caller does that separately (spec.md's "before any
    /// recovered Probers are spawned" ordering is the caller's
    /// responsibility, since the Reconciler outlives any individual
    /// recovery scan).
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> anyhow::Result<RecoverySummary> {
        let targets = self.store.get_targets_for_shard(self.shard_index).await?;

        let (active, inactive): (Vec<Target>, Vec<Target>) =
            targets.into_iter().partition(|t| t.is_active);

        let mut summary = RecoverySummary::default();

        for target in active {
            self.spawn_prober(target);
            summary.probers_spawned += 1;
        }

        if inactive.is_empty() {
            return Ok(summary);
        }

        let ids: Vec<TargetId> = inactive.iter().map(|t| t.id).collect();
        let notifications = self.store.get_notifications_for_targets(&ids).await?;

        for target in inactive {
            let Some(for_target) = notifications.get(&target.id) else {
                continue;
            };
            let Some(stalled) = newest_stalled_stage1(for_target) else {
                continue;
            };
            self.spawn_escalator(target, EscalationEntry::Recovery(stalled.clone()));
            summary.escalators_spawned += 1;
        }

        Ok(summary)
    }

    /// Validates and persists a new Target under this replica's own shard
    /// index, then spawns its Prober before returning. `shard_index` is
    /// assigned as this replica's own index (see DESIGN.md's resolution of
    /// spec.md §9's shard-assignment open question) rather than a formula
    /// derived from the not-yet-known target id, since `Store::save_target`
    /// requires the shard index *before* an id exists.
    #[tracing::instrument(skip(self, new_target))]
    pub async fn add_target(&self, new_target: NewTarget) -> anyhow::Result<Target> {
        new_target.validate()?;

        let id = self
            .store
            .save_target(new_target.clone(), self.shard_index)
            .await?;

        let target = Target {
            id,
            url: new_target.url,
            primary_email: new_target.primary_email,
            secondary_email: new_target.secondary_email,
            period_ms: new_target.period_ms,
            window_ms: new_target.window_ms,
            response_time_ms: new_target.response_time_ms,
            shard_index: self.shard_index,
            is_active: true,
        };

        self.spawn_prober(target.clone());
        Ok(target)
    }

    /// Marks a Target inactive so its Prober observes the removal at the
    /// next Owner Reconciler refresh (spec.md §4.3's "worst-case lag").
    pub async fn remove_target(&self, id: TargetId) -> anyhow::Result<()> {
        self.store.set_target_inactive(id).await
    }

    /// Spawns a detached task running the Prober for `target`, which on a
    /// fired verdict immediately spawns the Escalator — the "hands off to
    /// Escalator and exits" step of spec.md §4.1 is realised as one Prober
    /// task's continuation, not a separate caller round-trip.
    pub fn spawn_prober(&self, target: Target) {
        let http_client = self.http_client.clone();
        let owned_set = self.owned_set.clone();
        let shutdown = self.shutdown.clone();
        let this = self.clone();

        tokio::spawn(async move {
            let exit = prober::run_prober(target.clone(), http_client, owned_set, shutdown).await;
            if exit == ProberExit::VerdictFired {
                this.spawn_escalator(target, EscalationEntry::Fresh);
            }
        });
    }

    /// Spawns a detached task running the Escalator for `target`.
    pub fn spawn_escalator(&self, target: Target, entry: EscalationEntry) {
        let store = self.store.clone();
        let mailer = self.mailer.clone();
        let renderer = self.renderer.clone();
        let ack_urls = self.ack_urls.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(err) =
                escalator::run_escalation(target, store, mailer, renderer, ack_urls, entry, shutdown)
                    .await
            {
                tracing::error!(error = %err, "escalation failed, target will be re-examined on next recovery");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveness_mailer::test_support::RecordingMailer;
    use liveness_models::{Notification, NotificationId, Stage};
    use liveness_store::fake::FakeStore;
    use std::time::Duration;

    fn supervisor(
        store: Arc<FakeStore>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Supervisor<FakeStore, RecordingMailer> {
        Supervisor::new(
            store,
            Arc::new(RecordingMailer::default()),
            Arc::new(Renderer::try_new().unwrap()),
            reqwest::Client::new(),
            crate::new_owned_set(),
            0,
            AckUrlConfig {
                app_host: "localhost".into(),
                app_port: 8080,
            },
            shutdown,
        )
    }

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
    async fn add_target_persists_under_own_shard_and_spawns_prober() {
        let store = Arc::new(FakeStore::new());
        let (tx, rx) = tokio::sync::watch::channel(false);
        let sup = supervisor(store.clone(), rx);

        let target = sup.add_target(new_target()).await.unwrap();
        assert_eq!(target.shard_index, 0);
        assert!(target.is_active);

        let _ = tx.send(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn recover_spawns_prober_for_active_and_escalator_for_stalled() {
        let store = Arc::new(FakeStore::new());

        let active = store.save_target(new_target(), 0).await.unwrap();
        let _ = active;

        let stalled_target_id = store
            .save_target(new_target(), 0)
            .await
            .unwrap();
        store.set_target_inactive(stalled_target_id).await.unwrap();
        store.seed_notification(Notification {
            id: NotificationId(999),
            target_id: stalled_target_id,
            time_sent: chrono::Utc::now(),
            stage: Stage::Primary,
            acknowledged: false,
        });

        let (tx, rx) = tokio::sync::watch::channel(false);
        let sup = supervisor(store, rx);

        let summary = sup.recover().await.unwrap();
        assert_eq!(summary.probers_spawned, 1);
        assert_eq!(summary.escalators_spawned, 1);

        let _ = tx.send(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
