//! The durable Store: PostgreSQL-backed persistence for targets and
//! notifications, exposing exactly the operations enumerated in spec.md
//! §6.2.
//!
//! `Store` is a plain trait (no `dyn` dispatch — every caller is generic
//! over `S: Store`, mirroring how the teacher parameterizes
//! `AlertEvaluator<V: AlertView>` rather than boxing trait objects), but its
//! methods are declared with `#[async_trait::async_trait]` rather than bare
//! `async fn`: native AFIT returns a future with no `Send` bound, and these
//! futures are awaited inside `tokio::spawn`ed, generic `Supervisor<S, M>`
//! tasks and inside `axum` handlers, both of which require `Send` futures.
//! `async_trait` is the teacher's own fix for exactly this
//! (`agent::alerts::notifier`, `agent::alerts::evaluator`). `PgStore` is the
//! production implementation; `fake` (behind `#[cfg(any(test, feature =
//! "fake"))]`) is an in-memory double used by `liveness-core`'s and
//! `liveness-api`'s test suites, since the real Postgres transport is out of
//! scope per spec.md §1.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::{DateTime, Utc};
use liveness_models::{Notification, NotificationId, Stage, Target, TargetId};

#[cfg(any(test, feature = "fake"))]
pub mod fake;
mod pg;

pub use pg::PgStore;

/// Input to [`Store::save_notification`], before an id has been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub target_id: TargetId,
    pub time_sent: DateTime<Utc>,
    pub stage: Stage,
}

/// The durable-store contract of spec.md §6.2.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Persists a new target under the given shard and returns its assigned
    /// id. `shard_index` is fixed for the lifetime of the row (spec.md §3).
    async fn save_target(
        &self,
        target: liveness_models::NewTarget,
        shard_index: i32,
    ) -> anyhow::Result<TargetId>;

    /// Sets `is_active = false` for the given target. Idempotent.
    async fn set_target_inactive(&self, id: TargetId) -> anyhow::Result<()>;

    /// Every target (active or not) whose `primary_email` matches exactly.
    async fn get_target_by_primary_email(&self, email: &str) -> anyhow::Result<Vec<Target>>;

    /// Every target (active or not) assigned to `shard_index`.
    async fn get_targets_for_shard(&self, shard_index: i32) -> anyhow::Result<Vec<Target>>;

    /// The ids of targets assigned to `shard_index` with `is_active = true`.
    /// This is the query behind the Owner Reconciler's owned set
    /// (spec.md §4.3).
    async fn get_active_target_ids(&self, shard_index: i32) -> anyhow::Result<HashSet<TargetId>>;

    /// Persists a new notification and returns its assigned id.
    async fn save_notification(
        &self,
        notification: NewNotification,
    ) -> anyhow::Result<NotificationId>;

    /// Fetches a single notification by id, or `None` if it doesn't exist.
    async fn get_notification_by_id(
        &self,
        id: NotificationId,
    ) -> anyhow::Result<Option<Notification>>;

    /// Fetches every notification for the given targets, grouped by target
    /// id. Targets with no notifications are omitted from the map.
    async fn get_notifications_for_targets(
        &self,
        ids: &[TargetId],
    ) -> anyhow::Result<HashMap<TargetId, Vec<Notification>>>;

    /// Flips `acknowledged` to `true` for the given notification. Returns
    /// `true` iff exactly one row was updated (i.e. the notification exists
    /// and was not already acknowledged).
    async fn set_notification_acknowledged(&self, id: NotificationId) -> anyhow::Result<bool>;
}

/// A target is *stalled* (spec.md §4.4) if its newest notification is an
/// unacknowledged stage-1 with no corresponding stage-2. Shared by the
/// Supervisor's recovery scan and by tests of any `Store` implementation.
pub fn newest_stalled_stage1(notifications: &[Notification]) -> Option<&Notification> {
    let newest = notifications.iter().max_by_key(|n| n.time_sent)?;
    if newest.stage == Stage::Primary && !newest.acknowledged {
        Some(newest)
    } else {
        None
    }
}

/// Builds a `sqlx::postgres::PgConnectOptions` from the discrete
/// `DB_HOST`/`DB_PORT`/`DB_USER`/`DB_PASS`/`DB_NAME` variables of spec.md
/// §6.3, rather than a single `DATABASE_URL`.
pub fn connect_options(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> sqlx::postgres::PgConnectOptions {
    sqlx::postgres::PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(user)
        .password(password)
        .database(database)
}

/// Connects a pooled `PgStore`, running embedded migrations first.
pub async fn connect(options: sqlx::postgres::PgConnectOptions) -> anyhow::Result<PgStore> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect_with(options)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;

    Ok(PgStore::new(pool))
}
