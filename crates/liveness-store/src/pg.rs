use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::{DateTime, Utc};
use liveness_models::{NewTarget, Notification, NotificationId, Stage, Target, TargetId};

use crate::{NewNotification, Store};

/// Postgres-backed implementation of [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> PgStore {
        PgStore { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

struct TargetRow {
    id: i64,
    url: String,
    primary_email: String,
    secondary_email: String,
    period_ms: i64,
    window_ms: i64,
    response_time_ms: i64,
    shard_index: i32,
    is_active: bool,
}

impl TargetRow {
    fn into_target(self) -> anyhow::Result<Target> {
        Ok(Target {
            id: TargetId(self.id),
            url: url::Url::parse(&self.url).context("parsing stored target url")?,
            primary_email: self.primary_email,
            secondary_email: self.secondary_email,
            period_ms: self.period_ms,
            window_ms: self.window_ms,
            response_time_ms: self.response_time_ms,
            shard_index: self.shard_index,
            is_active: self.is_active,
        })
    }
}

struct NotificationRow {
    id: i64,
    target_id: i64,
    time_sent: DateTime<Utc>,
    stage: i16,
    acknowledged: bool,
}

impl NotificationRow {
    fn into_notification(self) -> anyhow::Result<Notification> {
        let stage = Stage::from_i16(self.stage)
            .with_context(|| format!("notification {} has unknown stage {}", self.id, self.stage))?;
        Ok(Notification {
            id: NotificationId(self.id),
            target_id: TargetId(self.target_id),
            time_sent: self.time_sent,
            stage,
            acknowledged: self.acknowledged,
        })
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self, target))]
    async fn save_target(
        &self,
        target: NewTarget,
        shard_index: i32,
    ) -> anyhow::Result<TargetId> {
        let row = sqlx::query_as!(
            IdRow,
            r#"
            INSERT INTO targets (
                url, primary_email, secondary_email,
                period_ms, window_ms, response_time_ms,
                shard_index, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, true)
            RETURNING id
            "#,
            target.url.as_str(),
            target.primary_email,
            target.secondary_email,
            target.period_ms,
            target.window_ms,
            target.response_time_ms,
            shard_index,
        )
        .fetch_one(&self.pool)
        .await
        .context("inserting target")?;

        Ok(TargetId(row.id))
    }

    #[tracing::instrument(skip(self))]
    async fn set_target_inactive(&self, id: TargetId) -> anyhow::Result<()> {
        sqlx::query!(
            "UPDATE targets SET is_active = false WHERE id = $1",
            id.0,
        )
        .execute(&self.pool)
        .await
        .context("marking target inactive")?;
        Ok(())
    }

    async fn get_target_by_primary_email(&self, email: &str) -> anyhow::Result<Vec<Target>> {
        let rows = sqlx::query_as!(
            TargetRow,
            r#"
            SELECT id, url, primary_email, secondary_email,
                   period_ms, window_ms, response_time_ms,
                   shard_index, is_active
            FROM targets
            WHERE primary_email = $1
            ORDER BY id
            "#,
            email,
        )
        .fetch_all(&self.pool)
        .await
        .context("querying targets by primary email")?;

        rows.into_iter().map(TargetRow::into_target).collect()
    }

    async fn get_targets_for_shard(&self, shard_index: i32) -> anyhow::Result<Vec<Target>> {
        let rows = sqlx::query_as!(
            TargetRow,
            r#"
            SELECT id, url, primary_email, secondary_email,
                   period_ms, window_ms, response_time_ms,
                   shard_index, is_active
            FROM targets
            WHERE shard_index = $1
            ORDER BY id
            "#,
            shard_index,
        )
        .fetch_all(&self.pool)
        .await
        .context("querying targets for shard")?;

        rows.into_iter().map(TargetRow::into_target).collect()
    }

    async fn get_active_target_ids(&self, shard_index: i32) -> anyhow::Result<HashSet<TargetId>> {
        let rows = sqlx::query!(
            "SELECT id FROM targets WHERE shard_index = $1 AND is_active = true",
            shard_index,
        )
        .fetch_all(&self.pool)
        .await
        .context("querying active target ids")?;

        Ok(rows.into_iter().map(|r| TargetId(r.id)).collect())
    }

    async fn save_notification(
        &self,
        notification: NewNotification,
    ) -> anyhow::Result<NotificationId> {
        let row = sqlx::query_as!(
            IdRow,
            r#"
            INSERT INTO notifications (target_id, time_sent, stage, acknowledged)
            VALUES ($1, $2, $3, false)
            RETURNING id
            "#,
            notification.target_id.0,
            notification.time_sent,
            notification.stage.as_i16(),
        )
        .fetch_one(&self.pool)
        .await
        .context("inserting notification")?;

        Ok(NotificationId(row.id))
    }

    async fn get_notification_by_id(
        &self,
        id: NotificationId,
    ) -> anyhow::Result<Option<Notification>> {
        let row = sqlx::query_as!(
            NotificationRow,
            r#"
            SELECT id, target_id, time_sent, stage, acknowledged
            FROM notifications
            WHERE id = $1
            "#,
            id.0,
        )
        .fetch_optional(&self.pool)
        .await
        .context("querying notification by id")?;

        row.map(NotificationRow::into_notification).transpose()
    }

    async fn get_notifications_for_targets(
        &self,
        ids: &[TargetId],
    ) -> anyhow::Result<HashMap<TargetId, Vec<Notification>>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query_as!(
            NotificationRow,
            r#"
            SELECT id, target_id, time_sent, stage, acknowledged
            FROM notifications
            WHERE target_id = ANY($1)
            ORDER BY time_sent
            "#,
            &raw_ids,
        )
        .fetch_all(&self.pool)
        .await
        .context("querying notifications for targets")?;

        let mut by_target: HashMap<TargetId, Vec<Notification>> = HashMap::new();
        for row in rows {
            let notification = row.into_notification()?;
            by_target
                .entry(notification.target_id)
                .or_default()
                .push(notification);
        }
        Ok(by_target)
    }

    #[tracing::instrument(skip(self))]
    async fn set_notification_acknowledged(&self, id: NotificationId) -> anyhow::Result<bool> {
        let result = sqlx::query!(
            "UPDATE notifications SET acknowledged = true WHERE id = $1 AND acknowledged = false",
            id.0,
        )
        .execute(&self.pool)
        .await
        .context("acknowledging notification")?;

        Ok(result.rows_affected() == 1)
    }
}

struct IdRow {
    id: i64,
}
