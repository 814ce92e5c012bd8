//! The two-stage escalation state machine (spec.md §4.2): a linear sequence
//! of states driven by a single async fn rather than a generic task-polling
//! framework. Grounded on the *shape* of
//! `agent::alerts::notifier::AlertNotifications` — persist the stage before
//! the side effect, downgrade mail failures to logged warnings, stop on the
//! first Store error — without its task-queue/heartbeat machinery, which
//! this system has no use for (one Escalator per stalled target, no
//! cross-target scheduling).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use liveness_mailer::{AlertContext, Mailer, Renderer};
use liveness_models::{Notification, Stage, Target};
use liveness_store::{NewNotification, Store};

/// How an Escalator instance was invoked (spec.md §4.2's two entry points).
pub enum EscalationEntry {
    /// A Prober just fired a verdict; no notification exists yet.
    Fresh,
    /// Startup recovery found an existing, unacknowledged stage-1
    /// notification for this target.
    Recovery(Notification),
}

/// Where the admin API's acknowledgement URLs point, needed to render the
/// templated mail bodies.
#[derive(Debug, Clone)]
pub struct AckUrlConfig {
    pub app_host: String,
    pub app_port: u16,
}

/// Runs one target's escalation to completion (stage-2 sent, or acknowledged
/// early, or the process is shutting down). Store errors are fatal and
/// propagated to the caller, which simply stops: the target will be
/// re-examined as stalled on the next recovery scan (spec.md §4.2's failure
/// semantics). Mail errors are logged and otherwise ignored.
#[tracing::instrument(skip_all, fields(target_id = %target.id))]
pub async fn run_escalation<S: Store, M: Mailer>(
    target: Target,
    store: Arc<S>,
    mailer: Arc<M>,
    renderer: Arc<Renderer>,
    ack_urls: AckUrlConfig,
    entry: EscalationEntry,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let response_time = target.response_time();

    let stage1 = match entry {
        EscalationEntry::Fresh => {
            let notification_id = store
                .save_notification(NewNotification {
                    target_id: target.id,
                    time_sent: Utc::now(),
                    stage: Stage::Primary,
                })
                .await
                .context("persisting stage-1 notification")?;

            store
                .set_target_inactive(target.id)
                .await
                .context("marking target inactive after stage-1")?;

            let notification = store
                .get_notification_by_id(notification_id)
                .await
                .context("re-reading just-written stage-1 notification")?
                .context("stage-1 notification vanished immediately after insert")?;

            send_stage1(&mailer, &renderer, &ack_urls, &target, &notification).await;
            metrics::counter!("notifications_sent_total").increment(1);

            notification
        }
        EscalationEntry::Recovery(notification) => notification,
    };

    let remaining = remaining_response_time(response_time, stage1.time_sent);
    if sleep_or_shutdown(remaining, &mut shutdown).await {
        return Ok(());
    }

    let current = store
        .get_notification_by_id(stage1.id)
        .await
        .context("re-reading stage-1 notification before escalation decision")?
        .context("stage-1 notification disappeared before the escalation decision")?;

    if current.acknowledged {
        tracing::info!("stage-1 acknowledged in time, escalation terminates");
        return Ok(());
    }

    let notification_id = store
        .save_notification(NewNotification {
            target_id: target.id,
            time_sent: Utc::now(),
            stage: Stage::Secondary,
        })
        .await
        .context("persisting stage-2 notification")?;

    let stage2 = store
        .get_notification_by_id(notification_id)
        .await
        .context("re-reading just-written stage-2 notification")?
        .context("stage-2 notification vanished immediately after insert")?;

    send_stage2(&mailer, &renderer, &ack_urls, &target, &stage2).await;

    metrics::counter!("notifications_sent_total").increment(1);

    sleep_or_shutdown(response_time, &mut shutdown).await;

    Ok(())
}

/// `remaining = response_time_ms - (now - notification.time_sent)`, clamped
/// to zero, preserving the original deadline across a recovery restart
/// (spec.md §4.2's "Recovery entry point").
fn remaining_response_time(response_time: Duration, time_sent: chrono::DateTime<Utc>) -> Duration {
    let elapsed = Utc::now().signed_duration_since(time_sent);
    let elapsed = elapsed.to_std().unwrap_or(Duration::ZERO);
    response_time.saturating_sub(elapsed)
}

/// Sleeps for `duration`, racing the shutdown watch. Returns `true` if
/// shutdown fired first, in which case the caller abandons the escalation
/// mid-flight (spec.md's "the process exits only on SIGTERM").
async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

async fn send_stage1<M: Mailer>(
    mailer: &M,
    renderer: &Renderer,
    ack_urls: &AckUrlConfig,
    target: &Target,
    notification: &Notification,
) {
    let context = AlertContext {
        target_url: target.url.to_string(),
        notification_id: notification.id.0,
        app_host: ack_urls.app_host.clone(),
        app_port: ack_urls.app_port,
        time_sent: notification.time_sent,
    };
    match renderer.render_stage1(&context) {
        Ok((subject, body)) => {
            if let Err(err) = mailer.send(&target.primary_email, &subject, &body).await {
                tracing::warn!(error = %err, to = %target.primary_email, "stage-1 mail send failed");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to render stage-1 mail template"),
    }
}

async fn send_stage2<M: Mailer>(
    mailer: &M,
    renderer: &Renderer,
    ack_urls: &AckUrlConfig,
    target: &Target,
    notification: &Notification,
) {
    let context = AlertContext {
        target_url: target.url.to_string(),
        notification_id: notification.id.0,
        app_host: ack_urls.app_host.clone(),
        app_port: ack_urls.app_port,
        time_sent: notification.time_sent,
    };
    match renderer.render_stage2(&context) {
        Ok((subject, body)) => {
            if let Err(err) = mailer.send(&target.secondary_email, &subject, &body).await {
                tracing::warn!(error = %err, to = %target.secondary_email, "stage-2 mail send failed");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to render stage-2 mail template"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveness_mailer::test_support::RecordingMailer;
    use liveness_store::fake::FakeStore;

    fn target() -> Target {
        Target {
            id: liveness_models::TargetId(1),
            url: url::Url::parse("http://example.test/healthz").unwrap(),
            primary_email: "primary@example.test".into(),
            secondary_email: "secondary@example.test".into(),
            period_ms: 10,
            window_ms: 100,
            response_time_ms: 20,
            shard_index: 0,
            is_active: true,
        }
    }

    fn ack_urls() -> AckUrlConfig {
        AckUrlConfig {
            app_host: "localhost".into(),
            app_port: 8080,
        }
    }

    #[tokio::test]
    async fn fresh_escalation_sends_both_stages_when_unacknowledged() {
        let store = Arc::new(FakeStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let renderer = Arc::new(Renderer::try_new().unwrap());
        let (_tx, rx) = tokio::sync::watch::channel(false);

        let target = target();
        store.seed_target(target.clone());

        run_escalation(
            target.clone(),
            store.clone(),
            mailer.clone(),
            renderer,
            ack_urls(),
            EscalationEntry::Fresh,
            rx,
        )
        .await
        .unwrap();

        assert_eq!(
            mailer.sent_to(),
            vec!["primary@example.test".to_string(), "secondary@example.test".to_string()]
        );
        let reloaded = store
            .get_target_by_primary_email(&target.primary_email)
            .await
            .unwrap();
        assert!(!reloaded[0].is_active);
    }

    #[tokio::test]
    async fn acknowledged_stage1_skips_escalation() {
        let store = Arc::new(FakeStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let renderer = Arc::new(Renderer::try_new().unwrap());
        let (_tx, rx) = tokio::sync::watch::channel(false);

        let target = target();
        store.seed_target(target.clone());

        let store_for_ack = store.clone();
        let target_id = target.id;
        let ack_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let by_target = store_for_ack
                .get_notifications_for_targets(&[target_id])
                .await
                .unwrap();
            let stage1 = liveness_store::newest_stalled_stage1(&by_target[&target_id]).unwrap();
            store_for_ack
                .set_notification_acknowledged(stage1.id)
                .await
                .unwrap();
        });

        run_escalation(
            target.clone(),
            store.clone(),
            mailer.clone(),
            renderer,
            ack_urls(),
            EscalationEntry::Fresh,
            rx,
        )
        .await
        .unwrap();

        ack_task.await.unwrap();
        assert_eq!(mailer.sent_to(), vec!["primary@example.test".to_string()]);
    }
}
