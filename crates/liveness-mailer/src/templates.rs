//! Subject/body templates for the two alert stages, rendered with
//! `handlebars`. Grounded on `notifications::Renderer`
//! (`crates/notifications/src/lib.rs`): a `Handlebars` instance owns a small,
//! fixed set of named templates registered once at construction, and
//! `render` is a thin wrapper that feeds a serializable context struct
//! through them. This system has exactly two templates instead of the
//! teacher's per-alert-type catalog, so there is no `template_names(..)`
//! lookup table — the stage picks the template directly.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Context handed to the stage-1 and stage-2 templates.
#[derive(Debug, Clone, Serialize)]
pub struct AlertContext {
    pub target_url: String,
    pub notification_id: i64,
    pub app_host: String,
    pub app_port: u16,
    pub time_sent: DateTime<Utc>,
}

impl AlertContext {
    /// The acknowledgement URL embedded in the mail body, per spec.md §6.1:
    /// `http://<host>:<port>/receive_alert?notification_id=<N>&primary_admin=<bool>`.
    fn acknowledge_url(&self, primary_admin: bool) -> String {
        format!(
            "http://{}:{}/receive_alert?notification_id={}&primary_admin={}",
            self.app_host, self.app_port, self.notification_id, primary_admin
        )
    }
}

#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    #[serde(flatten)]
    context: &'a AlertContext,
    acknowledge_url: String,
}

/// Renders the stage-1 ("primary") and stage-2 ("secondary") alert emails.
#[derive(Debug)]
pub struct Renderer {
    hb: handlebars::Handlebars<'static>,
}

impl Renderer {
    pub fn try_new() -> anyhow::Result<Renderer> {
        let mut hb = handlebars::Handlebars::new();
        hb.set_strict_mode(true);

        hb.register_template_string("stage1-subject", STAGE1_SUBJECT)?;
        hb.register_template_string("stage1-body", STAGE1_BODY)?;
        hb.register_template_string("stage2-subject", STAGE2_SUBJECT)?;
        hb.register_template_string("stage2-body", STAGE2_BODY)?;

        Ok(Renderer { hb })
    }

    /// Renders the primary-stage alert, addressed to `target.primary_email`.
    pub fn render_stage1(&self, context: &AlertContext) -> anyhow::Result<(String, String)> {
        self.render("stage1-subject", "stage1-body", context, true)
    }

    /// Renders the secondary-stage alert, addressed to `target.secondary_email`.
    pub fn render_stage2(&self, context: &AlertContext) -> anyhow::Result<(String, String)> {
        self.render("stage2-subject", "stage2-body", context, false)
    }

    fn render(
        &self,
        subject_template: &str,
        body_template: &str,
        context: &AlertContext,
        primary_admin: bool,
    ) -> anyhow::Result<(String, String)> {
        let data = TemplateData {
            context,
            acknowledge_url: context.acknowledge_url(primary_admin),
        };
        let subject = self.hb.render(subject_template, &data)?;
        let body = self.hb.render(body_template, &data)?;
        Ok((subject, body))
    }
}

const STAGE1_SUBJECT: &str = "Alert: {{target_url}} is unreachable";
const STAGE1_BODY: &str = r#"Alert for {{target_url}}.

This target has not responded successfully within the alerting window, as of {{time_sent}}.

Click {{acknowledge_url}} to acknowledge this alert.

If it is not acknowledged in time, it will escalate to the secondary administrator."#;

const STAGE2_SUBJECT: &str = "Escalation: {{target_url}} is still unreachable";
const STAGE2_BODY: &str = r#"Escalated alert for {{target_url}}.

The primary administrator did not acknowledge the initial alert in time.

Click {{acknowledge_url}} to acknowledge this alert."#;

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AlertContext {
        AlertContext {
            target_url: "http://example.test/healthz".into(),
            notification_id: 42,
            app_host: "localhost".into(),
            app_port: 8080,
            time_sent: Utc::now(),
        }
    }

    #[test]
    fn stage1_embeds_primary_admin_true() {
        let renderer = Renderer::try_new().unwrap();
        let (subject, body) = renderer.render_stage1(&context()).unwrap();
        assert!(subject.contains("example.test"));
        assert!(body.contains("notification_id=42&primary_admin=true"));
    }

    #[test]
    fn stage2_embeds_primary_admin_false() {
        let renderer = Renderer::try_new().unwrap();
        let (subject, body) = renderer.render_stage2(&context()).unwrap();
        assert!(subject.contains("Escalation"));
        assert!(body.contains("notification_id=42&primary_admin=false"));
    }
}
