//! The outbound mail transport and message templates.
//!
//! Mirrors the shape of `notifications::Renderer` /
//! `agent::alerts::notifier::{EmailSender, Sender}`: a `Renderer` turns
//! structured alert data into a subject/body pair, and a `Mailer` trait
//! abstracts over the actual transport so the Escalator can be tested
//! without a real SMTP server. Unlike the teacher, which sends over the
//! Resend HTTP API, this system's `SMTP_SERVER`/`SMTP_PORT` configuration
//! (spec.md §6.3) calls for a real SMTP client, so the transport is built on
//! `lettre` instead (the crate the wider example pack reaches for whenever a
//! service configures SMTP credentials directly).

mod templates;

pub use templates::{AlertContext, Renderer};

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Sends one templated message to one address. Failure is logged by the
/// caller, never retried (spec.md §4.2, §7): a missed send is a no-op from
/// the state machine's perspective, not a fatal error.
pub trait Mailer: std::fmt::Debug + Send + Sync + 'static {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// SMTP-backed [`Mailer`], configured from `SMTP_SERVER`/`SMTP_PORT`/
/// `SMTP_USERNAME`/`SMTP_PASSWORD`.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(
        server: &str,
        port: u16,
        username: &str,
        password: &str,
        from_address: String,
    ) -> anyhow::Result<SmtpMailer> {
        let creds = Credentials::new(username.to_owned(), password.to_owned());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(server)?
            .port(port)
            .credentials(creds)
            .build();
        Ok(SmtpMailer {
            transport,
            from_address,
        })
    }
}

impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_owned())?;

        self.transport.send(email).await?;
        Ok(())
    }
}

/// A [`Mailer`] that only logs, used when no SMTP credentials are
/// configured (local development, or tests that don't care about delivery).
/// Grounded on `agent::alerts::notifier::Sender::Disabled`.
#[derive(Debug, Clone, Default)]
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::warn!(%to, %subject, "skipping sending mail (mailer disabled)");
        Ok(())
    }
}

/// A [`Mailer`] that records every send instead of delivering it. Used by
/// `liveness-core`'s Escalator tests to assert on which addresses received
/// mail, mirroring `control-plane-api`'s `test-support` feature pattern.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::Mailer;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingMailer {
        pub fn sent_to(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(to, _, _)| to.clone())
                .collect()
        }
    }

    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_owned(), subject.to_owned(), body.to_owned()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingMailer;
    use super::*;

    #[tokio::test]
    async fn disabled_mailer_never_fails() {
        let mailer = DisabledMailer;
        mailer.send("a@b.test", "subject", "body").await.unwrap();
    }

    #[tokio::test]
    async fn recording_mailer_captures_sends() {
        let mailer = RecordingMailer::default();
        mailer.send("a@b.test", "subject", "body").await.unwrap();
        assert_eq!(mailer.sent_to(), vec!["a@b.test".to_string()]);
    }
}
