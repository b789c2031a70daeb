//! Outbound mail. Account flows hand a rendered [`OutgoingEmail`] to a
//! [`Notifier`]; delivery failures are reported to the caller, which decides
//! whether they matter.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use time::OffsetDateTime;
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

pub fn reset_email(to: &str, name: &str, link: &str, ttl_minutes: i64) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_owned(),
        subject: "Password Reset Request".into(),
        body: format!(
            "Hello {name},\n\n\
             A password reset was requested for your account.\n\n\
             Open the link below to choose a new password:\n\n\
             {link}\n\n\
             The link expires in {ttl_minutes} minutes and can be used once.\n\n\
             If you did not request this, you can ignore this email."
        ),
    }
}

pub fn password_changed_email(to: &str, name: &str, at: OffsetDateTime) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_owned(),
        subject: "Your password was changed".into(),
        body: format!(
            "Hello {name},\n\n\
             The password for your account was changed at {at} (UTC).\n\n\
             If this was not you, reset your password immediately and contact support."
        ),
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("smtp relay")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .timeout(Some(Duration::from_secs(10)))
            .build();
        let from = cfg.from.parse().context("invalid MAIL_FROM address")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let to: Mailbox = email.to.parse().context("invalid recipient address")?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "mail delivery disabled, dropping email");
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingNotifier;
