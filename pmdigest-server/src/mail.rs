//! Mail delivery over SMTP.

use crate::config::runtime::{MailSettings, SmtpSecurity, SmtpSettings};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pmdigest_core::digest::{DeliveryError, Dispatcher, MailBody, OutboundMail};

/// Dispatcher handed to the engine.
pub enum Mailer {
    /// Log every mail instead of sending it.
    DryRun { to: String, subject: String },
    Smtp(SmtpMailer),
}

impl Mailer {
    pub fn dry_run(mail: &MailSettings) -> Self {
        Mailer::DryRun {
            to: mail.to.clone(),
            subject: mail.subject.clone(),
        }
    }

    pub fn smtp(mail: &MailSettings, smtp: &SmtpSettings) -> anyhow::Result<Self> {
        Ok(Mailer::Smtp(SmtpMailer::new(mail, smtp)?))
    }
}

#[async_trait]
impl Dispatcher for Mailer {
    async fn deliver(&self, mail: OutboundMail) -> Result<(), DeliveryError> {
        match self {
            Mailer::DryRun { to, subject } => {
                let subject = mail.subject.as_deref().unwrap_or(subject);
                let (content_type, body) = match &mail.body {
                    MailBody::Html(body) => ("text/html", body),
                    MailBody::Text(body) => ("text/plain", body),
                };
                tracing::info!(
                    %to,
                    %subject,
                    content_type,
                    length = body.len(),
                    "skipping sending digest in dry-run mode"
                );
                tracing::debug!(%body, "dry-run digest body");
                Ok(())
            }
            Mailer::Smtp(mailer) => mailer.send(mail).await,
        }
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl SmtpMailer {
    pub fn new(mail: &MailSettings, smtp: &SmtpSettings) -> anyhow::Result<Self> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid mail.from {:?}: {e}", mail.from))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid mail.to {:?}: {e}", mail.to))?;

        let mut builder = match smtp.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        }
        .port(smtp.port);

        match &smtp.credentials {
            Some(credentials) => {
                builder = builder.credentials(Credentials::new(
                    credentials.user.clone(),
                    credentials.password.clone(),
                ));
            }
            None => tracing::warn!(host = %smtp.host, "SMTP_USER/SMTP_PASS not set, sending without authentication"),
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            subject: mail.subject.clone(),
        })
    }

    /// Build the message for `mail`, using the default subject when it has none.
    pub fn build_message(&self, mail: OutboundMail) -> Result<Message, DeliveryError> {
        let subject = mail.subject.unwrap_or_else(|| self.subject.clone());
        let (content_type, body) = match mail.body {
            MailBody::Html(body) => (ContentType::TEXT_HTML, body),
            MailBody::Text(body) => (ContentType::TEXT_PLAIN, body),
        };
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(content_type)
            .body(body)
            .map_err(|e| DeliveryError::InvalidMessage(e.to_string()))
    }

    async fn send(&self, mail: OutboundMail) -> Result<(), DeliveryError> {
        let message = self.build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}
