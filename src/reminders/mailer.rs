//! Outgoing mail.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Writes mail to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        info!("[mail] to={} subject={:?}", mail.to, mail.subject);
        debug!("[mail] body:\n{}", mail.body);
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig, password: Option<&SecretString>) -> Result<Self> {
        let host = config.server.as_str();
        let mut builder = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .with_context(|| format!("Invalid SMTP relay {}", host))?
        } else if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .with_context(|| format!("Invalid SMTP relay {}", host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        builder = builder.port(config.port);

        if let Some(username) = &config.username {
            let password = password.map(|p| p.expose_secret().to_string()).unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self { transport: builder.build() })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let message = Message::builder()
            .from(mail.from.parse().with_context(|| format!("Invalid sender address {}", mail.from))?)
            .to(mail.to.parse().with_context(|| format!("Invalid recipient address {}", mail.to))?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())?;

        self.transport.send(message).await.context("SMTP send failed")?;
        Ok(())
    }
}

/// SMTP when a username is configured, otherwise log-only.
pub fn build_mailer(config: &MailConfig, password: Option<&SecretString>) -> Result<Arc<dyn Mailer>> {
    if config.username.is_none() {
        info!("No SMTP username configured; reminder mail will only be logged");
        return Ok(Arc::new(LogMailer));
    }
    info!("Sending mail through {}:{}", config.server, config.port);
    Ok(Arc::new(SmtpMailer::new(config, password)?))
}
