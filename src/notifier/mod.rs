//! Notifier collaborator - outbound email and SMS dispatch.
//!
//! Unlike audit logging, delivery failures propagate to the caller: a reset
//! email that never went out is a user-visible failure.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("channel not configured: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifierError>;
    async fn send_sms(&self, to: &str, message: &str) -> Result<(), NotifierError>;
}

/// SMTP-backed notifier. The transport is synchronous, so sends run on the
/// blocking thread pool.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifierError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| NotifierError::Delivery(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifierError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        NotifierError::InvalidAddress(e.to_string())
                    })?,
            )
            .to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| {
                    NotifierError::InvalidAddress(e.to_string())
                })?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| NotifierError::Delivery(e.to_string()))?;

        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| NotifierError::Delivery(e.to_string()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to, "Failed to send email");
                Err(NotifierError::Delivery(e.to_string()))
            }
        }
    }

    async fn send_sms(&self, to: &str, _message: &str) -> Result<(), NotifierError> {
        // SMS goes through an external gateway; this notifier only carries email.
        tracing::warn!(to = %to, "SMS requested but no gateway is configured");
        Err(NotifierError::Unsupported("sms".to_string()))
    }
}

/// Test notifier that records every message instead of sending it.
#[derive(Default)]
pub struct MockNotifier {
    pub emails: Mutex<Vec<SentEmail>>,
    pub sms: Mutex<Vec<SentSms>>,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct SentSms {
    pub to: String,
    pub message: String,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email_count(&self) -> usize {
        self.emails.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn sms_count(&self) -> usize {
        self.sms.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn last_email(&self) -> Option<SentEmail> {
        self.emails.lock().ok().and_then(|e| e.last().cloned())
    }

    pub fn last_sms(&self) -> Option<SentSms> {
        self.sms.lock().ok().and_then(|s| s.last().cloned())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifierError> {
        self.emails
            .lock()
            .map_err(|_| NotifierError::Delivery("mock lock poisoned".to_string()))?
            .push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            });
        Ok(())
    }

    async fn send_sms(&self, to: &str, message: &str) -> Result<(), NotifierError> {
        self.sms
            .lock()
            .map_err(|_| NotifierError::Delivery("mock lock poisoned".to_string()))?
            .push(SentSms {
                to: to.to_string(),
                message: message.to_string(),
            });
        Ok(())
    }
}
