//! Mail transport seam + SMTP implementation (lettre, STARTTLS).

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("no mail transport configured")]
    NotConfigured,
}

impl TransportError {
    /// Worth another attempt: connection trouble or a non-permanent SMTP reply.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Smtp(e) => !e.is_permanent(),
            TransportError::Connection(_) => true,
            TransportError::Address { .. }
            | TransportError::Message(_)
            | TransportError::NotConfigured => false,
        }
    }
}

/// Send one plain-text email, return its Message-ID.
pub trait MailTransport {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, TransportError>;
}

impl<T: MailTransport + ?Sized> MailTransport for &T {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, TransportError> {
        (**self).send(to, subject, body, in_reply_to)
    }
}

/// Refuses every send. For agents that only record decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl MailTransport for NullTransport {
    fn send(
        &self,
        _to: &str,
        _subject: &str,
        _body: &str,
        _in_reply_to: Option<&str>,
    ) -> Result<String, TransportError> {
        Err(TransportError::NotConfigured)
    }
}

/// SMTP settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub starttls: bool,
    pub timeout: Duration,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: "no-reply@example.com".to_string(),
            starttls: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl SmtpConfig {
    /// Read `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASS`, `SMTP_FROM`,
    /// `SMTP_STARTTLS` and `SMTP_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: std::env::var("SMTP_HOST").unwrap_or(d.host),
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.port),
            username: std::env::var("SMTP_USER").unwrap_or_default(),
            password: std::env::var("SMTP_PASS").unwrap_or_default(),
            from_address: std::env::var("SMTP_FROM").unwrap_or(d.from_address),
            starttls: std::env::var("SMTP_STARTTLS")
                .map(|s| {
                    !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
                })
                .unwrap_or(d.starttls),
            timeout: std::env::var("SMTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.timeout),
        }
    }

    /// Domain part of the sender, used for generated Message-IDs.
    pub fn from_domain(&self) -> &str {
        self.from_address
            .rsplit_once('@')
            .map(|(_, d)| d.trim_end_matches('>'))
            .filter(|d| !d.is_empty())
            .unwrap_or("localhost")
    }
}

pub struct SmtpMailer {
    config: SmtpConfig,
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, TransportError> {
        let from = parse_mailbox(&config.from_address)?;
        let builder = if config.starttls {
            // already installed by an earlier mailer or by the host binary
            let _ = rustls::crypto::ring::default_provider().install_default();
            SmtpTransport::starttls_relay(&config.host)?
        } else {
            SmtpTransport::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port).timeout(Some(config.timeout));
        if !config.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(config.username.clone(), config.password.clone()));
        }
        Ok(Self { transport: builder.build(), from, config })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

impl MailTransport for SmtpMailer {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, TransportError> {
        let msg_id = format!("<{}@{}>", Uuid::new_v4(), self.config.from_domain());
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(subject)
            .message_id(Some(msg_id.clone()));
        if let Some(parent) = in_reply_to {
            builder = builder.in_reply_to(parent.to_string()).references(parent.to_string());
        }
        let email = builder
            .body(body.to_string())
            .map_err(|e| TransportError::Message(e.to_string()))?;

        self.transport.send(&email)?;
        info!(to = %to, msg_id = %msg_id, "smtp_sent");
        Ok(msg_id)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse::<Mailbox>().map_err(|e| TransportError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_domain_handles_display_names() {
        let mut cfg = SmtpConfig::default();
        assert_eq!(cfg.from_domain(), "example.com");
        cfg.from_address = "HITL Bot <bot@ops.example.org>".into();
        assert_eq!(cfg.from_domain(), "ops.example.org");
        cfg.from_address = "nobody".into();
        assert_eq!(cfg.from_domain(), "localhost");
    }

    #[test]
    fn invalid_recipient_is_not_transient() {
        let err = parse_mailbox("not an address").unwrap_err();
        assert!(matches!(err, TransportError::Address { .. }));
        assert!(!err.is_transient());
        assert!(TransportError::Connection("refused".into()).is_transient());
    }

    #[test]
    fn null_transport_refuses_permanently() {
        let err = NullTransport.send("ops@example.com", "s", "b", None).unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured));
        assert!(!err.is_transient());
    }

    #[test]
    fn mailer_builds_without_connecting() {
        let cfg = SmtpConfig { starttls: false, port: 2525, ..SmtpConfig::default() };
        let mailer = SmtpMailer::new(cfg).unwrap();
        assert_eq!(mailer.config().port, 2525);
    }
}
