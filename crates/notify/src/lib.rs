//! hitl_notify
//!
//! Outbound side of the HITL loop:
//! - `MailTransport`: the one seam to the mail system (send, get a Message-ID back)
//! - `SmtpMailer`: lettre-backed transport
//! - `TemplateEngine`: `{{ dotted.path }}` email bodies
//! - `RetryPolicy` / `RetryingTransport`: opt-in retries, composed at the call site
//! - `NotificationAgent`: request / reminder / escalation / out-of-band decisions,
//!   each recorded in the decision store and the audit log
//!
//! The agent never retries and never swallows a send failure.

pub mod agent;
pub mod retry;
pub mod templates;
pub mod transport;

pub use agent::{AgentError, NotificationAgent, ESCALATION_SUBJECT, REMINDER_SUBJECT};
pub use retry::{RetryPolicy, RetryingTransport};
pub use templates::{
    TemplateEngine, TemplateError, ESCALATION_TEMPLATE, REMINDER_TEMPLATE, REQUEST_TEMPLATE,
};
pub use transport::{MailTransport, NullTransport, SmtpConfig, SmtpMailer, TransportError};
