//! Notification Agent: request approval, remind, escalate, record out-of-band decisions.
//!
//! Every outbound email is sent first and recorded afterwards:
//! - send fails  -> error returned, nothing recorded
//! - record fails -> error returned, the caller knows the email went out unrecorded

use crate::templates::{
    TemplateEngine, TemplateError, ESCALATION_TEMPLATE, REMINDER_TEMPLATE, REQUEST_TEMPLATE,
};
use crate::transport::{MailTransport, TransportError};
use hitl_audit_log::{AuditLog, AuditLogError};
use hitl_contracts::{AuditEvent, HitlDecision, HitlRequest};
use hitl_redaction::{RedactionError, Redactor};
use hitl_store::{DecisionStore, StoreError};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

pub const REMINDER_SUBJECT: &str = "Reminder: HITL pending";
pub const ESCALATION_SUBJECT: &str = "Escalation: HITL pending";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("redaction error: {0}")]
    Redaction(#[from] RedactionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("audit log error: {0}")]
    Audit(#[from] AuditLogError),
}

pub struct NotificationAgent<'a, T: MailTransport + ?Sized> {
    transport: &'a T,
    templates: &'a TemplateEngine,
    redactor: Redactor,
    store: &'a mut DecisionStore,
    audit: &'a mut AuditLog,
}

impl<'a, T: MailTransport + ?Sized> NotificationAgent<'a, T> {
    pub fn new(
        transport: &'a T,
        templates: &'a TemplateEngine,
        store: &'a mut DecisionStore,
        audit: &'a mut AuditLog,
    ) -> Self {
        Self { transport, templates, redactor: Redactor::new(), store, audit }
    }

    /// Mask `context`, email the operator, persist the pending request, audit it.
    ///
    /// Returns the Message-ID of the request email.
    pub fn request_approval(
        &mut self,
        run_id: &str,
        to: &str,
        subject: &str,
        context: &Value,
    ) -> Result<String, AgentError> {
        let masked = self.redactor.mask(run_id, context)?;
        let body = self.templates.render(
            REQUEST_TEMPLATE,
            &json!({
                "run_id": run_id,
                "subject": subject,
                "recipient": to,
                "context": self.redactor.mask_value(context),
                "redacted": masked.data.redacted,
            }),
        )?;

        let msg_id = self.transport.send(to, subject, &body, None)?;

        let req = HitlRequest::new(run_id, subject, context.clone(), masked)
            .with_msg_id(msg_id.clone());
        let written = self.store.write_request(&req)?;
        self.audit.append(
            AuditEvent::new(run_id, "hitl_requested")
                .detail("to", to)
                .detail("msg_id", msg_id.clone())
                .detail("pii_redaction", req.masked_payload.pii_redaction.clone())
                .detail("already_decided", !written),
        )?;
        info!(run_id = %run_id, to = %to, msg_id = %msg_id, "hitl_requested");
        Ok(msg_id)
    }

    /// Nudge the operator. No store mutation.
    pub fn send_reminder(&mut self, run_id: &str, to: &str) -> Result<String, AgentError> {
        self.send_followup(run_id, to, REMINDER_TEMPLATE, REMINDER_SUBJECT, "hitl_reminder")
    }

    /// Escalate to an admin. No store mutation.
    pub fn send_escalation(&mut self, run_id: &str, to: &str) -> Result<String, AgentError> {
        self.send_followup(run_id, to, ESCALATION_TEMPLATE, ESCALATION_SUBJECT, "hitl_escalation")
    }

    /// Persist a decision that did not come in by email (UI, API, ...).
    pub fn record_decision(&mut self, decision: &HitlDecision) -> Result<(), AgentError> {
        self.store.apply_decision(decision)?;
        self.audit.append(
            AuditEvent::new(&decision.run_id, "hitl_decision_recorded")
                .detail("decision", decision.decision.as_str())
                .detail("actor", decision.actor.clone())
                .detail("kv", Value::Object(decision.kv.clone())),
        )?;
        info!(run_id = %decision.run_id, decision = %decision.decision, "hitl_decision_recorded");
        Ok(())
    }

    fn send_followup(
        &mut self,
        run_id: &str,
        to: &str,
        template: &str,
        subject: &str,
        event: &str,
    ) -> Result<String, AgentError> {
        // thread under the original request when we know it
        if self.store.record(run_id).is_none() {
            self.store.resync()?;
        }
        let parent = self.store.record(run_id).and_then(|r| r.request_msg_id.clone());

        let body = self
            .templates
            .render(template, &json!({ "run_id": run_id, "recipient": to }))?;
        let msg_id = self.transport.send(to, subject, &body, parent.as_deref())?;

        self.audit.append(
            AuditEvent::new(run_id, event)
                .detail("to", to)
                .detail("msg_id", msg_id.clone()),
        )?;
        info!(run_id = %run_id, to = %to, msg_id = %msg_id, event = %event, "hitl_followup_sent");
        Ok(msg_id)
    }
}
