//! hitl_inbound
//!
//! Inbound Orchestrator: operator reply -> parsed decision -> store + audit.
//!
//! Parse failures are returned, never swallowed. What happens to the source
//! message (retry, dead-letter, mark seen) is the poller integration's call.

pub mod message;

pub use message::{extract_run_id, tag_subject, InboundMessage, RUN_ID_HEADER};

use hitl_audit_log::{AuditLog, AuditLogError};
use hitl_contracts::{AuditEvent, HitlDecision, HitlStatus};
use hitl_replies::{parse_reply, ParseError};
use hitl_store::{DecisionStore, StoreError};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("reply parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("message {message_id} carries no run id")]
    Uncorrelated { message_id: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("audit log error: {0}")]
    Audit(#[from] AuditLogError),
    #[error("mail poller error: {0}")]
    Poller(Box<dyn std::error::Error + Send + Sync>),
}

/// Source of unseen messages. Read-only: marking messages seen is up to the implementor.
pub trait MailPoller {
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch_unseen(&mut self) -> Result<Vec<InboundMessage>, Self::Error>;
}

/// Per-message result of `process_batch`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Applied(HitlDecision),
    Uncorrelated,
    Rejected(ParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub message_id: String,
    pub outcome: MessageOutcome,
}

pub struct Orchestrator<'a> {
    store: &'a mut DecisionStore,
    audit: &'a mut AuditLog,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a mut DecisionStore, audit: &'a mut AuditLog) -> Self {
        Self { store, audit }
    }

    /// Parse `raw_body` as `actor`'s reply for `run_id`, persist it and audit it.
    ///
    /// Re-applying the same reply is safe: the status is unchanged, the audit
    /// trail gains another entry.
    pub fn apply_inbound(
        &mut self,
        run_id: &str,
        actor: &str,
        raw_body: &str,
    ) -> Result<HitlDecision, InboundError> {
        self.apply(run_id, actor, raw_body, None)
    }

    /// Correlate `msg` to a run and apply it with `actor = from`.
    pub fn apply_message(&mut self, msg: &InboundMessage) -> Result<HitlDecision, InboundError> {
        let run_id = extract_run_id(msg).ok_or_else(|| InboundError::Uncorrelated {
            message_id: msg.message_id.clone(),
        })?;
        let msg_id = Some(msg.message_id.as_str()).filter(|s| !s.is_empty());
        self.apply(&run_id, &msg.from, &msg.body, msg_id)
    }

    /// Drain one poll. Uncorrelated and unparseable messages are reported
    /// per message; store or audit failures abort the batch.
    pub fn process_batch<P: MailPoller + ?Sized>(
        &mut self,
        poller: &mut P,
    ) -> Result<Vec<BatchItem>, InboundError> {
        let messages = poller
            .fetch_unseen()
            .map_err(|e| InboundError::Poller(Box::new(e)))?;

        let mut items = Vec::with_capacity(messages.len());
        for msg in &messages {
            let outcome = match self.apply_message(msg) {
                Ok(dec) => MessageOutcome::Applied(dec),
                Err(InboundError::Uncorrelated { .. }) => {
                    warn!(
                        message_id = %msg.message_id,
                        subject = %msg.subject,
                        "inbound_uncorrelated"
                    );
                    MessageOutcome::Uncorrelated
                }
                Err(InboundError::Parse(e)) => {
                    warn!(message_id = %msg.message_id, error = %e, "inbound_rejected");
                    MessageOutcome::Rejected(e)
                }
                Err(e) => return Err(e),
            };
            items.push(BatchItem { message_id: msg.message_id.clone(), outcome });
        }
        info!(messages = items.len(), "inbound_batch_processed");
        Ok(items)
    }

    /// Store pass-through.
    pub fn status(&mut self, run_id: &str) -> Result<Option<HitlStatus>, InboundError> {
        Ok(self.store.status(run_id)?)
    }

    fn apply(
        &mut self,
        run_id: &str,
        actor: &str,
        raw_body: &str,
        msg_id: Option<&str>,
    ) -> Result<HitlDecision, InboundError> {
        let mut dec = parse_reply(run_id, actor, raw_body)?;
        if let Some(id) = msg_id {
            dec = dec.with_msg_id(id);
        }

        self.store.apply_decision(&dec)?;

        let mut event = AuditEvent::new(run_id, "hitl_decision")
            .detail("actor", actor)
            .detail("decision", dec.decision.as_str());
        if !dec.kv.is_empty() {
            event = event.detail("kv", Value::Object(dec.kv.clone()));
        }
        if let Some(id) = msg_id {
            event = event.detail("msg_id", id);
        }
        self.audit.append(event)?;

        info!(run_id = %run_id, actor = %actor, decision = %dec.decision, "decision_routed");
        Ok(dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitl_audit_log::{read_events, verify_log};
    use hitl_contracts::Decision;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        td: TempDir,
        store: DecisionStore,
        audit: AuditLog,
    }

    impl Fixture {
        fn audit_path(&self) -> PathBuf {
            self.td.path().join("audit.jsonl")
        }
    }

    fn fixture() -> Fixture {
        let td = TempDir::new().unwrap();
        let store = DecisionStore::open(td.path().join("hitl.jsonl")).unwrap();
        let audit = AuditLog::open(td.path().join("audit.jsonl")).unwrap();
        Fixture { td, store, audit }
    }

    #[derive(Debug, Error)]
    #[error("imap down")]
    struct ImapDown;

    struct FakePoller {
        batch: Vec<InboundMessage>,
        fail: bool,
    }

    impl MailPoller for FakePoller {
        type Error = ImapDown;

        fn fetch_unseen(&mut self) -> Result<Vec<InboundMessage>, ImapDown> {
            if self.fail {
                return Err(ImapDown);
            }
            Ok(std::mem::take(&mut self.batch))
        }
    }

    fn reply(id: &str, subject: &str, from: &str, body: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            subject: subject.into(),
            from: from.into(),
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn decline_updates_status_and_audit() {
        let mut fx = fixture();
        let mut orch = Orchestrator::new(&mut fx.store, &mut fx.audit);
        let dec = orch.apply_inbound("r2", "bob", "DECLINE").unwrap();
        assert_eq!(dec.decision, Decision::Declined);
        assert_eq!(orch.status("r2").unwrap(), Some(HitlStatus::Decided(Decision::Declined)));
        drop(orch);

        let evs = read_events(fx.audit_path(), "r2").unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].event.event, "hitl_decision");
        assert_eq!(evs[0].event.details["actor"], "bob");
        assert_eq!(evs[0].event.details["decision"], "DECLINED");
    }

    #[test]
    fn change_with_inline_kv() {
        let mut fx = fixture();
        let dec = Orchestrator::new(&mut fx.store, &mut fx.audit)
            .apply_inbound("r3", "carol", "CHANGE: deadline=2025-01-01")
            .unwrap();
        assert_eq!(dec.decision, Decision::ChangeRequested);
        assert_eq!(serde_json::Value::Object(dec.kv), json!({ "deadline": "2025-01-01" }));
    }

    #[test]
    fn parse_failure_propagates_and_writes_nothing() {
        let mut fx = fixture();
        let mut orch = Orchestrator::new(&mut fx.store, &mut fx.audit);
        let err = orch.apply_inbound("r4", "dave", "maybe later").unwrap_err();
        assert!(matches!(err, InboundError::Parse(ParseError::MissingCommand)));
        assert_eq!(orch.status("r4").unwrap(), None);
        drop(orch);
        assert!(fx.audit.tail().is_none());
        assert!(!fx.store.path().exists());
    }

    #[test]
    fn reapplying_is_idempotent_for_status() {
        let mut fx = fixture();
        let mut orch = Orchestrator::new(&mut fx.store, &mut fx.audit);
        orch.apply_inbound("r1", "alice", "APPROVE").unwrap();
        orch.apply_inbound("r1", "alice", "APPROVE").unwrap();
        assert_eq!(orch.status("r1").unwrap(), Some(HitlStatus::Decided(Decision::Approved)));
        drop(orch);

        assert_eq!(read_events(fx.audit_path(), "r1").unwrap().len(), 2);
        verify_log(fx.audit_path()).unwrap();
    }

    #[test]
    fn apply_message_uses_sender_and_message_id() {
        let mut fx = fixture();
        let msg = reply(
            "<x1@mail>",
            "Re: Approve? [run:r9]",
            "erin@example.com",
            "approved, thanks",
        );
        let dec = Orchestrator::new(&mut fx.store, &mut fx.audit).apply_message(&msg).unwrap();
        assert_eq!(dec.run_id, "r9");
        assert_eq!(dec.actor, "erin@example.com");
        assert_eq!(dec.msg_id.as_deref(), Some("<x1@mail>"));

        let evs = read_events(fx.audit_path(), "r9").unwrap();
        assert_eq!(evs[0].event.details["msg_id"], "<x1@mail>");
    }

    #[test]
    fn batch_reports_each_message() {
        let mut fx = fixture();
        let mut poller = FakePoller {
            batch: vec![
                reply("<a@m>", "Re: [run:r1]", "a@example.com", "APPROVE"),
                reply("<b@m>", "Re: no tag", "b@example.com", "APPROVE"),
                reply("<c@m>", "Re: [run:r3]", "c@example.com", "not sure"),
            ],
            fail: false,
        };
        let mut orch = Orchestrator::new(&mut fx.store, &mut fx.audit);
        let items = orch.process_batch(&mut poller).unwrap();

        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0].outcome, MessageOutcome::Applied(d) if d.run_id == "r1"));
        assert_eq!(items[1].outcome, MessageOutcome::Uncorrelated);
        assert_eq!(items[2].outcome, MessageOutcome::Rejected(ParseError::MissingCommand));
        assert_eq!(orch.status("r3").unwrap(), None);

        // poller already drained
        assert!(orch.process_batch(&mut poller).unwrap().is_empty());
    }

    #[test]
    fn poller_failure_aborts_batch() {
        let mut fx = fixture();
        let mut poller = FakePoller { batch: vec![], fail: true };
        let err = Orchestrator::new(&mut fx.store, &mut fx.audit)
            .process_batch(&mut poller)
            .unwrap_err();
        assert!(matches!(err, InboundError::Poller(_)));
    }
}
