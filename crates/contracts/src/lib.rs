//! hitl_contracts
//!
//! Schema-versioned records shared by the HITL crates:
//! - MaskedPayload (redacted, persistable form of request context)
//! - HitlRequest / HitlDecision (decision log payloads)
//! - AuditEvent (audit chain payload)
//!
//! NOTE: `schema_version` is per-record; bump it together with the record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SCHEMA_VERSION: &str = "1.0";

/// Redaction scheme tag carried by every MaskedPayload produced today.
pub const REDACTION_SCHEME_V1: &str = "v1";

/// Open key/value map (decision changes, audit details). Keeps insertion order.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

fn schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

// ----------------------------
// Redaction
// ----------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedData {
    pub redacted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedPayload {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    pub run_id: String,
    pub data: MaskedData,
    /// Redaction scheme tag, e.g. "v1".
    pub pii_redaction: String,
}

impl MaskedPayload {
    pub fn new(run_id: impl Into<String>, redacted: String, scheme: &str) -> Self {
        Self {
            schema_version: schema_version(),
            run_id: run_id.into(),
            data: MaskedData { redacted },
            pii_redaction: scheme.to_string(),
        }
    }
}

// ----------------------------
// Requests + decisions
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequest {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    pub run_id: String,
    pub subject: String,
    /// Raw context. In-memory only: never serialized.
    #[serde(skip)]
    pub context: serde_json::Value,
    pub masked_payload: MaskedPayload,
    #[serde(default)]
    pub msg_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HitlRequest {
    pub fn new(
        run_id: impl Into<String>,
        subject: impl Into<String>,
        context: serde_json::Value,
        masked_payload: MaskedPayload,
    ) -> Self {
        Self {
            schema_version: schema_version(),
            run_id: run_id.into(),
            subject: subject.into(),
            context,
            masked_payload,
            msg_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Declined,
    ChangeRequested,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::Declined => "DECLINED",
            Decision::ChangeRequested => "CHANGE_REQUESTED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown decision: {0} (expected APPROVED, DECLINED or CHANGE_REQUESTED)")]
pub struct UnknownDecision(pub String);

impl FromStr for Decision {
    type Err = UnknownDecision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Ok(Decision::Approved),
            "DECLINED" => Ok(Decision::Declined),
            "CHANGE_REQUESTED" => Ok(Decision::ChangeRequested),
            _ => Err(UnknownDecision(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlDecision {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    pub run_id: String,
    pub decision: Decision,
    pub actor: String,
    /// Requested changes. Always present, possibly empty.
    #[serde(default)]
    pub kv: JsonMap,
    #[serde(default)]
    pub msg_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl HitlDecision {
    pub fn new(
        run_id: impl Into<String>,
        decision: Decision,
        actor: impl Into<String>,
        kv: JsonMap,
    ) -> Self {
        Self {
            schema_version: schema_version(),
            run_id: run_id.into(),
            decision,
            actor: actor.into(),
            kv,
            msg_id: None,
            decided_at: Utc::now(),
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }
}

/// Current state of a run as seen by the decision store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HitlStatus {
    Pending,
    Decided(Decision),
}

impl HitlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitlStatus::Pending => "pending",
            HitlStatus::Decided(d) => d.as_str(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, HitlStatus::Pending)
    }
}

impl fmt::Display for HitlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------
// Audit
// ----------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    pub run_id: String,
    pub event: String,
    #[serde(default)]
    pub details: JsonMap,
    pub ts: DateTime<Utc>,
    /// Set by the audit log on append; null only for the first record ever written.
    #[serde(default)]
    pub prev_hash: Option<String>,
}

impl AuditEvent {
    pub fn new(run_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version(),
            run_id: run_id.into(),
            event: event.into(),
            details: JsonMap::new(),
            ts: Utc::now(),
            prev_hash: None,
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_uses_upper_snake_wire_names() {
        let s = serde_json::to_string(&Decision::ChangeRequested).unwrap();
        assert_eq!(s, "\"CHANGE_REQUESTED\"");
        let d: Decision = serde_json::from_str("\"DECLINED\"").unwrap();
        assert_eq!(d, Decision::Declined);
        assert_eq!("approved".parse::<Decision>().unwrap(), Decision::Approved);
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn request_never_serializes_raw_context() {
        let masked = MaskedPayload::new("r1", "***+abc@example.com".into(), REDACTION_SCHEME_V1);
        let req = HitlRequest::new(
            "r1",
            "Approve?",
            serde_json::json!({ "email": "alice@example.com" }),
            masked,
        )
        .with_msg_id("<m1@example.com>");
        let line = serde_json::to_string(&req).unwrap();
        assert!(!line.contains("alice@example.com"));
        assert!(!line.contains("\"context\""));
        assert!(line.contains("\"masked_payload\""));

        let back: HitlRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(back.run_id, "r1");
        assert_eq!(back.msg_id.as_deref(), Some("<m1@example.com>"));
        assert!(back.context.is_null());
    }

    #[test]
    fn decision_kv_is_always_present() {
        let dec = HitlDecision::new("r1", Decision::Approved, "alice", JsonMap::new());
        let v = serde_json::to_value(&dec).unwrap();
        assert_eq!(v["kv"], serde_json::json!({}));
        assert_eq!(v["decision"], "APPROVED");
        assert_eq!(v["schema_version"], SCHEMA_VERSION);
    }

    #[test]
    fn status_displays_pending_or_decision() {
        assert_eq!(HitlStatus::Pending.to_string(), "pending");
        assert_eq!(HitlStatus::Decided(Decision::Approved).to_string(), "APPROVED");
    }
}
