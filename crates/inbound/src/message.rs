//! Inbound reply messages and run correlation.

use mail_parser::MessageParser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const RUN_ID_HEADER: &str = "X-Run-ID";

static SUBJECT_TAG: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"\[run:\s*([^\]\s]+)\s*\]").expect("static subject tag pattern compiles")
    });

/// One unseen message as handed over by a mail poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub subject: String,
    pub from: String,
    pub body: String,
    /// Raw header values keyed by header name as received.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl InboundMessage {
    /// Decode a raw RFC 822 message. Plain-text body only; `None` when the
    /// bytes are not a parseable message.
    pub fn from_rfc822(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let message_id = parsed
            .message_id()
            .map(|id| format!("<{id}>"))
            .unwrap_or_default();
        let headers = parsed
            .headers_raw()
            .map(|(name, value)| (name.to_string(), value.trim().to_string()))
            .collect();

        Some(Self {
            message_id,
            subject: parsed.subject().unwrap_or_default().to_string(),
            from,
            body: parsed.body_text(0).map(|b| b.into_owned()).unwrap_or_default(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Run this message answers: `X-Run-ID` header first, then a `[run:<id>]` subject tag.
pub fn extract_run_id(msg: &InboundMessage) -> Option<String> {
    if let Some(id) = msg.header(RUN_ID_HEADER).map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    SUBJECT_TAG
        .captures(&msg.subject)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Append the `[run:<id>]` correlation tag to `subject` unless it already carries one.
pub fn tag_subject(subject: &str, run_id: &str) -> String {
    if SUBJECT_TAG.is_match(subject) {
        subject.to_string()
    } else if subject.trim().is_empty() {
        format!("[run:{run_id}]")
    } else {
        format!("{} [run:{run_id}]", subject.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Bob Operator <bob@example.com>\r\n\
To: hitl@example.com\r\n\
Subject: Re: Approve outreach? [run:r7]\r\n\
Message-ID: <abc123@mail.example.com>\r\n\
In-Reply-To: <m1@test>\r\n\
X-Run-ID: r7\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
CHANGE\r\n\
deadline = 2025-01-01\r\n\
\r\n\
> Run r7 needs a human decision\r\n";

    #[test]
    fn rfc822_message_is_decoded() {
        let msg = InboundMessage::from_rfc822(RAW.as_bytes()).unwrap();
        assert_eq!(msg.from, "bob@example.com");
        assert_eq!(msg.message_id, "<abc123@mail.example.com>");
        assert_eq!(msg.subject, "Re: Approve outreach? [run:r7]");
        assert!(msg.body.starts_with("CHANGE"));
        assert!(msg.body.contains("deadline = 2025-01-01"));
        assert_eq!(msg.header("x-run-id"), Some("r7"));
        assert_eq!(msg.header("In-Reply-To"), Some("<m1@test>"));
    }

    #[test]
    fn header_wins_over_subject_tag() {
        let mut msg = InboundMessage {
            subject: "Re: thing [run:from-subject]".into(),
            ..Default::default()
        };
        assert_eq!(extract_run_id(&msg).as_deref(), Some("from-subject"));
        msg.headers.insert("X-Run-ID".into(), "from-header".into());
        assert_eq!(extract_run_id(&msg).as_deref(), Some("from-header"));
    }

    #[test]
    fn untagged_message_is_uncorrelated() {
        let msg = InboundMessage { subject: "Re: hello".into(), ..Default::default() };
        assert_eq!(extract_run_id(&msg), None);
        let blank = InboundMessage {
            subject: "Re: hello".into(),
            headers: BTreeMap::from([("X-Run-ID".to_string(), "  ".to_string())]),
            ..Default::default()
        };
        assert_eq!(extract_run_id(&blank), None);
    }

    #[test]
    fn subject_tag_is_added_once() {
        assert_eq!(tag_subject("Approve?", "r1"), "Approve? [run:r1]");
        assert_eq!(tag_subject("Approve? [run:r1]", "r1"), "Approve? [run:r1]");
        assert_eq!(tag_subject("", "r1"), "[run:r1]");
    }
}
