//! hitl_replies
//!
//! Operator reply grammar (plain-text email bodies):
//!
//! ```text
//! CHANGE: deadline = 2025-01-01
//! owner=alice
//! ```
//!
//! - first non-blank line starts with APPROVE, APPROVED, DECLINE, DECLINED or CHANGE
//!   (case-insensitive, any suffix)
//! - `key = value` pairs on the rest of that line and on every following line
//! - non-matching lines are skipped, a repeated key overwrites the earlier value
//!
//! Operators type this by hand. Keep it boring.

use hitl_contracts::{Decision, HitlDecision, JsonMap};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static CMD: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"(?i)^(APPROVED?|DECLINED?|CHANGE)").expect("static command pattern compiles")
    });

static KV: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"^([A-Za-z0-9_.\-]+)\s*=\s*(.+)$").expect("static kv pattern compiles")
    });

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty reply body")]
    Empty,
    #[error("no decision keyword found on the first line (expected APPROVE, DECLINE or CHANGE)")]
    MissingCommand,
}

/// Map the leading command token of `line` to a decision.
///
/// Returns the decision and the remainder of the line after the token.
pub fn parse_command(line: &str) -> Option<(Decision, &str)> {
    let m = CMD.find(line)?;
    let token = m.as_str().to_ascii_uppercase();
    let decision = if token.starts_with("APPROVE") {
        Decision::Approved
    } else if token.starts_with("DECLINE") {
        Decision::Declined
    } else {
        Decision::ChangeRequested
    };
    Some((decision, &line[m.end()..]))
}

/// Match a single `key = value` line.
pub fn parse_kv(line: &str) -> Option<(&str, &str)> {
    let caps = KV.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str().trim();
    Some((key, value))
}

/// Parse a raw reply body into a decision for `run_id` made by `actor`.
pub fn parse_reply(run_id: &str, actor: &str, body: &str) -> Result<HitlDecision, ParseError> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

    let first = lines.next().ok_or(ParseError::Empty)?;
    let (decision, rest) = parse_command(first).ok_or(ParseError::MissingCommand)?;

    let mut kv = JsonMap::new();
    let inline = rest.trim_start();
    let inline = inline.strip_prefix(':').unwrap_or(inline).trim();
    for line in std::iter::once(inline).chain(lines) {
        if let Some((k, v)) = parse_kv(line) {
            kv.insert(k.to_string(), Value::String(v.to_string()));
        }
    }

    debug!(run_id = %run_id, decision = %decision, kv_count = kv.len(), "reply_parsed");
    Ok(HitlDecision::new(run_id, decision, actor, kv))
}
