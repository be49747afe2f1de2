//! hitl_redaction
//!
//! PII boundary for anything that is persisted or emailed:
//! - serialize the input deterministically
//! - replace email addresses with `***+<token(local)>@domain`
//! - replace phone numbers with `+***-<token(match)>`
//! - wrap the result in a MaskedPayload tagged with the scheme ("v1")
//!
//! IMPORTANT:
//! - Redaction MUST be deterministic (tokens are SHA-256 prefixes, no salt) so
//!   the same address correlates across requests without being revealed.
//! - Failure to serialize is an error. Nothing is ever passed through unmasked.

use hitl_common::{canonical_json_bytes, short_token};
use hitl_contracts::{MaskedPayload, REDACTION_SCHEME_V1};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

/// Minimum number of digits for a phone-like match to be masked.
pub const MIN_PHONE_DIGITS: usize = 7;

// Email wins over phone when both could start at the same offset.
static PII: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<local>[A-Za-z0-9_.+\-]+)@(?P<domain>[A-Za-z0-9\-]+\.[A-Za-z0-9.\-]+)",
        r"|(?P<phone>\+?\d[\d\s().\-]{6,}\d)",
    ))
    .expect("static PII pattern compiles")
});

#[derive(Debug, Error)]
pub enum RedactionError {
    #[error("failed to serialize redaction input: {0}")]
    Canon(#[from] hitl_common::CanonError),
    #[error("serialized input is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy)]
pub struct Redactor {
    scheme: &'static str,
}

impl Default for Redactor {
    fn default() -> Self {
        Self { scheme: REDACTION_SCHEME_V1 }
    }
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Mask `data` for `run_id` into its persistable form.
    pub fn mask<T: Serialize + ?Sized>(
        &self,
        run_id: &str,
        data: &T,
    ) -> Result<MaskedPayload, RedactionError> {
        let text = String::from_utf8(canonical_json_bytes(data)?)?;
        let (redacted, replacements) = redact_text(&text);
        info!(run_id = %run_id, scheme = self.scheme, replacements, "pii_masked");
        Ok(MaskedPayload::new(run_id, redacted, self.scheme))
    }

    /// Mask a single string.
    pub fn mask_text(&self, text: &str) -> String {
        redact_text(text).0
    }

    /// Same substitution applied to every string (keys included) of a JSON tree.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.mask_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.mask_text(k), self.mask_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn redact_text(text: &str) -> (String, usize) {
    let mut replacements = 0usize;
    let out = PII.replace_all(text, |caps: &Captures| {
        if let (Some(local), Some(domain)) = (caps.name("local"), caps.name("domain")) {
            replacements += 1;
            return format!("***+{}@{}", short_token(local.as_str()), domain.as_str());
        }
        let whole = &caps[0];
        let digits = whole.chars().filter(|c| c.is_ascii_digit()).count();
        if digits < MIN_PHONE_DIGITS {
            return whole.to_string();
        }
        replacements += 1;
        format!("+***-{}", short_token(whole))
    });
    (out.into_owned(), replacements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_is_masked_and_domain_kept() {
        let r = Redactor::new();
        let masked = r.mask("r1", &json!({ "a": "x@y.com" })).unwrap();
        let text = &masked.data.redacted;
        assert!(!text.contains("x@y.com"));
        assert!(text.contains(&format!("***+{}@y.com", short_token("x"))));
        assert_eq!(masked.pii_redaction, "v1");
        assert_eq!(masked.run_id, "r1");
    }

    #[test]
    fn masking_is_deterministic() {
        let r = Redactor::new();
        let input = json!({ "contact": "alice@corp.example", "phone": "+1 (555) 010-9999" });
        let a = r.mask("r1", &input).unwrap();
        let b = r.mask("r1", &input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_local_part_yields_same_token_across_domains() {
        let r = Redactor::new();
        let out = r.mask_text("bob@a.com and bob@b.org");
        let tok = short_token("bob");
        assert_eq!(out, format!("***+{tok}@a.com and ***+{tok}@b.org"));
    }

    #[test]
    fn phone_numbers_are_masked() {
        let r = Redactor::new();
        let out = r.mask_text("call +49 (30) 1234-5678 today");
        assert!(!out.contains("1234-5678"));
        assert!(out.starts_with("call +***-"));
        assert!(out.ends_with(" today"));
        assert_eq!(out, format!("call +***-{} today", short_token("+49 (30) 1234-5678")));
    }

    #[test]
    fn short_digit_runs_are_left_alone() {
        let r = Redactor::new();
        assert_eq!(r.mask_text("room 12 (1-2)"), "room 12 (1-2)");
        assert_eq!(r.mask_text("id 1......2"), "id 1......2");
    }

    #[test]
    fn seven_digits_is_the_phone_threshold() {
        let r = Redactor::new();
        assert_eq!(r.mask_text("ext 555-1234"), format!("ext +***-{}", short_token("555-1234")));
        assert_eq!(r.mask_text("ext 55-1234"), "ext 55-1234");
        // long enough for the pattern, one digit short of a phone
        assert_eq!(r.mask_text("ref 1-2-3-4-5-6"), "ref 1-2-3-4-5-6");
    }

    #[test]
    fn unsized_inputs_can_be_masked() {
        let r = Redactor::new();
        let from_str = r.mask("r1", "x@y.com").unwrap();
        let from_slice = r.mask("r1", &["x@y.com"][..]).unwrap();
        assert_eq!(from_str.data.redacted, format!("\"***+{}@y.com\"", short_token("x")));
        assert_eq!(from_slice.data.redacted, format!("[\"***+{}@y.com\"]", short_token("x")));
    }

    #[test]
    fn email_tokens_are_not_rescanned_as_phones() {
        let r = Redactor::new();
        let out = r.mask_text("12345678@x.com");
        assert_eq!(out, format!("***+{}@x.com", short_token("12345678")));
    }

    #[test]
    fn mask_value_masks_nested_strings_and_keys() {
        let r = Redactor::new();
        let v = json!({
            "company": "Acme",
            "people": [ { "email": "carol@acme.io" } ],
            "dave@acme.io": 3
        });
        let out = r.mask_value(&v);
        let text = serde_json::to_string(&out).unwrap();
        assert!(!text.contains("carol@acme.io"));
        assert!(!text.contains("dave@acme.io"));
        assert_eq!(out["company"], "Acme");
        assert_eq!(out["people"][0]["email"], format!("***+{}@acme.io", short_token("carol")));
    }
}
