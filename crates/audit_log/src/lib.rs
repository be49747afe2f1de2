//! hitl_audit_log
//!
//! Append-only JSONL audit log with hash chaining.
//! - One global chain for the whole file (runs are not partitioned)
//! - Each record: `{hash, prev_hash, ...event}`
//! - hash = sha256(canonical JSON of `{prev_hash, event}`), prev_hash = previous record's hash
//! - First record ever written has `prev_hash: null`
//! - Opening replays the file once to recover the tail; corrupt lines are skipped
//! - `verify_log` replays strictly and checks integrity end-to-end
//!
//! There is no update or delete.

use hitl_common::sha256_canonical_json;
use hitl_contracts::AuditEvent;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] hitl_common::CanonError),
    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("hash mismatch at line {line}: expected {expected}, got {got}")]
    HashMismatch { line: usize, expected: String, got: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub hash: String,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Serialize)]
struct HashPayload<'a> {
    prev_hash: Option<&'a str>,
    event: &'a AuditEvent,
}

pub fn compute_record_hash(
    prev_hash: Option<&str>,
    event: &AuditEvent,
) -> Result<String, AuditLogError> {
    let payload = HashPayload { prev_hash, event };
    Ok(sha256_canonical_json(&payload)?)
}

pub struct AuditLog {
    path: PathBuf,
    file: File,
    tail: Option<String>,
}

impl AuditLog {
    /// Open (or create) the log at `path` and recover the chain tail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tail = load_tail(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file, tail })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the last record, `None` in genesis state.
    pub fn tail(&self) -> Option<&str> {
        self.tail.as_deref()
    }

    /// Chain `event` onto the tail, persist it as one flushed line, return its hash.
    pub fn append(&mut self, mut event: AuditEvent) -> Result<String, AuditLogError> {
        event.prev_hash = self.tail.clone();
        let hash = compute_record_hash(event.prev_hash.as_deref(), &event)?;
        let record = AuditRecord { hash: hash.clone(), event };
        let line = serde_json::to_string(&record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        info!(
            run_id = %record.event.run_id,
            event = %record.event.event,
            hash = %hash,
            "audit_appended"
        );
        self.tail = Some(hash.clone());
        Ok(hash)
    }
}

// Tolerant replay: the last parseable record's hash wins.
fn load_tail(path: &Path) -> Result<Option<String>, AuditLogError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut tail = None;
    for (line_no, line) in raw_lines(path)? {
        match serde_json::from_slice::<AuditRecord>(&line) {
            Ok(rec) => tail = Some(rec.hash),
            Err(e) => warn!(line = line_no, error = %e, "audit_load_error"),
        }
    }
    Ok(tail)
}

/// Non-blank lines as raw bytes with their 1-based numbers. A torn write may
/// leave invalid UTF-8 behind, so decoding is left to the JSON parser.
fn raw_lines(path: &Path) -> Result<Vec<(usize, Vec<u8>)>, AuditLogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = vec![];
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        out.push((idx + 1, line));
    }
    Ok(out)
}

/// Strict replay: every line must parse and chain. Returns the final hash.
pub fn verify_log(path: impl AsRef<Path>) -> Result<Option<String>, AuditLogError> {
    let mut expected_prev: Option<String> = None;

    for (line_no, line) in raw_lines(path.as_ref())? {
        let rec: AuditRecord = serde_json::from_slice(&line).map_err(|e| AuditLogError::Malformed {
            line: line_no,
            reason: e.to_string(),
        })?;
        if rec.event.prev_hash != expected_prev {
            return Err(AuditLogError::HashMismatch {
                line: line_no,
                expected: display_hash(expected_prev.as_deref()),
                got: display_hash(rec.event.prev_hash.as_deref()),
            });
        }
        let computed = compute_record_hash(rec.event.prev_hash.as_deref(), &rec.event)?;
        if computed != rec.hash {
            return Err(AuditLogError::HashMismatch {
                line: line_no,
                expected: computed,
                got: rec.hash,
            });
        }
        expected_prev = Some(rec.hash);
    }

    Ok(expected_prev)
}

/// All parseable records for `run_id`, in file order. Corrupt lines are skipped.
pub fn read_events(
    path: impl AsRef<Path>,
    run_id: &str,
) -> Result<Vec<AuditRecord>, AuditLogError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(vec![]);
    }
    let mut out = vec![];
    for (line_no, line) in raw_lines(path)? {
        match serde_json::from_slice::<AuditRecord>(&line) {
            Ok(rec) if rec.event.run_id == run_id => out.push(rec),
            Ok(_) => {}
            Err(e) => warn!(line = line_no, error = %e, "audit_load_error"),
        }
    }
    Ok(out)
}

fn display_hash(h: Option<&str>) -> String {
    h.unwrap_or("null").to_string()
}
