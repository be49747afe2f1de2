//! hitl_store: requests and decisions (authoritative, append-only)
//!
//! Storage layout:
//!   <data>/hitl.jsonl   one `{"type": "request"|"decision", "data": {...}}` per line
//!
//! The `run_id -> status` index lives in memory only and is rebuilt by replaying
//! the file from the start. Last line wins per run_id.
//!
//! NOTE:
//! - Single writer per file. Concurrent writers from several processes must be
//!   serialized outside this crate.
//! - Corrupt lines are skipped (with a warning) during replay.

use hitl_contracts::{HitlDecision, HitlRequest, HitlStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ----------------------------
// Line format
// ----------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StoreLine {
    Request(HitlRequest),
    Decision(HitlDecision),
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum StoreLineRef<'a> {
    Request(&'a HitlRequest),
    Decision(&'a HitlDecision),
}

/// Index entry. Derived from the log, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitlRecord {
    pub run_id: String,
    pub status: HitlStatus,
    /// Message-ID of the latest request email for this run, if known.
    pub request_msg_id: Option<String>,
}

impl HitlRecord {
    fn pending(run_id: &str, request_msg_id: Option<String>) -> Self {
        Self { run_id: run_id.to_string(), status: HitlStatus::Pending, request_msg_id }
    }
}

pub struct DecisionStore {
    path: PathBuf,
    index: HashMap<String, HitlRecord>,
}

impl DecisionStore {
    /// Open the log at `path` (created lazily on first write) and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let index = replay(&path)?;
        Ok(Self { path, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of runs known to the in-memory index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rebuild the index from disk. Full replay, O(file size).
    pub fn resync(&mut self) -> Result<(), StoreError> {
        self.index = replay(&self.path)?;
        debug!(runs = self.index.len(), "index_resynced");
        Ok(())
    }

    /// Persist a request and mark the run pending.
    ///
    /// Returns `false` (and writes nothing) when the run already has a decision.
    pub fn write_request(&mut self, req: &HitlRequest) -> Result<bool, StoreError> {
        if let Some(rec) = self.index.get(&req.run_id) {
            if !rec.status.is_pending() {
                info!(run_id = %req.run_id, status = %rec.status, "request_already_decided");
                return Ok(false);
            }
        }
        self.append(&StoreLineRef::Request(req))?;
        apply_to_index(&mut self.index, StoreLineRef::Request(req));
        info!(run_id = %req.run_id, "request_written");
        Ok(true)
    }

    /// Persist a decision. Never deduplicated: the latest decision wins.
    pub fn apply_decision(&mut self, dec: &HitlDecision) -> Result<(), StoreError> {
        self.append(&StoreLineRef::Decision(dec))?;
        apply_to_index(&mut self.index, StoreLineRef::Decision(dec));
        info!(run_id = %dec.run_id, decision = %dec.decision, "decision_applied");
        Ok(())
    }

    /// Current status of `run_id`. A cache miss triggers one `resync`.
    pub fn status(&mut self, run_id: &str) -> Result<Option<HitlStatus>, StoreError> {
        if let Some(status) = self.cached_status(run_id) {
            return Ok(Some(status));
        }
        self.resync()?;
        Ok(self.cached_status(run_id))
    }

    /// Index lookup only, no I/O.
    pub fn cached_status(&self, run_id: &str) -> Option<HitlStatus> {
        self.index.get(run_id).map(|r| r.status)
    }

    pub fn record(&self, run_id: &str) -> Option<&HitlRecord> {
        self.index.get(run_id)
    }

    fn append(&self, line: &StoreLineRef<'_>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(line)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        f.write_all(&bytes)?;
        f.write_all(b"\n")?;
        f.flush()?;
        Ok(())
    }
}

fn apply_to_index(index: &mut HashMap<String, HitlRecord>, line: StoreLineRef<'_>) {
    match line {
        StoreLineRef::Request(req) => {
            let prev_msg_id = index.get(&req.run_id).and_then(|r| r.request_msg_id.clone());
            index.insert(
                req.run_id.clone(),
                HitlRecord::pending(&req.run_id, req.msg_id.clone().or(prev_msg_id)),
            );
        }
        StoreLineRef::Decision(dec) => {
            let entry = index
                .entry(dec.run_id.clone())
                .or_insert_with(|| HitlRecord::pending(&dec.run_id, None));
            entry.status = HitlStatus::Decided(dec.decision);
        }
    }
}

fn replay(path: &Path) -> Result<HashMap<String, HitlRecord>, StoreError> {
    let mut index = HashMap::new();
    if !path.exists() {
        return Ok(index);
    }
    let reader = BufReader::new(File::open(path)?);
    // raw bytes: a torn write can split a multi-byte character
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<StoreLine>(&line) {
            Ok(StoreLine::Request(req)) => apply_to_index(&mut index, StoreLineRef::Request(&req)),
            Ok(StoreLine::Decision(dec)) => {
                apply_to_index(&mut index, StoreLineRef::Decision(&dec))
            }
            Err(e) => warn!(line = idx + 1, error = %e, "index_load_error"),
        }
    }
    Ok(index)
}

// ----------------------------
// Tests
// ----------------------------
