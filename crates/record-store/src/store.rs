//! Append-only, durable decision record store.
//!
//! Each record lives in `decision_records/<decision_id>.json` as an envelope
//! carrying its sequence number. Files are written to a temp name, synced,
//! and hard-linked into place, so a reader never sees a partial record, a
//! crash never leaves a half-written one under its final name, and an
//! existing record is never replaced. One `RecordStore` owns the directory
//! at a time.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use audit_hash::{compute_audit_hash, sign};
use chrono::{DateTime, Utc};
use common::{
    distinct_sources, DecisionDraft, DecisionRecord, DirLock, Error, Result, StoreConfig,
    MIN_EVIDENCE_SOURCES,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cursor::RecordCursor;

pub const RECORDS_DIR: &str = "decision_records";

/// A persisted record and its position in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub sequence: u64,
    pub record: DecisionRecord,
}

/// Confirmation that a record is durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub decision_id: String,
    pub sequence: u64,
    pub audit_hash: String,
    pub timestamp_utc: DateTime<Utc>,
}

#[derive(Default)]
struct Index {
    by_id: HashMap<String, usize>,
    entries: Vec<Arc<StoredRecord>>,
}

impl Index {
    fn push(&mut self, stored: Arc<StoredRecord>) {
        self.by_id
            .insert(stored.record.decision_id.clone(), self.entries.len());
        self.entries.push(stored);
    }
}

struct WriterState {
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    /// Set when a write may have landed without being indexed.
    failed: Option<String>,
}

pub struct RecordStore {
    dir: PathBuf,
    config: StoreConfig,
    lock: Arc<DirLock>,
    writer: Mutex<WriterState>,
    index: RwLock<Index>,
}

impl RecordStore {
    /// Opens (or creates) the store under `root` and rebuilds the index.
    ///
    /// Fails with [`Error::Locked`] while another handle has the directory.
    pub fn open(root: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let dir = root.as_ref().join(RECORDS_DIR);
        fs::create_dir_all(&dir)?;
        let lock = Arc::new(DirLock::acquire(&dir)?);

        let mut loaded = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some("tmp") => {
                    // Left by an interrupted write; never published.
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("Could not remove stale {}: {}", path.display(), e);
                    }
                    continue;
                }
                _ => continue,
            }
            let raw = fs::read(&path)?;
            let stored: StoredRecord = serde_json::from_slice(&raw).map_err(|e| {
                Error::StoreDurability(format!("unreadable record {}: {}", path.display(), e))
            })?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem != stored.record.decision_id {
                return Err(Error::StoreDurability(format!(
                    "{} holds record {}",
                    path.display(),
                    stored.record.decision_id
                )));
            }
            loaded.push(stored);
        }
        loaded.sort_by_key(|s| s.sequence);

        let mut index = Index::default();
        let mut last_timestamp = None;
        for stored in loaded {
            if index
                .entries
                .last()
                .is_some_and(|prev| prev.sequence == stored.sequence)
            {
                return Err(Error::StoreDurability(format!(
                    "sequence {} assigned twice",
                    stored.sequence
                )));
            }
            last_timestamp = last_timestamp.max(Some(stored.record.timestamp_utc));
            index.push(Arc::new(stored));
        }
        let next_sequence = index.entries.last().map_or(1, |s| s.sequence + 1);
        info!(
            "Opened decision store at {} ({} records, next sequence {})",
            dir.display(),
            index.entries.len(),
            next_sequence
        );

        Ok(Self {
            dir,
            config,
            lock,
            writer: Mutex::new(WriterState {
                next_sequence,
                last_timestamp,
                failed: None,
            }),
            index: RwLock::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, decision_id: &str) -> PathBuf {
        self.dir.join(format!("{decision_id}.json"))
    }

    /// Stamps, hashes, and durably writes `draft`.
    ///
    /// Returns only after the record is on disk. A failed or timed-out write
    /// is reported to the caller and never retried here; the sequence number
    /// it consumed is not reused. If the write may still land (timeout, dir
    /// sync failure, aborted task) every later append fails with
    /// `StoreDurability` until the store is reopened and re-indexed.
    pub async fn append(&self, draft: DecisionDraft) -> Result<StoreReceipt> {
        if draft.decision_id.is_empty()
            || !draft
                .decision_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Serialization(format!(
                "decision_id {:?} is not a valid record name",
                draft.decision_id
            )));
        }
        if draft.violates_evidence_rule() {
            return Err(Error::InsufficientEvidence {
                p_confidence: draft.llm_output.p_confidence,
                required: MIN_EVIDENCE_SOURCES,
                found: distinct_sources(&draft.evidence),
            });
        }

        let mut writer = self.writer.lock().await;
        if let Some(reason) = &writer.failed {
            return Err(Error::StoreDurability(reason.clone()));
        }
        if self.index.read().by_id.contains_key(&draft.decision_id) {
            return Err(Error::DuplicateId(draft.decision_id));
        }

        let now = Utc::now();
        let timestamp = match writer.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        let sequence = writer.next_sequence;
        writer.next_sequence += 1;

        let signer = draft.signer.clone();
        let mut record = draft.into_record(timestamp);
        record.audit_hash = compute_audit_hash(&record)?;
        if let Some(signer) = signer {
            record.signature = Some(sign(&record, &signer)?);
        }

        let stored = StoredRecord { sequence, record };
        let bytes = serde_json::to_vec_pretty(&stored)?;
        let path = self.record_path(&stored.record.decision_id);
        let decision_id = stored.record.decision_id.clone();
        let timeout_ms = self.config.write_timeout_ms;

        // The task keeps the directory locked until it finishes, even past
        // a timeout or a dropped store.
        let write = tokio::task::spawn_blocking({
            let decision_id = decision_id.clone();
            let lock = Arc::clone(&self.lock);
            move || {
                let _held = lock;
                write_durably(&path, &decision_id, &bytes)
            }
        });
        match tokio::time::timeout(Duration::from_millis(timeout_ms), write).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(WriteFailure::Clean(e)))) => {
                error!("Durable write failed for {}: {}", decision_id, e);
                return Err(e);
            }
            Ok(Ok(Err(WriteFailure::Unsettled(e)))) => {
                return Err(refuse_appends(&mut writer, &decision_id, e));
            }
            Ok(Err(join_err)) => {
                let err = Error::StoreDurability(join_err.to_string());
                return Err(refuse_appends(&mut writer, &decision_id, err));
            }
            Err(_) => {
                let err = Error::StoreTimeout {
                    decision_id: decision_id.clone(),
                    timeout_ms,
                };
                return Err(refuse_appends(&mut writer, &decision_id, err));
            }
        }

        writer.last_timestamp = Some(timestamp);
        let receipt = StoreReceipt {
            decision_id: decision_id.clone(),
            sequence,
            audit_hash: stored.record.audit_hash.clone(),
            timestamp_utc: timestamp,
        };
        self.index.write().push(Arc::new(stored));
        drop(writer);

        info!(
            "Appended decision {} at sequence {} (audit_hash={})",
            receipt.decision_id, receipt.sequence, receipt.audit_hash
        );
        Ok(receipt)
    }

    pub fn get(&self, decision_id: &str) -> Result<DecisionRecord> {
        self.get_stored(decision_id).map(|s| s.record.clone())
    }

    pub fn get_stored(&self, decision_id: &str) -> Result<Arc<StoredRecord>> {
        let index = self.index.read();
        index
            .by_id
            .get(decision_id)
            .map(|&i| Arc::clone(&index.entries[i]))
            .ok_or_else(|| Error::NotFound(decision_id.to_string()))
    }

    /// Records stamped at or after `since`, oldest sequence first.
    pub fn list_since(&self, since: DateTime<Utc>) -> RecordCursor {
        let snapshot: Arc<[Arc<StoredRecord>]> = self.index.read().entries.clone().into();
        RecordCursor::new(snapshot, since)
    }

    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.index.read().entries.last().map(|s| s.sequence)
    }
}

fn refuse_appends(writer: &mut WriterState, decision_id: &str, err: Error) -> Error {
    error!(
        "Write for {} did not settle ({}); refusing appends until the store is reopened",
        decision_id, err
    );
    writer.failed = Some(format!("write for {decision_id} did not settle: {err}"));
    err
}

enum WriteFailure {
    /// Nothing reached the final name.
    Clean(Error),
    /// The record may be on disk without being durable or indexed.
    Unsettled(Error),
}

fn write_durably(
    path: &Path,
    decision_id: &str,
    bytes: &[u8],
) -> std::result::Result<(), WriteFailure> {
    let tmp = path.with_extension("json.tmp");
    if let Err(e) = write_synced(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(WriteFailure::Clean(e.into()));
    }

    // Unlike rename, a link never replaces an existing file.
    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        warn!("Could not remove {}: {}", tmp.display(), e);
    }
    match linked {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!("Record file for {} already exists on disk", decision_id);
            return Err(WriteFailure::Clean(Error::DuplicateId(
                decision_id.to_string(),
            )));
        }
        Err(e) => return Err(WriteFailure::Clean(e.into())),
    }
    sync_dir(path.parent()).map_err(WriteFailure::Unsettled)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dir {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: Option<&Path>) -> Result<()> {
    Ok(())
}
