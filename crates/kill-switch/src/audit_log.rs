//! Daily-rotated, append-only JSONL log of kill-switch actions.
//!
//! Files are named `kill_switch-YYYY-MM-DD.jsonl` after the entry's UTC
//! date. Every line is flushed and synced before `append` returns.

use std::fs::{self, create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use common::{Error, Result};
use tracing::warn;

use crate::types::KillSwitchAuditEntry;

pub const LOG_DIR: &str = "kill_switch_logs";
const FILE_PREFIX: &str = "kill_switch-";
const FILE_SUFFIX: &str = ".jsonl";

pub struct KillSwitchLog {
    dir: PathBuf,
    day_key: String,
    file: File,
}

fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

impl KillSwitchLog {
    pub fn open(dir: PathBuf) -> Result<Self> {
        create_dir_all(&dir)?;
        let day_key = day_key(Utc::now());
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{FILE_PREFIX}{day_key}{FILE_SUFFIX}")))
    }

    fn rotate_if_needed(&mut self, ts: DateTime<Utc>) -> std::io::Result<()> {
        let key = day_key(ts);
        if key != self.day_key {
            self.file = Self::open_day_file(&self.dir, &key)?;
            self.day_key = key;
        }
        Ok(())
    }

    pub fn append(&mut self, entry: &KillSwitchAuditEntry) -> Result<()> {
        self.rotate_if_needed(entry.timestamp_utc)?;
        let line = serde_json::to_string(entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every entry under `dir`, oldest first.
    ///
    /// A final line without its newline is a torn write from a crash and is
    /// skipped with a warning. Any other unreadable line is an error.
    pub fn load_all(dir: &Path) -> Result<Vec<KillSwitchAuditEntry>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
            })
            .collect();
        files.sort();

        let mut entries = Vec::new();
        for path in files {
            let raw = fs::read_to_string(&path)?;
            let complete = raw.ends_with('\n');
            let lines: Vec<&str> = raw.split('\n').collect();
            let last = lines.len() - 1;
            for (i, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<KillSwitchAuditEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) if i == last && !complete => {
                        warn!("Skipping torn final line in {}: {}", path.display(), e);
                    }
                    Err(e) => {
                        return Err(Error::StoreDurability(format!(
                            "{} line {}: {}",
                            path.display(),
                            i + 1,
                            e
                        )));
                    }
                }
            }
        }
        Ok(entries)
    }
}
