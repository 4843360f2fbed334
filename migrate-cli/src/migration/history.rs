//! Migration history store
//!
//! Finalized execution records are appended, one JSON document per line,
//! to a history file in the platform data directory. Records are
//! immutable once written; the store only appends and reads.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::HistoryConfig;

use super::types::ExecutionRecord;

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Open the history store at the configured location, falling back to
    /// the platform data directory.
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => Self::default_path().context("no data directory available on this platform")?,
        };
        Ok(Self { path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("migrate-cli").join("history.jsonl"))
    }

    pub fn append(&self, record: &ExecutionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create history directory: {}", parent.display())
            })?;
        }

        let line =
            serde_json::to_string(record).context("failed to serialize execution record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history file: {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to history: {}", self.path.display()))?;
        Ok(())
    }

    /// All records, oldest first. A corrupt line is skipped with a warning
    /// rather than failing the whole listing.
    pub fn load(&self) -> Result<Vec<ExecutionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history: {}", self.path.display()))?;

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!(
                    "skipping corrupt history entry at {}:{}: {err}",
                    self.path.display(),
                    number + 1
                ),
            }
        }
        Ok(records)
    }

    /// The most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut records = self.load()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Look up a record by id prefix (the short form shown in listings).
    pub fn find(&self, id_prefix: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|r| r.id.to_string().starts_with(id_prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::types::{ExecutionOutcome, RollbackStatus};
    use chrono::Local;
    use uuid::Uuid;

    fn temp_store() -> HistoryStore {
        let dir = std::env::temp_dir().join(format!("migrate-cli-test-{}", Uuid::new_v4()));
        HistoryStore::at(dir.join("history.jsonl"))
    }

    fn record(outcome: ExecutionOutcome) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            committed_at: None,
            outcome,
            attempted: Vec::new(),
            log: Vec::new(),
            lock_held_ms: 12,
            failure: None,
            error: None,
            rollback: RollbackStatus::NotNeeded,
        }
    }

    #[test]
    fn test_append_and_load_round_trip() {
        let store = temp_store();

        let first = record(ExecutionOutcome::Success);
        let second = record(ExecutionOutcome::Failure);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let store = temp_store();

        let first = record(ExecutionOutcome::Success);
        let second = record(ExecutionOutcome::Success);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let recent = store.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second.id);
    }

    #[test]
    fn test_find_by_id_prefix() {
        let store = temp_store();
        let rec = record(ExecutionOutcome::Success);
        store.append(&rec).unwrap();

        let prefix = rec.id.to_string()[..8].to_string();
        let found = store.find(&prefix).unwrap().unwrap();
        assert_eq!(found.id, rec.id);

        assert!(store.find("ffffffff-0000").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_line_is_skipped() {
        let store = temp_store();
        let rec = record(ExecutionOutcome::Success);
        store.append(&rec).unwrap();

        // Damage the file with a trailing half-written line.
        let mut file = OpenOptions::new().append(true).open(&store.path).unwrap();
        writeln!(file, "{{\"id\": \"not a record").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, rec.id);
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let store = temp_store();
        assert!(store.load().unwrap().is_empty());
        assert!(store.recent(5).unwrap().is_empty());
    }
}
