//! JSON Lines helpers for the append-only logs.
//!
//! Appends are single-writer per file (guarded by the store's lock registry);
//! full rewrites go through a temp file + rename so a crash never leaves a
//! half-written log behind.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::store::ProjectStore;

impl ProjectStore {
    /// Append one record to a JSONL file, creating parent dirs as needed.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read every parseable record from a JSONL file. Missing file is empty;
    /// malformed lines are skipped with a warning rather than failing the read.
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        let mut out = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(v) => out.push(v),
                Err(e) => {
                    warn!(file = %path.display(), line = idx + 1, error = %e, "skipping malformed jsonl line");
                }
            }
        }
        Ok(out)
    }

    /// Replace the whole JSONL file with `records` (temp file + rename).
    pub fn rewrite_jsonl<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap();
        let mut buf = String::new();
        for r in records {
            buf.push_str(&serde_json::to_string(r)?);
            buf.push('\n');
        }
        self.write_atomic(path, &buf)
    }

    /// Write text via temp file + rename. Caller holds the file lock if needed.
    pub fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Line count of a JSONL file (0 when missing). Used by receipts and tests.
    pub fn jsonl_line_count(&self, path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|t| t.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}
