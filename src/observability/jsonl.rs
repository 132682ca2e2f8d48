//! Rolling JSONL trace file.
//!
//! Each event is appended as one JSON object per line. When `max_entries > 0`
//! the file may grow to just under twice the limit; on reaching `2 * max_entries`
//! lines it is rewritten to keep only the newest `max_entries`.

use super::traits::{TraceEvent, TraceSink};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct JsonlTraceSink {
    path: PathBuf,
    max_entries: usize,
    /// Known line count of the file; `None` until first read.
    lines: Mutex<Option<usize>>,
}

impl JsonlTraceSink {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries,
            lines: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &TraceEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("Failed to serialize trace event")?;

        let mut lines = self.lines.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create trace directory: {}", parent.display())
            })?;
        }

        let known = match *lines {
            Some(n) => n,
            None => count_lines(&self.path)?,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trace file: {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append trace event")?;
        drop(file);

        let mut total = known + 1;
        if self.max_entries > 0 && total >= self.max_entries.saturating_mul(2) {
            total = self.trim()?;
        }
        *lines = Some(total);
        Ok(())
    }

    /// Rewrite the file with the newest `max_entries` lines; returns the kept count.
    fn trim(&self) -> Result<usize> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read trace file: {}", self.path.display()))?;
        let all: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let keep = &all[all.len().saturating_sub(self.max_entries)..];

        let mut body = keep.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body)
            .with_context(|| format!("Failed to write trace file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace trace file: {}", self.path.display()))?;
        Ok(keep.len())
    }
}

fn count_lines(path: &Path) -> Result<usize> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().filter(|l| !l.trim().is_empty()).count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read trace file: {}", path.display()))
        }
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: &TraceEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to record trace event"
            );
        }
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
