//! Write-ahead wake log.
//!
//! Wake events are appended to a JSONL (JSON Lines) file under an exclusive
//! file lock so the delivery loop and interactive commands can share it.

use crate::{Result, WakeEvent};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Destination for wake events
pub trait EventSink {
    fn append(&mut self, event: &WakeEvent) -> Result<()>;
}

/// JSONL-based event sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlSink {
    fn append(&mut self, event: &WakeEvent) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended {} event {} to wake log", event.kind.as_str(), event.id);
        Ok(())
    }
}

/// Sink that drops events, for dry runs
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn append(&mut self, event: &WakeEvent) -> Result<()> {
        tracing::debug!("Discarding {} event", event.kind.as_str());
        Ok(())
    }
}

/// Read all events from a wake log
///
/// Lines that fail to parse are logged and skipped.
pub fn read_events(path: &Path) -> Result<Vec<WakeEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WakeEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("Failed to parse wake event at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} events from wake log", events.len());
    Ok(events)
}
