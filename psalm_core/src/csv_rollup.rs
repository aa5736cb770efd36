//! CSV rollup for archiving the wake log.
//!
//! Events move from the JSONL log into `wake_history.csv`; the log is then
//! renamed rather than deleted so nothing is lost if the CSV write fails
//! halfway.

use crate::{Error, PsalmId, Result, WakeEvent, WakeEventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use uuid::Uuid;

/// A row of the wake history CSV
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CsvRow {
    id: String,
    kind: String,
    psalm: u8,
    at: String,
    snooze_count: u32,
}

impl From<&WakeEvent> for CsvRow {
    fn from(event: &WakeEvent) -> Self {
        CsvRow {
            id: event.id.to_string(),
            kind: event.kind.as_str().to_string(),
            psalm: event.psalm.get(),
            at: event.at.to_rfc3339(),
            snooze_count: event.snooze_count,
        }
    }
}

impl TryFrom<CsvRow> for WakeEvent {
    type Error = Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id).map_err(|e| Error::Other(format!("Invalid UUID: {}", e)))?;

        let kind = WakeEventKind::parse(&row.kind)
            .ok_or_else(|| Error::Other(format!("Unknown event kind: {}", row.kind)))?;

        let psalm = PsalmId::new(row.psalm as u32)
            .ok_or_else(|| Error::Other(format!("Invalid psalm: {}", row.psalm)))?;

        let at = DateTime::parse_from_rfc3339(&row.at)
            .map_err(|e| Error::Other(format!("Invalid date: {}", e)))?
            .with_timezone(&Utc);

        Ok(WakeEvent {
            id,
            kind,
            psalm,
            at,
            snooze_count: row.snooze_count,
        })
    }
}

/// Roll the wake log into CSV and archive it
///
/// 1. Reads all events from the log
/// 2. Appends them to the CSV (headers only when the file is new)
/// 3. Syncs the CSV to disk
/// 4. Renames the log to `.wal.processed`
///
/// Returns the number of events moved.
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let events = crate::wal::read_events(wal_path)?;

    if events.is_empty() {
        tracing::info!("No events in wake log to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for event in &events {
        writer.serialize(CsvRow::from(event))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} events to CSV", events.len());

    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;

    tracing::info!("Archived wake log to {:?}", processed_path);

    Ok(events.len())
}

/// Remove archived `.wal.processed` files from a directory
pub fn cleanup_processed_wals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().is_some_and(|ext| ext == "processed") {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed wake log: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed wake logs", count);
    }

    Ok(count)
}
