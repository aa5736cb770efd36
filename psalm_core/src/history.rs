//! Wake history loading and statistics.
//!
//! Recent events are read from both the live JSONL log and the archived
//! CSV so `psalmwake stats` sees the whole window regardless of rollups.

use crate::csv_rollup::CsvRow;
use crate::{Error, PsalmId, Result, WakeEvent, WakeEventKind};
use chrono::{Duration, Utc};
use csv::ReaderBuilder;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Load events from the last N days from both the log and the CSV
///
/// Returns events sorted by time (newest first). Events present in both
/// sources are returned once. A window too large to represent is an error.
pub fn load_recent_events(wal_path: &Path, csv_path: &Path, days: i64) -> Result<Vec<WakeEvent>> {
    let cutoff = Duration::try_days(days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| Error::Other(format!("history window of {} days is out of range", days)))?;
    let mut events = Vec::new();
    let mut seen_ids = HashSet::new();

    if wal_path.exists() {
        for event in crate::wal::read_events(wal_path)? {
            if event.at >= cutoff && seen_ids.insert(event.id) {
                events.push(event);
            }
        }
        tracing::debug!("Loaded {} events from wake log", events.len());
    }

    if csv_path.exists() {
        let mut csv_count = 0;
        for event in load_events_from_csv(csv_path)? {
            if event.at >= cutoff && seen_ids.insert(event.id) {
                events.push(event);
                csv_count += 1;
            }
        }
        tracing::debug!("Loaded {} events from CSV", csv_count);
    }

    events.sort_by(|a, b| b.at.cmp(&a.at));

    tracing::info!("Loaded {} wake events from last {} days", events.len(), days);
    Ok(events)
}

fn load_events_from_csv(path: &Path) -> Result<Vec<WakeEvent>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let mut events = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        match result {
            Ok(row) => match WakeEvent::try_from(row) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Failed to parse CSV row: {}", e),
            },
            Err(e) => tracing::warn!("Failed to deserialize CSV row: {}", e),
        }
    }

    Ok(events)
}

/// Summary of a set of wake events
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WakeStats {
    pub total_fires: usize,
    pub unique_psalms: usize,
    /// Psalm heard most often, with its count; lowest number wins ties
    pub most_selected: Option<(PsalmId, usize)>,
    pub total_snoozes: usize,
    pub avg_snoozes_per_fire: f64,
}

impl WakeStats {
    pub fn from_events(events: &[WakeEvent]) -> Self {
        let mut per_psalm: BTreeMap<PsalmId, usize> = BTreeMap::new();
        let mut total_fires = 0;
        let mut total_snoozes = 0;

        for event in events {
            match event.kind {
                WakeEventKind::Fired => {
                    total_fires += 1;
                    *per_psalm.entry(event.psalm).or_default() += 1;
                }
                WakeEventKind::Snoozed => total_snoozes += 1,
                WakeEventKind::Stopped => {}
            }
        }

        let most_selected = per_psalm
            .iter()
            .fold(None, |best: Option<(PsalmId, usize)>, (&psalm, &count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((psalm, count)),
            });

        let avg_snoozes_per_fire = if total_fires == 0 {
            0.0
        } else {
            total_snoozes as f64 / total_fires as f64
        };

        WakeStats {
            total_fires,
            unique_psalms: per_psalm.len(),
            most_selected,
            total_snoozes,
            avg_snoozes_per_fire,
        }
    }
}
