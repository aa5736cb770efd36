//! Day-to-psalm selection.
//!
//! Each calendar day maps to one psalm:
//! - Seed a [`SeededRng`] with `year * 1000 + day_of_year`
//! - Draw once from `[0, 150)` and add 1
//!
//! The mapping depends only on the date, so the same psalm is shown all
//! day and across restarts. Nothing prevents two days, in the same year or
//! in different years, from drawing the same psalm.

use crate::library::PsalmLibrary;
use crate::rng::SeededRng;
use crate::types::{PsalmId, PsalmRecord, TOTAL_PSALMS};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone};

/// Select the psalm for a year and 1-based day of year
pub fn select_psalm(year: i32, day_of_year: u32) -> PsalmId {
    let seed = year as i64 * 1000 + day_of_year as i64;
    let draw = SeededRng::new(seed).next_bounded(TOTAL_PSALMS as i32);

    // draw is in [0, 150), so the id is always valid
    PsalmId::new(draw as u32 + 1).unwrap_or_else(|| unreachable!("draw {} out of range", draw))
}

/// Select the psalm for a calendar date
pub fn psalm_for_date(date: NaiveDate) -> PsalmId {
    select_psalm(date.year(), date.ordinal())
}

/// Selector bound to a psalm library
#[derive(Clone, Copy, Debug)]
pub struct Selector<'a> {
    library: &'a PsalmLibrary,
}

impl<'a> Selector<'a> {
    pub fn new(library: &'a PsalmLibrary) -> Self {
        Self { library }
    }

    /// Record for a calendar date
    pub fn for_date(&self, date: NaiveDate) -> &'a PsalmRecord {
        self.library.get(psalm_for_date(date))
    }

    /// Record for the local calendar day of `now`
    pub fn today<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> &'a PsalmRecord {
        let record = self.for_date(now.date_naive());
        tracing::debug!("Psalm of the day for {}: {}", now.date_naive(), record.id);
        record
    }

    pub fn library(&self) -> &'a PsalmLibrary {
        self.library
    }
}
