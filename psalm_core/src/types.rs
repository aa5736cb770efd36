//! Core domain types for the Psalmwake system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Psalm identifiers, records and audio references
//! - The persisted alarm configuration
//! - Platform alarm registrations and the derived alarm state
//! - Wake events recorded in the wake log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Number of psalms in the table
pub const TOTAL_PSALMS: u8 = 150;

// ============================================================================
// Psalm Types
// ============================================================================

/// Identifier of a psalm, always within `1..=150`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PsalmId(u8);

impl PsalmId {
    /// Create a psalm id, returning `None` outside `1..=150`
    pub fn new(number: u32) -> Option<Self> {
        if (1..=TOTAL_PSALMS as u32).contains(&number) {
            Some(Self(number as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Iterate over every psalm id in ascending order
    pub fn all() -> impl Iterator<Item = PsalmId> {
        (1..=TOTAL_PSALMS).map(PsalmId)
    }

    /// Resource name following the `psalm_<3-digit-index>` convention
    pub fn resource_name(self) -> String {
        format!("psalm_{:03}", self.0)
    }
}

impl TryFrom<u8> for PsalmId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PsalmId::new(value as u32).ok_or_else(|| format!("psalm id {} out of range", value))
    }
}

impl From<PsalmId> for u8 {
    fn from(id: PsalmId) -> Self {
        id.0
    }
}

impl fmt::Display for PsalmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the fallback audio resource
pub const DEFAULT_AUDIO_RESOURCE: &str = "default_psalm";

/// Reference to the audio recitation for a psalm
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioRef {
    /// A named recitation resolved to a file on disk
    Resource { name: String, path: PathBuf },
    /// The default sound used when no recitation is available
    Default,
}

impl AudioRef {
    pub fn name(&self) -> &str {
        match self {
            AudioRef::Resource { name, .. } => name,
            AudioRef::Default => DEFAULT_AUDIO_RESOURCE,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, AudioRef::Default)
    }
}

/// One entry of the psalm table
#[derive(Clone, Debug)]
pub struct PsalmRecord {
    pub id: PsalmId,
    pub title: String,
    pub text: String,
    pub audio: AudioRef,
}

impl PsalmRecord {
    /// Short heading, e.g. "Psalm 23"
    pub fn display_title(&self) -> String {
        format!("Psalm {}", self.id)
    }

    /// Heading including the curated title when one exists
    pub fn full_title(&self) -> String {
        if self.title.is_empty() || self.title == self.display_title() {
            self.display_title()
        } else {
            format!("Psalm {} - {}", self.id, self.title)
        }
    }
}

// ============================================================================
// Alarm Configuration and Registrations
// ============================================================================

/// Persisted alarm configuration
///
/// Stored as a flat key-value record so the on-disk keys stay stable:
/// `alarm_set`, `alarm_hour`, `alarm_minute`, `alarm_time`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmConfig {
    #[serde(rename = "alarm_set", default)]
    pub enabled: bool,
    #[serde(rename = "alarm_hour", default = "default_alarm_hour")]
    pub hour: u32,
    #[serde(rename = "alarm_minute", default)]
    pub minute: u32,
    /// Epoch millis of the last computed trigger
    #[serde(rename = "alarm_time", default)]
    pub last_trigger_millis: i64,
}

fn default_alarm_hour() -> u32 {
    7
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: default_alarm_hour(),
            minute: 0,
            last_trigger_millis: 0,
        }
    }
}

/// Request codes keep the daily and snooze registrations from colliding
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestCode {
    Daily,
    Snooze,
}

impl RequestCode {
    pub fn code(self) -> u32 {
        match self {
            RequestCode::Daily => 0,
            RequestCode::Snooze => 1,
        }
    }
}

/// An alarm armed with the platform
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub request: RequestCode,
    pub trigger_at_millis: i64,
    /// Repeat interval; `None` for one-shot registrations
    pub interval_millis: Option<i64>,
    /// Consecutive snoozes that led to this registration
    #[serde(default)]
    pub snooze_count: u32,
}

impl Registration {
    pub fn is_recurring(&self) -> bool {
        self.interval_millis.is_some()
    }
}

/// Alarm state derived from the persisted config and live registrations
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlarmState {
    Unset,
    Scheduled { next: DateTime<Utc> },
    Snoozed { until: DateTime<Utc>, count: u32 },
}

// ============================================================================
// Wake Events
// ============================================================================

/// What happened during a ring
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WakeEventKind {
    Fired,
    Snoozed,
    Stopped,
}

impl WakeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WakeEventKind::Fired => "fired",
            WakeEventKind::Snoozed => "snoozed",
            WakeEventKind::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fired" => Some(WakeEventKind::Fired),
            "snoozed" => Some(WakeEventKind::Snoozed),
            "stopped" => Some(WakeEventKind::Stopped),
            _ => None,
        }
    }
}

/// A recorded wake event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WakeEvent {
    pub id: Uuid,
    pub kind: WakeEventKind,
    pub psalm: PsalmId,
    pub at: DateTime<Utc>,
    pub snooze_count: u32,
}

impl WakeEvent {
    pub fn new(kind: WakeEventKind, psalm: PsalmId, at: DateTime<Utc>, snooze_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            psalm,
            at,
            snooze_count,
        }
    }
}
