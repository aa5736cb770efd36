#![forbid(unsafe_code)]

//! Core domain model and business logic for the Psalmwake alarm clock.
//!
//! This crate provides:
//! - Domain types (psalms, alarm config, registrations, wake events)
//! - The psalm library and day-to-psalm selection
//! - Alarm scheduling against an exact-alarm platform
//! - Audio playback with fallback
//! - Persistence (wake log, CSV history, atomic state files)

pub mod types;
pub mod error;
pub mod rng;
pub mod library;
pub mod selector;
pub mod config;
pub mod logging;
pub mod state;
pub mod platform;
pub mod scheduler;
pub mod playback;
pub mod session;
pub mod wal;
pub mod csv_rollup;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use library::{builtin_library, PsalmLibrary};
pub use selector::{psalm_for_date, select_psalm, Selector};
pub use platform::{AlarmPlatform, FilePlatform, MemoryPlatform};
pub use scheduler::{compute_next_trigger, AlarmScheduler, FiredAlarm};
pub use playback::{AudioPlayer, PlaybackOutcome};
pub use session::AlarmSession;
pub use wal::{EventSink, JsonlSink};
pub use history::{load_recent_events, WakeStats};
