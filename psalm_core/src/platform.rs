//! Exact alarm registration.
//!
//! The scheduler hands triggers to an [`AlarmPlatform`]. Registrations are
//! keyed by [`RequestCode`], so arming the same request twice replaces the
//! earlier trigger instead of adding a second one.
//!
//! Every change to the table is a single locked transaction. Delivery in
//! particular decides what is due and re-arms it in the same transaction,
//! so a concurrent `cancel` is never undone by a poll that read the table
//! before it.

use crate::state::{load_or_default, save_atomic, with_update_lock};
use crate::{Error, Registration, RequestCode, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Facility that delivers alarms at exact wall-clock times
pub trait AlarmPlatform {
    /// Whether exact alarms may be registered right now
    fn can_schedule_exact(&self) -> bool;

    /// Register a trigger that repeats every `interval`
    fn set_repeating(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()>;

    /// Register a one-shot trigger
    fn set_exact(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        snooze_count: u32,
    ) -> Result<()>;

    /// Withdraw a registration; withdrawing a missing one is not an error
    fn cancel(&mut self, request: RequestCode) -> Result<()>;

    /// Deliver every registration due at `now`
    ///
    /// One-shot registrations are withdrawn and recurring ones are re-armed
    /// at `next(registration)` (epoch millis), all in one step. Returns the
    /// delivered registrations as they were before delivery.
    fn consume_due(
        &mut self,
        now: DateTime<Utc>,
        next: &dyn Fn(&Registration) -> i64,
    ) -> Result<Vec<Registration>>;

    /// All live registrations, earliest trigger first
    fn registrations(&self) -> Result<Vec<Registration>>;
}

/// Registrations keyed by request code
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistrationTable {
    #[serde(default)]
    registrations: Vec<Registration>,
}

impl RegistrationTable {
    /// Insert or replace the registration for its request code
    pub fn upsert(&mut self, registration: Registration) {
        self.remove(registration.request);
        self.registrations.push(registration);
        self.registrations.sort_by_key(|r| r.trigger_at_millis);
    }

    pub fn remove(&mut self, request: RequestCode) -> Option<Registration> {
        let idx = self.registrations.iter().position(|r| r.request == request)?;
        Some(self.registrations.remove(idx))
    }

    pub fn get(&self, request: RequestCode) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.request == request)
    }

    pub fn all(&self) -> &[Registration] {
        &self.registrations
    }

    /// Withdraw or re-arm everything due at `now_millis`
    pub fn consume_due(
        &mut self,
        now_millis: i64,
        next: &dyn Fn(&Registration) -> i64,
    ) -> Vec<Registration> {
        let due: Vec<Registration> = self
            .registrations
            .iter()
            .filter(|r| r.trigger_at_millis <= now_millis)
            .cloned()
            .collect();

        for reg in &due {
            match reg.interval_millis {
                Some(interval) if interval > 0 => {
                    let mut rearmed = reg.clone();
                    rearmed.trigger_at_millis = next(reg);
                    self.upsert(rearmed);
                }
                _ => {
                    self.remove(reg.request);
                }
            }
        }
        due
    }
}

fn repeating(request: RequestCode, trigger_at: DateTime<Utc>, interval: Duration) -> Result<Registration> {
    if interval <= Duration::zero() {
        return Err(Error::Other(format!(
            "repeat interval must be positive, got {}s",
            interval.num_seconds()
        )));
    }
    Ok(Registration {
        request,
        trigger_at_millis: trigger_at.timestamp_millis(),
        interval_millis: Some(interval.num_milliseconds()),
        snooze_count: 0,
    })
}

fn one_shot(request: RequestCode, trigger_at: DateTime<Utc>, snooze_count: u32) -> Registration {
    Registration {
        request,
        trigger_at_millis: trigger_at.timestamp_millis(),
        interval_millis: None,
        snooze_count,
    }
}

fn denied() -> Error {
    Error::PermissionDenied("exact alarms are not allowed on this system".into())
}

/// Registrations stored in a JSON file, delivered by `psalmwake run`
#[derive(Clone, Debug)]
pub struct FilePlatform {
    path: PathBuf,
    exact_allowed: bool,
}

impl FilePlatform {
    pub fn new(path: impl Into<PathBuf>, exact_allowed: bool) -> Self {
        Self {
            path: path.into(),
            exact_allowed,
        }
    }

    fn load(&self) -> Result<RegistrationTable> {
        load_or_default(&self.path, "registration table")
    }

    /// Load, change and save the table under the update lock
    fn modify<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut RegistrationTable) -> R,
    {
        let path = &self.path;
        with_update_lock(path, || {
            let mut table: RegistrationTable = load_or_default(path, "registration table")?;
            let result = f(&mut table);
            save_atomic(&table, path)?;
            Ok(result)
        })
    }
}

impl AlarmPlatform for FilePlatform {
    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed
    }

    fn set_repeating(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        if !self.exact_allowed {
            return Err(denied());
        }
        let registration = repeating(request, trigger_at, interval)?;
        self.modify(|table| table.upsert(registration))?;
        tracing::debug!(
            "Registered repeating {:?} alarm (code {}) at {}",
            request,
            request.code(),
            trigger_at
        );
        Ok(())
    }

    fn set_exact(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        snooze_count: u32,
    ) -> Result<()> {
        if !self.exact_allowed {
            return Err(denied());
        }
        self.modify(|table| table.upsert(one_shot(request, trigger_at, snooze_count)))?;
        tracing::debug!(
            "Registered one-shot {:?} alarm (code {}) at {}",
            request,
            request.code(),
            trigger_at
        );
        Ok(())
    }

    fn cancel(&mut self, request: RequestCode) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.modify(|table| {
            if table.remove(request).is_some() {
                tracing::debug!("Withdrew {:?} alarm", request);
            }
        })
    }

    fn consume_due(
        &mut self,
        now: DateTime<Utc>,
        next: &dyn Fn(&Registration) -> i64,
    ) -> Result<Vec<Registration>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let path = &self.path;
        with_update_lock(path, || {
            let mut table: RegistrationTable = load_or_default(path, "registration table")?;
            let due = table.consume_due(now.timestamp_millis(), next);
            // Idle polls leave the file alone
            if !due.is_empty() {
                save_atomic(&table, path)?;
            }
            Ok(due)
        })
    }

    fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.load()?.registrations)
    }
}

/// In-process platform, mainly for tests and embedding
#[derive(Clone, Debug)]
pub struct MemoryPlatform {
    table: RegistrationTable,
    exact_allowed: bool,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            table: RegistrationTable::default(),
            exact_allowed: true,
        }
    }

    /// A platform that refuses exact alarms
    pub fn denying() -> Self {
        Self {
            table: RegistrationTable::default(),
            exact_allowed: false,
        }
    }

    pub fn set_exact_allowed(&mut self, allowed: bool) {
        self.exact_allowed = allowed;
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmPlatform for MemoryPlatform {
    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed
    }

    fn set_repeating(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        if !self.exact_allowed {
            return Err(denied());
        }
        self.table.upsert(repeating(request, trigger_at, interval)?);
        Ok(())
    }

    fn set_exact(
        &mut self,
        request: RequestCode,
        trigger_at: DateTime<Utc>,
        snooze_count: u32,
    ) -> Result<()> {
        if !self.exact_allowed {
            return Err(denied());
        }
        self.table.upsert(one_shot(request, trigger_at, snooze_count));
        Ok(())
    }

    fn cancel(&mut self, request: RequestCode) -> Result<()> {
        self.table.remove(request);
        Ok(())
    }

    fn consume_due(
        &mut self,
        now: DateTime<Utc>,
        next: &dyn Fn(&Registration) -> i64,
    ) -> Result<Vec<Registration>> {
        Ok(self.table.consume_due(now.timestamp_millis(), next))
    }

    fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.table.all().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_same_request_replaces() {
        let mut platform = MemoryPlatform::new();
        platform.set_exact(RequestCode::Snooze, at(7), 1).unwrap();
        platform.set_exact(RequestCode::Snooze, at(8), 2).unwrap();

        let regs = platform.registrations().unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].trigger_at_millis, at(8).timestamp_millis());
        assert_eq!(regs[0].snooze_count, 2);
    }

    #[test]
    fn test_distinct_requests_coexist_sorted() {
        let mut platform = MemoryPlatform::new();
        platform
            .set_repeating(RequestCode::Daily, at(9), Duration::hours(24))
            .unwrap();
        platform.set_exact(RequestCode::Snooze, at(7), 1).unwrap();

        let regs = platform.registrations().unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].request, RequestCode::Snooze);
        assert_eq!(regs[1].request, RequestCode::Daily);
        assert_eq!(regs[1].interval_millis, Some(86_400_000));
    }

    #[test]
    fn test_denied_platform_rejects() {
        let mut platform = MemoryPlatform::denying();
        let err = platform
            .set_repeating(RequestCode::Daily, at(7), Duration::hours(24))
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(platform.registrations().unwrap().is_empty());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut platform = MemoryPlatform::new();
        assert!(platform
            .set_repeating(RequestCode::Daily, at(7), Duration::zero())
            .is_err());
    }

    #[test]
    fn test_file_platform_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registrations.json");

        let mut platform = FilePlatform::new(&path, true);
        platform
            .set_repeating(RequestCode::Daily, at(6), Duration::hours(24))
            .unwrap();
        platform.set_exact(RequestCode::Snooze, at(5), 1).unwrap();

        let reopened = FilePlatform::new(&path, true);
        assert_eq!(reopened.registrations().unwrap().len(), 2);

        platform.cancel(RequestCode::Snooze).unwrap();
        platform.cancel(RequestCode::Snooze).unwrap();
        let regs = reopened.registrations().unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].request, RequestCode::Daily);
    }

    #[test]
    fn test_file_platform_cancel_without_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registrations.json");

        let mut platform = FilePlatform::new(&path, true);
        platform.cancel(RequestCode::Daily).unwrap();
        assert!(!path.exists());
    }

    fn one_day_later(reg: &Registration) -> i64 {
        reg.trigger_at_millis + 86_400_000
    }

    #[test]
    fn test_consume_due_rearms_and_withdraws() {
        let mut platform = MemoryPlatform::new();
        platform
            .set_repeating(RequestCode::Daily, at(6), Duration::hours(24))
            .unwrap();
        platform.set_exact(RequestCode::Snooze, at(7), 2).unwrap();

        assert!(platform.consume_due(at(5), &one_day_later).unwrap().is_empty());

        let due = platform.consume_due(at(7), &one_day_later).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].trigger_at_millis, at(6).timestamp_millis());
        assert_eq!(due[1].snooze_count, 2);

        let regs = platform.registrations().unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].request, RequestCode::Daily);
        assert_eq!(
            regs[0].trigger_at_millis,
            (at(6) + Duration::hours(24)).timestamp_millis()
        );
    }

    #[test]
    fn test_consume_due_after_cancel_does_not_rearm() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registrations.json");

        let mut daemon = FilePlatform::new(&path, true);
        let mut user = FilePlatform::new(&path, true);
        daemon
            .set_repeating(RequestCode::Daily, at(6), Duration::hours(24))
            .unwrap();

        user.cancel(RequestCode::Daily).unwrap();
        assert!(daemon.consume_due(at(7), &one_day_later).unwrap().is_empty());
        assert!(user.registrations().unwrap().is_empty());
    }

    #[test]
    fn test_file_platform_idle_poll_writes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registrations.json");

        let mut platform = FilePlatform::new(&path, true);
        assert!(platform.consume_due(at(7), &one_day_later).unwrap().is_empty());
        assert!(!path.exists());

        platform.set_exact(RequestCode::Snooze, at(9), 1).unwrap();
        let before = std::fs::read(&path).unwrap();
        assert!(platform.consume_due(at(8), &one_day_later).unwrap().is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_file_platform_denied_writes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registrations.json");

        let mut platform = FilePlatform::new(&path, false);
        assert!(platform.set_exact(RequestCode::Snooze, at(5), 1).is_err());
        assert!(!path.exists());
    }
}
