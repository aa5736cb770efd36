//! Alarm scheduling policy.
//!
//! The scheduler owns the persisted [`AlarmConfig`] and drives an
//! [`AlarmPlatform`]:
//! - `schedule_daily` arms a trigger that repeats every 24 hours
//! - `schedule_snooze` arms a one-shot trigger without touching the config
//! - `cancel` withdraws everything and clears the enabled flag
//! - `restore_on_boot` re-arms from the persisted config
//! - `take_due` consumes triggers whose time has come
//!
//! Only `schedule_daily` and `cancel` write the config. Re-arming at boot
//! and delivery touch the platform alone.
//!
//! The daily registration carries a 24 hour interval, but each delivery
//! re-derives the next trigger from the configured local time, so the alarm
//! keeps to the wall clock across DST changes.
//!
//! Exact-alarm permission is checked before anything is written, so a
//! denied request leaves both the config and the platform untouched.

use crate::platform::AlarmPlatform;
use crate::{AlarmConfig, AlarmState, Error, Registration, RequestCode, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

pub const MIN_SNOOZE_MINUTES: u32 = 1;
pub const MAX_SNOOZE_MINUTES: u32 = 60;
pub const DEFAULT_MAX_SNOOZE_COUNT: u32 = 10;

/// Minimum spacing between two deliveries of the daily alarm
const MIN_DAILY_GAP_MILLIS: i64 = 12 * 60 * 60 * 1000;

/// Interval between daily triggers
pub fn daily_interval() -> Duration {
    Duration::hours(24)
}

/// Next instant at `hour:minute` local time strictly after `now`
///
/// Today's occurrence is used if it is still ahead, otherwise tomorrow's.
/// Ambiguous local times resolve to the earlier instant; times skipped by
/// a DST change resolve to the first valid instant after the gap.
pub fn compute_next_trigger<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Tz>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| Error::InvalidTime(format!("{:02}:{:02}", hour, minute)))?;

    let tz = now.timezone();
    let mut date = now.date_naive();

    // At most two iterations outside of pathological offsets
    for _ in 0..3 {
        let candidate = resolve_local(&tz, date.and_time(time));
        if candidate > *now {
            return Ok(candidate);
        }
        date = date
            .succ_opt()
            .ok_or_else(|| Error::InvalidTime("date out of range".into()))?;
    }

    Err(Error::InvalidTime(format!(
        "no future occurrence of {:02}:{:02} after {}",
        hour,
        minute,
        now.naive_local()
    )))
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut shifted = naive;
            for _ in 0..(24 * 60) {
                shifted += Duration::minutes(1);
                if let Some(t) = tz.from_local_datetime(&shifted).earliest() {
                    return t;
                }
            }
            tz.from_utc_datetime(&naive)
        }
    }
}

/// Parse `HH:MM` into hour and minute
pub fn parse_alarm_time(s: &str) -> Result<(u32, u32)> {
    let time = NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| Error::InvalidTime(format!("'{}' does not match HH:MM", s)))?;
    Ok((chrono::Timelike::hour(&time), chrono::Timelike::minute(&time)))
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A trigger consumed by [`AlarmScheduler::take_due`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiredAlarm {
    pub request: RequestCode,
    pub scheduled_for: DateTime<Utc>,
    /// Snoozes already taken in this chain
    pub snooze_count: u32,
}

/// Daily alarm scheduler bound to a platform and a config file
pub struct AlarmScheduler<P: AlarmPlatform> {
    platform: P,
    config_path: PathBuf,
    max_snooze_count: u32,
}

impl<P: AlarmPlatform> AlarmScheduler<P> {
    pub fn new(platform: P, config_path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            config_path: config_path.into(),
            max_snooze_count: DEFAULT_MAX_SNOOZE_COUNT,
        }
    }

    pub fn with_max_snooze_count(mut self, max: u32) -> Self {
        self.max_snooze_count = max;
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Persisted alarm config
    pub fn config(&self) -> Result<AlarmConfig> {
        AlarmConfig::load(&self.config_path)
    }

    fn ensure_permission(&self) -> Result<()> {
        if self.platform.can_schedule_exact() {
            Ok(())
        } else {
            tracing::warn!("Exact alarm permission denied");
            Err(Error::PermissionDenied(
                "exact alarms are not allowed; enable them and try again".into(),
            ))
        }
    }

    /// Arm the daily alarm and persist it as enabled
    ///
    /// Returns the first trigger. On failure neither the config nor the
    /// platform registration changes.
    pub fn schedule_daily<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
        hour: u32,
        minute: u32,
    ) -> Result<DateTime<Tz>> {
        let previous = self
            .platform
            .registrations()?
            .into_iter()
            .find(|r| r.request == RequestCode::Daily);

        let trigger = self.arm_daily(now, hour, minute)?;

        let persisted = AlarmConfig::update(&self.config_path, |config| {
            config.enabled = true;
            config.hour = hour;
            config.minute = minute;
            config.last_trigger_millis = trigger.timestamp_millis();
            Ok(())
        });

        if let Err(e) = persisted {
            tracing::error!("Failed to persist alarm config: {}", e);
            self.rollback_daily(previous);
            return Err(e);
        }

        tracing::info!(
            "Daily alarm set for {:02}:{:02}, next at {}",
            hour,
            minute,
            trigger.naive_local()
        );
        Ok(trigger)
    }

    /// Register the daily trigger without touching the config
    fn arm_daily<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
        hour: u32,
        minute: u32,
    ) -> Result<DateTime<Tz>> {
        let trigger = compute_next_trigger(now, hour, minute)?;
        self.ensure_permission()?;
        self.platform
            .set_repeating(RequestCode::Daily, trigger.with_timezone(&Utc), daily_interval())?;
        Ok(trigger)
    }

    fn rollback_daily(&mut self, previous: Option<Registration>) {
        let restored = match previous {
            Some(reg) => match reg.interval_millis {
                Some(interval) => self.platform.set_repeating(
                    RequestCode::Daily,
                    millis_to_utc(reg.trigger_at_millis),
                    Duration::milliseconds(interval),
                ),
                None => self.platform.set_exact(
                    RequestCode::Daily,
                    millis_to_utc(reg.trigger_at_millis),
                    reg.snooze_count,
                ),
            },
            None => self.platform.cancel(RequestCode::Daily),
        };
        if let Err(e) = restored {
            tracing::error!("Failed to roll back daily alarm registration: {}", e);
        }
    }

    /// Arm a one-shot snooze `minutes` from now
    ///
    /// `chain` is the number of snoozes already taken for the current ring.
    /// The persisted daily config is left alone.
    pub fn schedule_snooze<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
        minutes: u32,
        chain: u32,
    ) -> Result<DateTime<Tz>> {
        if !(MIN_SNOOZE_MINUTES..=MAX_SNOOZE_MINUTES).contains(&minutes) {
            return Err(Error::Snooze(format!(
                "snooze must be between {} and {} minutes, got {}",
                MIN_SNOOZE_MINUTES, MAX_SNOOZE_MINUTES, minutes
            )));
        }
        if chain >= self.max_snooze_count {
            return Err(Error::Snooze(format!(
                "snooze limit of {} reached",
                self.max_snooze_count
            )));
        }
        self.ensure_permission()?;

        let trigger = now.clone() + Duration::minutes(minutes as i64);
        self.platform
            .set_exact(RequestCode::Snooze, trigger.with_timezone(&Utc), chain + 1)?;

        tracing::info!(
            "Snoozed for {} minutes (snooze {} of {}), ringing at {}",
            minutes,
            chain + 1,
            self.max_snooze_count,
            trigger.naive_local()
        );
        Ok(trigger)
    }

    /// Withdraw all registrations and mark the alarm disabled
    ///
    /// Safe to call repeatedly.
    pub fn cancel(&mut self) -> Result<()> {
        self.platform.cancel(RequestCode::Daily)?;
        self.platform.cancel(RequestCode::Snooze)?;

        let config = self.config()?;
        if config.enabled {
            AlarmConfig::update(&self.config_path, |config| {
                config.enabled = false;
                Ok(())
            })?;
            tracing::info!("Alarm cancelled");
        } else {
            tracing::debug!("Alarm already cancelled");
        }
        Ok(())
    }

    /// Re-arm the daily alarm from the persisted config
    ///
    /// Returns the new trigger, or `None` when no alarm is enabled. Snoozes
    /// whose time passed while the machine was off are dropped. The config
    /// itself is only read.
    pub fn restore_on_boot<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
    ) -> Result<Option<DateTime<Tz>>> {
        let now_millis = now.timestamp_millis();
        let stale_snooze = self
            .platform
            .registrations()?
            .iter()
            .any(|r| r.request == RequestCode::Snooze && r.trigger_at_millis <= now_millis);
        if stale_snooze {
            tracing::info!("Dropping snooze that expired while offline");
            self.platform.cancel(RequestCode::Snooze)?;
        }

        let config = self.config()?;
        if !config.enabled {
            tracing::info!("No alarm enabled, nothing to restore");
            return Ok(None);
        }

        let trigger = self.arm_daily(now, config.hour, config.minute)?;
        tracing::info!(
            "Restored daily alarm for {:02}:{:02}, next at {}",
            config.hour,
            config.minute,
            trigger.naive_local()
        );
        Ok(Some(trigger))
    }

    /// Earliest live registration
    pub fn next_pending(&self) -> Result<Option<Registration>> {
        Ok(self
            .platform
            .registrations()?
            .into_iter()
            .min_by_key(|r| r.trigger_at_millis))
    }

    /// Current state derived from the live registrations
    pub fn state(&self) -> Result<AlarmState> {
        let registrations = self.platform.registrations()?;

        if let Some(snooze) = registrations
            .iter()
            .find(|r| r.request == RequestCode::Snooze)
        {
            return Ok(AlarmState::Snoozed {
                until: millis_to_utc(snooze.trigger_at_millis),
                count: snooze.snooze_count,
            });
        }

        if let Some(daily) = registrations
            .iter()
            .find(|r| r.request == RequestCode::Daily)
        {
            return Ok(AlarmState::Scheduled {
                next: millis_to_utc(daily.trigger_at_millis),
            });
        }

        Ok(AlarmState::Unset)
    }

    /// Consume every registration due at `now`
    ///
    /// One-shot registrations are withdrawn. The daily registration moves to
    /// the next occurrence of the configured local time; other recurring
    /// ones move forward by whole intervals. Either way a machine that slept
    /// through several days rings once, not once per day. The config is not
    /// written.
    pub fn take_due<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Result<Vec<FiredAlarm>> {
        let now_millis = now.timestamp_millis();
        let tz = now.timezone();
        let config = self.config()?;
        let daily_time = config.enabled.then_some((config.hour, config.minute));

        let next = |reg: &Registration| {
            if let (RequestCode::Daily, Some((hour, minute))) = (reg.request, daily_time) {
                // A slot moved early by DST must not ring twice in one morning
                let floor = reg.trigger_at_millis + MIN_DAILY_GAP_MILLIS;
                let base = millis_to_utc(floor.max(now_millis)).with_timezone(&tz);
                match compute_next_trigger(&base, hour, minute) {
                    Ok(t) => return t.timestamp_millis(),
                    Err(e) => tracing::warn!("Cannot derive next daily trigger: {}", e),
                }
            }
            advance_by_interval(reg, now_millis)
        };
        let due = self
            .platform
            .consume_due(now.with_timezone(&Utc), &next)?;

        let mut fired = Vec::with_capacity(due.len());
        for reg in due {
            if let Some(interval) = reg.interval_millis.filter(|i| *i > 0) {
                let missed = (now_millis - reg.trigger_at_millis) / interval;
                if missed > 0 {
                    tracing::warn!(
                        "Missed {} {:?} trigger(s), ringing once",
                        missed,
                        reg.request
                    );
                }
            }

            tracing::info!(
                "{:?} alarm due (scheduled for {})",
                reg.request,
                millis_to_utc(reg.trigger_at_millis)
            );
            fired.push(FiredAlarm {
                request: reg.request,
                scheduled_for: millis_to_utc(reg.trigger_at_millis),
                snooze_count: reg.snooze_count,
            });
        }

        Ok(fired)
    }
}

/// First slot of a recurring registration strictly after `now_millis`
fn advance_by_interval(reg: &Registration, now_millis: i64) -> i64 {
    match reg.interval_millis {
        Some(interval) if interval > 0 => {
            let behind = (now_millis - reg.trigger_at_millis).max(0) / interval + 1;
            reg.trigger_at_millis + behind * interval
        }
        _ => reg.trigger_at_millis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FilePlatform, MemoryPlatform};
    use chrono::{FixedOffset, Timelike};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn local(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2025, 3, day, hour, minute, second).unwrap()
    }

    fn scheduler(dir: &tempfile::TempDir) -> AlarmScheduler<MemoryPlatform> {
        AlarmScheduler::new(MemoryPlatform::new(), dir.path().join("alarm.json"))
    }

    #[test]
    fn test_next_trigger_later_today() {
        let now = local(10, 6, 0, 0);
        let next = compute_next_trigger(&now, 7, 30).unwrap();
        assert_eq!(next, local(10, 7, 30, 0));
    }

    #[test]
    fn test_next_trigger_passed_goes_to_tomorrow() {
        let now = local(10, 8, 0, 0);
        let next = compute_next_trigger(&now, 7, 30).unwrap();
        assert_eq!(next, local(11, 7, 30, 0));
    }

    #[test]
    fn test_next_trigger_equal_instant_goes_to_tomorrow() {
        let now = local(10, 7, 30, 0);
        let next = compute_next_trigger(&now, 7, 30).unwrap();
        assert_eq!(next, local(11, 7, 30, 0));
    }

    #[test]
    fn test_next_trigger_zeroes_seconds() {
        let now = local(10, 7, 29, 59);
        let next = compute_next_trigger(&now, 7, 30).unwrap();
        assert_eq!(next.second(), 0);
        assert_eq!(next.nanosecond(), 0);
        assert_eq!(next, local(10, 7, 30, 0));
    }

    #[test]
    fn test_next_trigger_always_after_now() {
        for hour in [0, 5, 12, 23] {
            for minute in [0, 1, 30, 59] {
                for (h, m) in [(0, 0), (7, 30), (23, 59)] {
                    let now = local(15, h, m, 30);
                    let next = compute_next_trigger(&now, hour, minute).unwrap();
                    assert!(next > now);
                    assert!(next - now <= Duration::hours(24));
                }
            }
        }
    }

    #[test]
    fn test_next_trigger_crosses_month_end() {
        let now = tz().with_ymd_and_hms(2025, 3, 31, 22, 0, 0).unwrap();
        let next = compute_next_trigger(&now, 6, 0).unwrap();
        assert_eq!(next, tz().with_ymd_and_hms(2025, 4, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_time_rejected() {
        let now = local(10, 6, 0, 0);
        assert!(matches!(
            compute_next_trigger(&now, 24, 0),
            Err(Error::InvalidTime(_))
        ));
        assert!(compute_next_trigger(&now, 7, 60).is_err());
    }

    #[test]
    fn test_parse_alarm_time() {
        assert_eq!(parse_alarm_time("07:05").unwrap(), (7, 5));
        assert_eq!(parse_alarm_time(" 23:59 ").unwrap(), (23, 59));
        assert!(parse_alarm_time("24:00").is_err());
        assert!(parse_alarm_time("seven").is_err());
    }

    #[test]
    fn test_schedule_daily_persists_and_registers() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        let now = local(10, 6, 0, 0);

        let trigger = scheduler.schedule_daily(&now, 7, 0).unwrap();
        assert_eq!(trigger, local(10, 7, 0, 0));

        let config = scheduler.config().unwrap();
        assert!(config.enabled);
        assert_eq!((config.hour, config.minute), (7, 0));
        assert_eq!(config.last_trigger_millis, trigger.timestamp_millis());

        let regs = scheduler.platform().registrations().unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].request, RequestCode::Daily);
        assert_eq!(regs[0].interval_millis, Some(86_400_000));
        assert_eq!(
            scheduler.state().unwrap(),
            AlarmState::Scheduled {
                next: trigger.with_timezone(&Utc)
            }
        );
    }

    #[test]
    fn test_permission_denied_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("alarm.json");
        let mut scheduler = AlarmScheduler::new(MemoryPlatform::denying(), &config_path);

        let err = scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!config_path.exists());
        assert!(!scheduler.config().unwrap().enabled);
        assert!(scheduler.next_pending().unwrap().is_none());
        assert_eq!(scheduler.state().unwrap(), AlarmState::Unset);
    }

    #[test]
    fn test_permission_denied_keeps_existing_alarm() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        let now = local(10, 6, 0, 0);
        scheduler.schedule_daily(&now, 7, 0).unwrap();
        let before = scheduler.config().unwrap();

        scheduler.platform.set_exact_allowed(false);
        assert!(scheduler.schedule_daily(&now, 8, 0).is_err());

        assert_eq!(scheduler.config().unwrap(), before);
        let regs = scheduler.platform().registrations().unwrap();
        assert_eq!(regs[0].trigger_at_millis, local(10, 7, 0, 0).timestamp_millis());
    }

    #[test]
    fn test_failed_persist_rolls_back_registration() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the config file should be makes the rename fail
        let config_path = dir.path().join("alarm.json");
        std::fs::create_dir_all(config_path.join("blocker")).unwrap();
        let mut scheduler = AlarmScheduler::new(MemoryPlatform::new(), &config_path);

        assert!(scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).is_err());
        assert!(scheduler.next_pending().unwrap().is_none());
    }

    #[test]
    fn test_cancel_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        let now = local(10, 6, 0, 0);
        scheduler.schedule_daily(&now, 7, 0).unwrap();
        scheduler.schedule_snooze(&now, 5, 0).unwrap();

        scheduler.cancel().unwrap();

        assert!(scheduler.next_pending().unwrap().is_none());
        assert_eq!(scheduler.state().unwrap(), AlarmState::Unset);
        let config = scheduler.config().unwrap();
        assert!(!config.enabled);
        assert_eq!((config.hour, config.minute), (7, 0));

        // Idempotent
        scheduler.cancel().unwrap();
        assert!(scheduler.next_pending().unwrap().is_none());
    }

    #[test]
    fn test_snooze_leaves_daily_config_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        let now = local(10, 7, 0, 0);
        scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();
        let before = scheduler.config().unwrap();

        let until = scheduler.schedule_snooze(&now, 5, 0).unwrap();
        assert_eq!(until, local(10, 7, 5, 0));
        assert_eq!(scheduler.config().unwrap(), before);
        assert_eq!(
            scheduler.state().unwrap(),
            AlarmState::Snoozed {
                until: until.with_timezone(&Utc),
                count: 1
            }
        );
    }

    #[test]
    fn test_snooze_bounds_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir).with_max_snooze_count(2);
        let now = local(10, 7, 0, 0);

        assert!(matches!(
            scheduler.schedule_snooze(&now, 0, 0),
            Err(Error::Snooze(_))
        ));
        assert!(scheduler.schedule_snooze(&now, 61, 0).is_err());
        assert!(scheduler.schedule_snooze(&now, 5, 1).is_ok());
        assert!(matches!(
            scheduler.schedule_snooze(&now, 5, 2),
            Err(Error::Snooze(_))
        ));
    }

    #[test]
    fn test_snooze_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = AlarmScheduler::new(MemoryPlatform::denying(), dir.path().join("a.json"));
        let err = scheduler
            .schedule_snooze(&local(10, 7, 0, 0), 5, 0)
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_restore_on_boot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("alarm.json");
        AlarmConfig {
            enabled: true,
            hour: 6,
            minute: 30,
            last_trigger_millis: 0,
        }
        .save(&config_path)
        .unwrap();

        // Fresh platform, as after a reboot
        let mut scheduler = AlarmScheduler::new(MemoryPlatform::new(), &config_path);
        assert_eq!(scheduler.state().unwrap(), AlarmState::Unset);

        let now = local(12, 22, 0, 0);
        let trigger = scheduler.restore_on_boot(&now).unwrap().unwrap();
        assert_eq!(trigger, local(13, 6, 30, 0));
        assert!(matches!(
            scheduler.state().unwrap(),
            AlarmState::Scheduled { .. }
        ));
    }

    #[test]
    fn test_restore_on_boot_disabled_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        assert!(scheduler.restore_on_boot(&local(12, 22, 0, 0)).unwrap().is_none());
        assert!(scheduler.next_pending().unwrap().is_none());
    }

    #[test]
    fn test_restore_drops_expired_snooze() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_snooze(&local(10, 7, 0, 0), 5, 0).unwrap();

        scheduler.restore_on_boot(&local(10, 9, 0, 0)).unwrap();
        assert!(scheduler.next_pending().unwrap().is_none());
    }

    #[test]
    fn test_take_due_advances_daily() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();

        assert!(scheduler.take_due(&local(10, 6, 59, 59)).unwrap().is_empty());

        let fired = scheduler.take_due(&local(10, 7, 0, 5)).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].request, RequestCode::Daily);
        assert_eq!(fired[0].scheduled_for, local(10, 7, 0, 0).with_timezone(&Utc));

        let next = scheduler.next_pending().unwrap().unwrap();
        assert_eq!(next.trigger_at_millis, local(11, 7, 0, 0).timestamp_millis());

        // Already consumed
        assert!(scheduler.take_due(&local(10, 7, 0, 6)).unwrap().is_empty());
    }

    #[test]
    fn test_take_due_leaves_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();
        let before = std::fs::read(scheduler.config_path()).unwrap();

        assert_eq!(scheduler.take_due(&local(10, 7, 0, 5)).unwrap().len(), 1);
        assert_eq!(scheduler.take_due(&local(12, 9, 0, 0)).unwrap().len(), 1);

        assert_eq!(std::fs::read(scheduler.config_path()).unwrap(), before);
    }

    #[test]
    fn test_restore_on_boot_leaves_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("alarm.json");
        AlarmConfig {
            enabled: true,
            hour: 6,
            minute: 30,
            last_trigger_millis: 1_000,
        }
        .save(&config_path)
        .unwrap();
        let before = std::fs::read(&config_path).unwrap();

        let mut scheduler = AlarmScheduler::new(MemoryPlatform::new(), &config_path);
        scheduler.restore_on_boot(&local(12, 22, 0, 0)).unwrap();
        scheduler.restore_on_boot(&local(14, 3, 0, 0)).unwrap();

        assert_eq!(std::fs::read(&config_path).unwrap(), before);
        assert!(scheduler.next_pending().unwrap().is_some());
    }

    #[test]
    fn test_take_due_realigns_daily_to_local_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_daily(&local(10, 5, 0, 0), 7, 0).unwrap();

        // Registration one hour early on the wall clock, as after a DST change
        scheduler
            .platform
            .set_repeating(
                RequestCode::Daily,
                local(11, 6, 0, 0).with_timezone(&Utc),
                daily_interval(),
            )
            .unwrap();

        let fired = scheduler.take_due(&local(11, 6, 0, 1)).unwrap();
        assert_eq!(fired.len(), 1);
        // Back on 07:00, without a second ring at 07:00 the same morning
        let next = scheduler.next_pending().unwrap().unwrap();
        assert_eq!(next.trigger_at_millis, local(12, 7, 0, 0).timestamp_millis());
        assert_eq!(next.interval_millis, Some(86_400_000));
    }

    #[test]
    fn test_take_due_without_config_advances_by_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler
            .platform
            .set_repeating(
                RequestCode::Daily,
                local(10, 6, 0, 0).with_timezone(&Utc),
                daily_interval(),
            )
            .unwrap();

        scheduler.take_due(&local(12, 9, 0, 0)).unwrap();
        let next = scheduler.next_pending().unwrap().unwrap();
        assert_eq!(next.trigger_at_millis, local(13, 6, 0, 0).timestamp_millis());
    }

    #[test]
    fn test_cancel_racing_take_due_stays_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("alarm.json");
        let registrations_path = dir.path().join("registrations.json");
        let open = || {
            AlarmScheduler::new(FilePlatform::new(&registrations_path, true), &config_path)
        };
        let due = local(10, 7, 0, 5);

        for _ in 0..50 {
            open().schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();

            std::thread::scope(|s| {
                s.spawn(|| open().take_due(&due).unwrap());
                s.spawn(|| open().cancel().unwrap());
            });

            let scheduler = open();
            assert!(!scheduler.config().unwrap().enabled);
            assert!(scheduler.next_pending().unwrap().is_none());
        }
    }

    #[test]
    fn test_take_due_after_missed_days_rings_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();

        let fired = scheduler.take_due(&local(13, 8, 0, 0)).unwrap();
        assert_eq!(fired.len(), 1);
        let next = scheduler.next_pending().unwrap().unwrap();
        assert_eq!(next.trigger_at_millis, local(14, 7, 0, 0).timestamp_millis());
    }

    #[test]
    fn test_snooze_then_fire_returns_to_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_daily(&local(10, 6, 0, 0), 7, 0).unwrap();
        scheduler.take_due(&local(10, 7, 0, 0)).unwrap();
        scheduler.schedule_snooze(&local(10, 7, 0, 30), 5, 0).unwrap();

        let fired = scheduler.take_due(&local(10, 7, 6, 0)).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].request, RequestCode::Snooze);
        assert_eq!(fired[0].snooze_count, 1);
        assert!(matches!(
            scheduler.state().unwrap(),
            AlarmState::Scheduled { .. }
        ));
    }

    #[test]
    fn test_snooze_without_daily_fires_to_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(&dir);
        scheduler.schedule_snooze(&local(10, 7, 0, 0), 5, 0).unwrap();

        scheduler.take_due(&local(10, 7, 5, 0)).unwrap();
        assert_eq!(scheduler.state().unwrap(), AlarmState::Unset);
    }
}
