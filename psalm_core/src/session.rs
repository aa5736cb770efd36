//! A single ringing alarm.
//!
//! An [`AlarmSession`] starts when a trigger fires: it picks the psalm of the
//! day, starts its recitation (or the default sound) and records a `Fired`
//! event. It ends with either [`AlarmSession::stop`] or
//! [`AlarmSession::snooze`]. Dropping an unfinished session silences the
//! player without recording anything.

use crate::platform::AlarmPlatform;
use crate::playback::{play_default, play_with_fallback, AudioPlayer, PlaybackOutcome};
use crate::scheduler::AlarmScheduler;
use crate::selector::Selector;
use crate::wal::EventSink;
use crate::library::PsalmLibrary;
use crate::{Error, PsalmRecord, Result, WakeEvent, WakeEventKind};
use chrono::{DateTime, TimeZone, Utc};

pub struct AlarmSession<'a> {
    library: &'a PsalmLibrary,
    record: &'a PsalmRecord,
    player: &'a mut dyn AudioPlayer,
    sink: &'a mut dyn EventSink,
    outcome: PlaybackOutcome,
    snooze_count: u32,
    finished: bool,
}

impl<'a> AlarmSession<'a> {
    /// Start ringing for the local day of `now`
    ///
    /// `snooze_count` is the number of snoozes already taken in this chain.
    pub fn start<Tz: TimeZone>(
        library: &'a PsalmLibrary,
        player: &'a mut dyn AudioPlayer,
        sink: &'a mut dyn EventSink,
        now: &DateTime<Tz>,
        snooze_count: u32,
    ) -> Self {
        let record = Selector::new(library).today(now);
        let outcome = play_with_fallback(player, library, &record.audio);

        tracing::info!("Alarm ringing with {} ({:?})", record.full_title(), outcome);

        let mut session = Self {
            library,
            record,
            player,
            sink,
            outcome,
            snooze_count,
            finished: false,
        };
        session.record_event(WakeEventKind::Fired, now.with_timezone(&Utc), snooze_count);
        session
    }

    pub fn psalm(&self) -> &'a PsalmRecord {
        self.record
    }

    pub fn outcome(&self) -> &PlaybackOutcome {
        &self.outcome
    }

    pub fn snooze_count(&self) -> u32 {
        self.snooze_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Switch to the default sound if the recitation has ended by itself
    ///
    /// Call periodically while ringing. Players can accept a file and fail
    /// to decode it later, which would otherwise leave the alarm mute.
    pub fn ensure_playing(&mut self) -> &PlaybackOutcome {
        if !self.finished
            && matches!(self.outcome, PlaybackOutcome::Recitation(_))
            && !self.player.is_playing()
        {
            tracing::warn!(
                "Recitation of {} ended early, switching to default sound",
                self.record.full_title()
            );
            self.outcome = play_default(&mut *self.player, self.library);
        }
        &self.outcome
    }

    /// Silence the alarm; only the first call records a `Stopped` event
    pub fn stop(&mut self, at: DateTime<Utc>) {
        if self.finished {
            tracing::debug!("Alarm already stopped");
            return;
        }
        self.player.stop();
        self.finished = true;
        self.record_event(WakeEventKind::Stopped, at, self.snooze_count);
        tracing::info!("Alarm stopped");
    }

    /// Arm a snooze and silence the alarm
    ///
    /// If the snooze cannot be armed the alarm keeps ringing and the error
    /// is returned.
    pub fn snooze<P, Tz>(
        &mut self,
        scheduler: &mut AlarmScheduler<P>,
        now: &DateTime<Tz>,
        minutes: u32,
    ) -> Result<DateTime<Tz>>
    where
        P: AlarmPlatform,
        Tz: TimeZone,
    {
        if self.finished {
            return Err(Error::State("alarm is no longer ringing".into()));
        }

        let until = scheduler.schedule_snooze(now, minutes, self.snooze_count)?;

        self.player.stop();
        self.finished = true;
        self.record_event(WakeEventKind::Snoozed, now.with_timezone(&Utc), self.snooze_count + 1);
        Ok(until)
    }

    fn record_event(&mut self, kind: WakeEventKind, at: DateTime<Utc>, snooze_count: u32) {
        let event = WakeEvent::new(kind, self.record.id, at, snooze_count);
        if let Err(e) = self.sink.append(&event) {
            tracing::warn!("Failed to record {} event: {}", kind.as_str(), e);
        }
    }
}

impl Drop for AlarmSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.player.stop();
        }
    }
}
