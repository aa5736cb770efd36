use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use psalm_core::config::LibraryConfig;
use psalm_core::playback::{player_from_config, SilentPlayer};
use psalm_core::scheduler::parse_alarm_time;
use psalm_core::wal::NullSink;
use psalm_core::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How often a ringing alarm checks that its recitation is still playing
const PLAYBACK_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "psalmwake")]
#[command(about = "Daily alarm clock that wakes you with a psalm", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the psalm of the day (default)
    Today {
        /// Show the psalm for another date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a psalm by number
    Show {
        number: u32,
    },

    /// Set the daily alarm (HH:MM, 24-hour local time)
    Set {
        time: String,
    },

    /// Cancel the alarm and any pending snooze
    Cancel,

    /// Snooze: ring again in a few minutes
    Snooze {
        /// Minutes until the alarm rings again
        #[arg(long)]
        minutes: Option<u32>,
    },

    /// Show the alarm state
    Status,

    /// Re-arm the alarm after a reboot
    Restore,

    /// Ring the alarm now
    Fire {
        #[command(flatten)]
        ring: RingArgs,
    },

    /// Wait for alarms and ring them
    Run {
        /// Process due alarms once and exit
        #[arg(long)]
        once: bool,

        #[command(flatten)]
        ring: RingArgs,
    },

    /// Show wake statistics
    Stats {
        /// Number of days to include (1 to 36500)
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..=36500))]
        days: i64,
    },

    /// Roll up the wake log to CSV
    Rollup {
        /// Clean up processed wake logs after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Args, Clone, Copy, Debug, Default)]
struct RingArgs {
    /// Stop the alarm immediately (for testing)
    #[arg(long, conflicts_with = "auto_snooze")]
    auto_stop: bool,

    /// Snooze the alarm immediately (for testing)
    #[arg(long, conflicts_with = "auto_stop")]
    auto_snooze: bool,

    /// Ring without playing audio
    #[arg(long)]
    no_audio: bool,

    /// Dry run - ring without recording wake events
    #[arg(long)]
    dry_run: bool,
}

/// Files under the data directory
struct Paths {
    alarm: PathBuf,
    registrations: PathBuf,
    wal_dir: PathBuf,
    wal: PathBuf,
    csv: PathBuf,
}

impl Paths {
    fn new(data_dir: &Path) -> Self {
        let wal_dir = data_dir.join("wal");
        Self {
            alarm: data_dir.join("alarm.json"),
            registrations: data_dir.join("registrations.json"),
            wal: wal_dir.join("wake_events.wal"),
            wal_dir,
            csv: data_dir.join("wake_history.csv"),
        }
    }
}

struct App {
    config: Config,
    data_dir: PathBuf,
    paths: Paths,
}

impl App {
    fn scheduler(&self) -> AlarmScheduler<FilePlatform> {
        let platform = FilePlatform::new(&self.paths.registrations, self.config.platform.exact_alarms);
        AlarmScheduler::new(platform, &self.paths.alarm)
            .with_max_snooze_count(self.config.alarm.max_snooze_count)
    }

    fn library(&self) -> PsalmLibrary {
        PsalmLibrary::load(&LibraryConfig {
            audio_dir: Some(self.config.audio_dir(&self.data_dir)),
            text_dir: self.config.library.text_dir.clone(),
            default_sound: self.config.library.default_sound.clone(),
        })
    }
}

fn main() -> Result<()> {
    // Initialize logging
    psalm_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let app = App {
        paths: Paths::new(&data_dir),
        config,
        data_dir,
    };

    match cli.command {
        Some(Commands::Today { date }) => cmd_today(&app, date),
        Some(Commands::Show { number }) => cmd_show(&app, number),
        Some(Commands::Set { time }) => cmd_set(&app, &time),
        Some(Commands::Cancel) => cmd_cancel(&app),
        Some(Commands::Snooze { minutes }) => cmd_snooze(&app, minutes),
        Some(Commands::Status) => cmd_status(&app),
        Some(Commands::Restore) => cmd_restore(&app),
        Some(Commands::Fire { ring }) => {
            let mut scheduler = app.scheduler();
            ring_alarm(&app, &mut scheduler, 0, ring)
        }
        Some(Commands::Run { once, ring }) => cmd_run(&app, once, ring),
        Some(Commands::Stats { days }) => cmd_stats(&app, days),
        Some(Commands::Rollup { cleanup }) => cmd_rollup(&app, cleanup),
        None => cmd_today(&app, None),
    }
}

fn cmd_today(app: &App, date: Option<NaiveDate>) -> Result<()> {
    let library = app.library();
    let selector = Selector::new(&library);
    let record = match date {
        Some(date) => selector.for_date(date),
        None => selector.today(&Local::now()),
    };

    display_psalm(record);
    Ok(())
}

fn cmd_show(app: &App, number: u32) -> Result<()> {
    let library = app.library();
    match library.lookup(number) {
        Some(record) => display_psalm(record),
        None => {
            println!("\nPsalm {} is not in the library.\n", number);
            println!("  {}", library.text(number));
            println!();
        }
    }
    Ok(())
}

fn cmd_set(app: &App, time: &str) -> Result<()> {
    let (hour, minute) = parse_alarm_time(time)?;
    let mut scheduler = app.scheduler();

    let trigger = match scheduler.schedule_daily(&Local::now(), hour, minute) {
        Ok(trigger) => trigger,
        Err(e @ Error::PermissionDenied(_)) => {
            eprintln!("Alarm not set: exact alarms are not allowed.");
            eprintln!("Set `exact_alarms = true` under [platform] in the config file.");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    println!("✓ Alarm set for {:02}:{:02}", hour, minute);
    println!("  Next ring: {}", format_local(&trigger));
    Ok(())
}

fn cmd_cancel(app: &App) -> Result<()> {
    app.scheduler().cancel()?;
    println!("✓ Alarm cancelled");
    Ok(())
}

fn cmd_snooze(app: &App, minutes: Option<u32>) -> Result<()> {
    let minutes = minutes.unwrap_or(app.config.alarm.snooze_minutes);
    let mut scheduler = app.scheduler();

    let chain = match scheduler.state()? {
        AlarmState::Snoozed { count, .. } => count,
        _ => 0,
    };

    let until = scheduler.schedule_snooze(&Local::now(), minutes, chain)?;
    println!("✓ Snoozed until {}", format_local(&until));
    Ok(())
}

fn cmd_status(app: &App) -> Result<()> {
    let scheduler = app.scheduler();
    let config = scheduler.config()?;

    let state = scheduler.state()?;

    println!();
    match state {
        AlarmState::Unset => println!("  Alarm: not set"),
        AlarmState::Scheduled { next } => {
            println!("  Alarm: set for {:02}:{:02}", config.hour, config.minute);
            println!("  Next ring: {}", format_local(&next));
        }
        AlarmState::Snoozed { until, count } => {
            println!(
                "  Alarm: snoozed until {} (snooze {} of {})",
                format_local(&until),
                count,
                app.config.alarm.max_snooze_count
            );
        }
    }

    if config.enabled && !matches!(state, AlarmState::Scheduled { .. }) {
        println!("  Daily alarm: {:02}:{:02}", config.hour, config.minute);
    }

    let library = app.library();
    let record = Selector::new(&library).today(&Local::now());
    println!("  Psalm of the day: {}", record.full_title());
    println!();
    Ok(())
}

fn cmd_restore(app: &App) -> Result<()> {
    match app.scheduler().restore_on_boot(&Local::now())? {
        Some(trigger) => println!("✓ Alarm restored, next ring: {}", format_local(&trigger)),
        None => println!("No alarm enabled - nothing to restore."),
    }
    Ok(())
}

fn cmd_run(app: &App, once: bool, ring: RingArgs) -> Result<()> {
    let mut scheduler = app.scheduler();
    let poll = Duration::from_secs(app.config.platform.poll_interval_secs);

    if let Some(next) = scheduler.next_pending()? {
        tracing::info!(
            "Waiting for {:?} alarm at {}",
            next.request,
            DateTime::from_timestamp_millis(next.trigger_at_millis)
                .map(|at| format_local(&at))
                .unwrap_or_default()
        );
    }

    loop {
        let fired = scheduler.take_due(&Local::now())?;

        // A snooze and the daily trigger falling due together ring once
        if let Some(snooze_count) = fired.iter().map(|f| f.snooze_count).max() {
            ring_alarm(app, &mut scheduler, snooze_count, ring)?;
        }

        if once {
            if fired.is_empty() {
                println!("No alarm due.");
            }
            return Ok(());
        }

        std::thread::sleep(poll);
    }
}

fn cmd_stats(app: &App, days: i64) -> Result<()> {
    let events = load_recent_events(&app.paths.wal, &app.paths.csv, days)?;
    let stats = WakeStats::from_events(&events);
    let library = app.library();

    println!("\nWake statistics (last {} days)", days);
    println!("  Alarms rung: {}", stats.total_fires);
    println!("  Different psalms: {}", stats.unique_psalms);
    if let Some((psalm, count)) = stats.most_selected {
        println!(
            "  Most heard: {} ({} times)",
            library.get(psalm).full_title(),
            count
        );
    }
    println!("  Snoozes: {}", stats.total_snoozes);
    println!("  Snoozes per alarm: {:.1}", stats.avg_snoozes_per_fire);
    println!();
    Ok(())
}

fn cmd_rollup(app: &App, cleanup: bool) -> Result<()> {
    if !app.paths.wal.exists() {
        println!("No wake log found - nothing to roll up.");
        return Ok(());
    }

    let count = psalm_core::csv_rollup::wal_to_csv_and_archive(&app.paths.wal, &app.paths.csv)?;

    println!("✓ Rolled up {} events to CSV", count);
    println!("  CSV: {}", app.paths.csv.display());

    if cleanup {
        let cleaned = psalm_core::csv_rollup::cleanup_processed_wals(&app.paths.wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed wake logs", cleaned);
        }
    }

    Ok(())
}

fn ring_alarm(
    app: &App,
    scheduler: &mut AlarmScheduler<FilePlatform>,
    snooze_count: u32,
    ring: RingArgs,
) -> Result<()> {
    let library = app.library();
    let mut player: Box<dyn AudioPlayer> = if ring.no_audio {
        Box::new(SilentPlayer)
    } else {
        player_from_config(&app.config.player)
    };
    let mut sink: Box<dyn EventSink> = if ring.dry_run {
        Box::new(NullSink)
    } else {
        Box::new(JsonlSink::new(&app.paths.wal))
    };

    let mut session = AlarmSession::start(
        &library,
        player.as_mut(),
        sink.as_mut(),
        &Local::now(),
        snooze_count,
    );

    display_psalm(session.psalm());
    report_outcome(session.outcome());

    let attended = !(ring.auto_stop || ring.auto_snooze);
    if attended && matches!(session.outcome(), PlaybackOutcome::Recitation(_)) {
        // Players may accept a file and fail to decode it a moment later
        std::thread::sleep(PLAYBACK_CHECK_INTERVAL);
        check_playback(&mut session);
    }

    loop {
        let action = if ring.auto_stop {
            RingAction::Stop
        } else if ring.auto_snooze {
            RingAction::Snooze
        } else {
            check_playback(&mut session);
            prompt_ring_action()?
        };

        match action {
            RingAction::Unattended => {
                let minutes = app.config.alarm.ring_minutes;
                tracing::info!("No terminal input, ringing for {} minutes", minutes);
                let deadline = Instant::now() + Duration::from_secs(minutes as u64 * 60);
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    std::thread::sleep(remaining.min(PLAYBACK_CHECK_INTERVAL));
                    check_playback(&mut session);
                }
                session.stop(Utc::now());
                println!("\n✓ Alarm stopped after {} minutes", minutes);
                break;
            }
            RingAction::Stop => {
                session.stop(Utc::now());
                println!("\n✓ Alarm stopped");
                break;
            }
            RingAction::Snooze => {
                match session.snooze(scheduler, &Local::now(), app.config.alarm.snooze_minutes) {
                    Ok(until) => {
                        println!("\n✓ Snoozed until {}", format_local(&until));
                        break;
                    }
                    Err(e) => {
                        eprintln!("Cannot snooze: {}", e);
                        if ring.auto_snooze {
                            session.stop(Utc::now());
                            println!("\n✓ Alarm stopped");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn report_outcome(outcome: &PlaybackOutcome) {
    match outcome {
        PlaybackOutcome::Recitation(_) => {}
        PlaybackOutcome::DefaultSound(_) => println!("  (recitation unavailable, playing default sound)"),
        PlaybackOutcome::Silent => println!("  (no audio available)"),
    }
}

/// Fall back to the default sound if the recitation has died
fn check_playback(session: &mut AlarmSession<'_>) {
    let before = session.outcome().clone();
    let after = session.ensure_playing();
    if *after != before {
        report_outcome(after);
    }
}

fn display_psalm(record: &PsalmRecord) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", record.full_title());
    println!("╰─────────────────────────────────────────╯");
    println!();
    for line in record.text.lines() {
        println!("  {}", line);
    }
    println!();
}

fn format_local<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    at.with_timezone(&Local).format("%a %Y-%m-%d %H:%M").to_string()
}

enum RingAction {
    Stop,
    Snooze,
    /// Standard input is closed, as under a service manager
    Unattended,
}

fn prompt_ring_action() -> Result<RingAction> {
    println!("─────────────────────────────────────────");
    println!("Press Enter to stop");
    println!("  'z' + Enter to snooze");
    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(RingAction::Unattended);
    }

    let action = match input.trim().to_lowercase().as_str() {
        "z" => RingAction::Snooze,
        _ => RingAction::Stop,
    };

    Ok(action)
}
