//! Configuration file support for Psalmwake.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/psalmwake/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub alarm: AlarmSettings,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Snooze behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlarmSettings {
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,

    #[serde(default = "default_max_snooze_count")]
    pub max_snooze_count: u32,

    /// How long an unattended alarm rings before it stops by itself
    #[serde(default = "default_ring_minutes")]
    pub ring_minutes: u32,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            snooze_minutes: default_snooze_minutes(),
            max_snooze_count: default_max_snooze_count(),
            ring_minutes: default_ring_minutes(),
        }
    }
}

/// Where psalm recitations and text overrides live
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LibraryConfig {
    /// Directory holding `psalm_001.mp3` .. `psalm_150.mp3`
    #[serde(default)]
    pub audio_dir: Option<PathBuf>,

    /// Directory holding `psalm_001.txt` .. `psalm_150.txt`
    #[serde(default)]
    pub text_dir: Option<PathBuf>,

    /// Sound played when a recitation is missing or fails to play
    #[serde(default)]
    pub default_sound: Option<PathBuf>,
}

/// External audio player invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Program to run; the audio file path is appended to `args`.
    /// Empty disables playback.
    #[serde(default = "default_player_command")]
    pub command: String,

    #[serde(default = "default_player_args")]
    pub args: Vec<String>,

    /// Alarm volume from 0.0 to 1.0
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Argument carrying the volume; `{percent}` is replaced by 0..=100.
    /// Empty leaves the volume to the player.
    #[serde(default = "default_volume_arg")]
    pub volume_arg: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: default_player_args(),
            volume: default_volume(),
            volume_arg: default_volume_arg(),
        }
    }
}

impl PlayerConfig {
    /// Arguments passed to the player ahead of the audio path
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if !self.volume_arg.trim().is_empty() {
            let percent = (self.volume.clamp(0.0, 1.0) * 100.0).round() as u32;
            args.push(self.volume_arg.replace("{percent}", &percent.to_string()));
        }
        args
    }
}

/// Alarm delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Whether exact alarms may be registered
    #[serde(default = "default_exact_alarms")]
    pub exact_alarms: bool,

    /// How often `psalmwake run` checks for due alarms
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            exact_alarms: default_exact_alarms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("psalmwake")
}

fn default_snooze_minutes() -> u32 {
    5
}

fn default_max_snooze_count() -> u32 {
    10
}

fn default_ring_minutes() -> u32 {
    10
}

fn default_player_command() -> String {
    "mpv".into()
}

fn default_player_args() -> Vec<String> {
    vec![
        "--no-video".into(),
        "--really-quiet".into(),
        "--loop-file=inf".into(),
    ]
}

fn default_volume() -> f32 {
    0.8
}

fn default_volume_arg() -> String {
    "--volume={percent}".into()
}

fn default_exact_alarms() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    15
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("psalmwake").join("config.toml")
    }

    /// Reject values the scheduler cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(crate::scheduler::MIN_SNOOZE_MINUTES..=crate::scheduler::MAX_SNOOZE_MINUTES)
            .contains(&self.alarm.snooze_minutes)
        {
            return Err(Error::Config(format!(
                "snooze_minutes must be between {} and {}, got {}",
                crate::scheduler::MIN_SNOOZE_MINUTES,
                crate::scheduler::MAX_SNOOZE_MINUTES,
                self.alarm.snooze_minutes
            )));
        }
        if !(0.0..=1.0).contains(&self.player.volume) {
            return Err(Error::Config(format!(
                "volume must be between 0.0 and 1.0, got {}",
                self.player.volume
            )));
        }
        if self.alarm.ring_minutes == 0 {
            return Err(Error::Config("ring_minutes must be positive".into()));
        }
        if self.platform.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Audio directory, falling back to `<data_dir>/audio`
    pub fn audio_dir(&self, data_dir: &Path) -> PathBuf {
        self.library
            .audio_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("audio"))
    }
}
