//! Audio playback.
//!
//! Recitations are played through an [`AudioPlayer`]. A failed recitation
//! falls back to the default sound; if that fails too the alarm rings
//! silently with the psalm text still on screen.

use crate::config::PlayerConfig;
use crate::library::PsalmLibrary;
use crate::{AudioRef, Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// How long a freshly spawned player is watched for an immediate failure
const STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Something that can loop an audio file until stopped
pub trait AudioPlayer {
    /// Start looping playback of `path`, replacing anything already playing
    fn play(&mut self, path: &Path) -> Result<()>;

    /// Stop playback; calling it when nothing plays is fine
    fn stop(&mut self);

    fn is_playing(&mut self) -> bool;
}

/// Plays audio by running an external program (mpv, paplay, ...)
pub struct CommandPlayer {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandPlayer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child: None,
        }
    }
}

impl AudioPlayer for CommandPlayer {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.stop();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Playback(format!("failed to start {}: {}", self.command, e)))?;

        std::thread::sleep(STARTUP_GRACE);
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                return Err(Error::Playback(format!(
                    "{} exited with {} for {:?}",
                    self.command, status, path
                )));
            }
            Ok(_) => {}
            Err(e) => {
                let _ = child.kill();
                return Err(Error::Playback(format!("failed to poll {}: {}", self.command, e)));
            }
        }

        tracing::debug!("Playing {:?} with {}", path, self.command);
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("Player already exited: {}", e);
            }
            let _ = child.wait();
        }
    }

    fn is_playing(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for CommandPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Player that plays nothing, for headless runs and `--no-audio`
#[derive(Debug, Default)]
pub struct SilentPlayer;

impl AudioPlayer for SilentPlayer {
    fn play(&mut self, path: &Path) -> Result<()> {
        tracing::debug!("Silent player skipping {:?}", path);
        Ok(())
    }

    fn stop(&mut self) {}

    fn is_playing(&mut self) -> bool {
        false
    }
}

/// Build the configured player; an empty command disables audio
pub fn player_from_config(config: &PlayerConfig) -> Box<dyn AudioPlayer> {
    if config.command.trim().is_empty() {
        Box::new(SilentPlayer)
    } else {
        Box::new(CommandPlayer::new(config.command.clone(), config.command_args()))
    }
}

/// What actually ended up playing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Recitation(PathBuf),
    DefaultSound(PathBuf),
    Silent,
}

/// Play a psalm's audio, substituting the default sound on failure
pub fn play_with_fallback(
    player: &mut dyn AudioPlayer,
    library: &PsalmLibrary,
    audio: &AudioRef,
) -> PlaybackOutcome {
    if let AudioRef::Resource { name, path } = audio {
        match player.play(path) {
            Ok(()) => return PlaybackOutcome::Recitation(path.clone()),
            Err(e) => tracing::warn!("Recitation {} failed: {}. Using default sound.", name, e),
        }
    }

    play_default(player, library)
}

/// Play the library's default sound, or nothing if that fails
pub fn play_default(player: &mut dyn AudioPlayer, library: &PsalmLibrary) -> PlaybackOutcome {
    match library.default_sound() {
        Some(path) => match player.play(path) {
            Ok(()) => PlaybackOutcome::DefaultSound(path.to_path_buf()),
            Err(e) => {
                tracing::error!("Default sound failed: {}. Ringing silently.", e);
                PlaybackOutcome::Silent
            }
        },
        None => {
            tracing::warn!("No default sound configured, ringing silently");
            PlaybackOutcome::Silent
        }
    }
}
