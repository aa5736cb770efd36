//! Psalm content table.
//!
//! The library is built once at startup and then shared by reference. It
//! holds text and audio references for all 150 psalms; psalms without
//! curated text receive a placeholder blessing and psalms without a
//! recitation on disk fall back to the default sound.

use crate::config::LibraryConfig;
use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Audio file extensions tried for each recitation, in priority order
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "flac", "m4a"];

/// Text returned for ids outside the table
pub const FALLBACK_TEXT: &str = "Psalm text is not available.";

const BLESSING: &str = "The LORD bless thee, and keep thee: \
The LORD make his face shine upon thee, and be gracious unto thee: \
The LORD lift up his countenance upon thee, and give thee peace.";

struct Curated {
    title: &'static str,
    text: Option<&'static str>,
}

static CURATED: Lazy<HashMap<u8, Curated>> = Lazy::new(|| {
    let mut table = HashMap::new();

    table.insert(
        1,
        Curated {
            title: "The Two Ways",
            text: Some(
                "Blessed is the man that walketh not in the counsel of the ungodly, \
nor standeth in the way of sinners, nor sitteth in the seat of the scornful. \
But his delight is in the law of the LORD; and in his law doth he meditate day and night. \
And he shall be like a tree planted by the rivers of water, that bringeth forth his fruit \
in his season; his leaf also shall not wither; and whatsoever he doeth shall prosper. \
The ungodly are not so: but are like the chaff which the wind driveth away. \
Therefore the ungodly shall not stand in the judgment, nor sinners in the congregation \
of the righteous. For the LORD knoweth the way of the righteous: but the way of the \
ungodly shall perish.",
            ),
        },
    );

    table.insert(
        23,
        Curated {
            title: "The LORD Is My Shepherd",
            text: Some(
                "The LORD is my shepherd; I shall not want. \
He maketh me to lie down in green pastures: he leadeth me beside the still waters. \
He restoreth my soul: he leadeth me in the paths of righteousness for his name's sake. \
Yea, though I walk through the valley of the shadow of death, I will fear no evil: \
for thou art with me; thy rod and thy staff they comfort me. \
Thou preparest a table before me in the presence of mine enemies: \
thou anointest my head with oil; my cup runneth over. \
Surely goodness and mercy shall follow me all the days of my life: \
and I will dwell in the house of the LORD for ever.",
            ),
        },
    );

    table.insert(
        91,
        Curated {
            title: "Under the Shadow of the Almighty",
            text: Some(
                "He that dwelleth in the secret place of the most High shall abide under \
the shadow of the Almighty. I will say of the LORD, He is my refuge and my fortress: \
my God; in him will I trust. Surely he shall deliver thee from the snare of the fowler, \
and from the noisome pestilence. He shall cover thee with his feathers, and under his \
wings shalt thou trust: his truth shall be thy shield and buckler. \
Thou shalt not be afraid for the terror by night; nor for the arrow that flieth by day; \
nor for the pestilence that walketh in darkness; nor for the destruction that wasteth \
at noonday.",
            ),
        },
    );

    table.insert(
        121,
        Curated {
            title: "I Will Lift Up Mine Eyes",
            text: Some(
                "I will lift up mine eyes unto the hills, from whence cometh my help. \
My help cometh from the LORD, which made heaven and earth. \
He will not suffer thy foot to be moved: he that keepeth thee will not slumber. \
Behold, he that keepeth Israel shall neither slumber nor sleep. \
The LORD is thy keeper: the LORD is thy shade upon thy right hand. \
The sun shall not smite thee by day, nor the moon by night. \
The LORD shall preserve thee from all evil: he shall preserve thy soul. \
The LORD shall preserve thy going out and thy coming in from this time forth, \
and even for evermore.",
            ),
        },
    );

    table.insert(
        139,
        Curated {
            title: "Thou Hast Searched Me",
            text: None,
        },
    );

    table
});

static DEFAULT_AUDIO: AudioRef = AudioRef::Default;

/// Cached library with no audio on disk
static BUILTIN_LIBRARY: Lazy<PsalmLibrary> = Lazy::new(|| PsalmLibrary::load(&LibraryConfig::default()));

/// Get a reference to the cached built-in library
///
/// Every psalm resolves to the default sound. Useful for tests and for
/// commands that only need text.
pub fn builtin_library() -> &'static PsalmLibrary {
    &BUILTIN_LIBRARY
}

/// Placeholder body for psalms without curated text
pub fn placeholder_text(id: PsalmId) -> String {
    format!("Psalm {}\n\n{}", id, BLESSING)
}

/// Immutable table of all 150 psalms
#[derive(Clone, Debug)]
pub struct PsalmLibrary {
    records: Vec<PsalmRecord>,
    default_sound: Option<PathBuf>,
}

impl PsalmLibrary {
    /// Build the table, resolving text overrides and recitations on disk
    pub fn load(config: &LibraryConfig) -> Self {
        let mut records = Vec::with_capacity(TOTAL_PSALMS as usize);
        let mut missing_audio = 0usize;

        for id in PsalmId::all() {
            let curated = CURATED.get(&id.get());

            let title = curated
                .map(|c| c.title.to_string())
                .unwrap_or_else(|| format!("Psalm {}", id));

            let text = config
                .text_dir
                .as_deref()
                .and_then(|dir| read_text_override(dir, id))
                .or_else(|| curated.and_then(|c| c.text).map(str::to_string))
                .unwrap_or_else(|| placeholder_text(id));

            let audio = match config.audio_dir.as_deref().and_then(|dir| find_recitation(dir, id)) {
                Some(path) => AudioRef::Resource {
                    name: id.resource_name(),
                    path,
                },
                None => {
                    missing_audio += 1;
                    AudioRef::Default
                }
            };

            records.push(PsalmRecord {
                id,
                title,
                text,
                audio,
            });
        }

        match config.audio_dir.as_deref() {
            Some(dir) if !dir.is_dir() => {
                tracing::info!("No audio directory at {:?}, using {}", dir, DEFAULT_AUDIO_RESOURCE)
            }
            Some(_) if missing_audio > 0 => tracing::warn!(
                "{} of {} psalms have no recitation, using {}",
                missing_audio,
                TOTAL_PSALMS,
                DEFAULT_AUDIO_RESOURCE
            ),
            _ => {}
        }

        let default_sound = match &config.default_sound {
            Some(path) if path.is_file() => Some(path.clone()),
            Some(path) => {
                tracing::warn!("Default sound {:?} not found, alarms may be silent", path);
                None
            }
            None => None,
        };

        tracing::debug!(
            "Loaded psalm library ({} recitations)",
            TOTAL_PSALMS as usize - missing_audio
        );

        Self {
            records,
            default_sound,
        }
    }

    /// Record for a psalm id
    pub fn get(&self, id: PsalmId) -> &PsalmRecord {
        &self.records[id.get() as usize - 1]
    }

    /// Record for a raw psalm number, if it is in range
    pub fn lookup(&self, number: u32) -> Option<&PsalmRecord> {
        PsalmId::new(number).map(|id| self.get(id))
    }

    /// Text for a psalm number; out-of-range numbers get [`FALLBACK_TEXT`]
    pub fn text(&self, number: u32) -> &str {
        self.lookup(number)
            .map(|r| r.text.as_str())
            .unwrap_or(FALLBACK_TEXT)
    }

    /// Audio reference for a psalm number; out-of-range numbers get the default
    pub fn audio_ref(&self, number: u32) -> &AudioRef {
        self.lookup(number).map(|r| &r.audio).unwrap_or(&DEFAULT_AUDIO)
    }

    /// Path of the configured default sound, if present on disk
    pub fn default_sound(&self) -> Option<&Path> {
        self.default_sound.as_deref()
    }

    /// File to play for an audio reference
    pub fn resolve<'a>(&'a self, audio: &'a AudioRef) -> Option<&'a Path> {
        match audio {
            AudioRef::Resource { path, .. } => Some(path.as_path()),
            AudioRef::Default => self.default_sound(),
        }
    }

    pub fn records(&self) -> &[PsalmRecord] {
        &self.records
    }

    /// Number of psalms with a recitation on disk
    pub fn recitation_count(&self) -> usize {
        self.records.iter().filter(|r| !r.audio.is_default()).count()
    }
}

fn find_recitation(dir: &Path, id: PsalmId) -> Option<PathBuf> {
    let name = id.resource_name();
    AUDIO_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", name, ext)))
        .find(|path| path.is_file())
}

fn read_text_override(dir: &Path, id: PsalmId) -> Option<String> {
    let path = dir.join(format!("{}.txt", id.resource_name()));
    if !path.exists() {
        return None;
    }

    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Failed to read psalm text {:?}: {}", path, e);
            None
        }
    }
}
