//! Locked, atomic persistence for small JSON records.
//!
//! Used for the alarm configuration (`alarm.json`) and the platform
//! registration table (`registrations.json`). Readers take a shared lock,
//! writers go through a locked temp file that is renamed over the target.
//! Read-modify-write cycles additionally hold an exclusive lock on a
//! sidecar `<name>.lock` file, so concurrent processes apply their changes
//! one after another instead of overwriting each other.

use crate::{AlarmConfig, Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Load a JSON record with shared locking
///
/// Returns the default value if the file doesn't exist, can't be read, or
/// fails to parse. Problems are logged rather than surfaced.
pub fn load_or_default<T>(path: &Path, what: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::debug!("No {} file at {:?}, using defaults", what, path);
        return Ok(T::default());
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Unable to open {} file {:?}: {}. Using defaults.", what, path, e);
            return Ok(T::default());
        }
    };

    if let Err(e) = file.lock_shared() {
        tracing::warn!("Unable to lock {} file {:?}: {}. Using defaults.", what, path, e);
        return Ok(T::default());
    }

    let mut contents = String::new();
    let mut reader = std::io::BufReader::new(&file);
    if let Err(e) = reader.read_to_string(&mut contents) {
        let _ = file.unlock();
        tracing::warn!("Failed to read {} file {:?}: {}. Using defaults.", what, path, e);
        return Ok(T::default());
    }

    file.unlock()?;

    match serde_json::from_str::<T>(&contents) {
        Ok(value) => {
            tracing::debug!("Loaded {} from {:?}", what, path);
            Ok(value)
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} file {:?}: {}. Using defaults.", what, path, e);
            Ok(T::default())
        }
    }
}

/// Atomically write a JSON record
///
/// Writes to a locked temp file in the same directory, syncs it, then
/// renames it over the target.
pub fn save_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::State(format!("{:?} has no parent directory", path)))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(value)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Run `f` while holding the exclusive update lock for `path`
///
/// The lock lives on `<path>.lock` rather than on the record itself, since
/// `save_atomic` replaces the record's inode.
pub fn with_update_lock<R, F>(path: &Path, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let lock_path = lock_path_for(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    lock_file.lock_exclusive()?;

    let result = f();

    if let Err(e) = lock_file.unlock() {
        tracing::warn!("Failed to release lock {:?}: {}", lock_path, e);
    }
    result
}

impl AlarmConfig {
    /// Load the persisted alarm config; missing or corrupt files yield defaults
    pub fn load(path: &Path) -> Result<Self> {
        load_or_default(path, "alarm config")
    }

    /// Persist the alarm config atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        save_atomic(self, path)?;
        tracing::debug!(
            "Saved alarm config (set={}, {:02}:{:02}) to {:?}",
            self.enabled,
            self.hour,
            self.minute,
            path
        );
        Ok(())
    }

    /// Load, modify and save the config under the update lock
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut AlarmConfig) -> Result<()>,
    {
        with_update_lock(path, || {
            let mut config = Self::load(path)?;
            f(&mut config)?;
            config.save(path)?;
            Ok(config)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");

        let config = AlarmConfig {
            enabled: true,
            hour: 5,
            minute: 45,
            last_trigger_millis: 1_718_000_000_000,
        };
        config.save(&path).unwrap();

        let loaded = AlarmConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let config = AlarmConfig::load(&path).unwrap();
        assert_eq!(config, AlarmConfig::default());
    }

    #[test]
    fn test_update_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");

        AlarmConfig::default().save(&path).unwrap();

        AlarmConfig::update(&path, |config| {
            config.hour = 6;
            Ok(())
        })
        .unwrap();

        let loaded = AlarmConfig::load(&path).unwrap();
        assert_eq!(loaded.hour, 6);
        assert!(!loaded.enabled);
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");
        AlarmConfig::default().save(&path).unwrap();

        let result = AlarmConfig::update(&path, |config| {
            config.enabled = true;
            Err(Error::Other("abort".into()))
        });
        assert!(result.is_err());
        assert!(!AlarmConfig::load(&path).unwrap().enabled);
    }

    #[test]
    fn test_corrupted_file_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("corrupted.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let config = AlarmConfig::load(&path).unwrap();
        assert_eq!(config, AlarmConfig::default());
    }

    #[test]
    fn test_reads_flat_key_value_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");
        std::fs::write(
            &path,
            r#"{"alarm_set":true,"alarm_hour":6,"alarm_minute":15,"alarm_time":42}"#,
        )
        .unwrap();

        let config = AlarmConfig::load(&path).unwrap();
        assert!(config.enabled);
        assert_eq!((config.hour, config.minute), (6, 15));
        assert_eq!(config.last_trigger_millis, 42);
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");
        AlarmConfig::default().save(&path).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        AlarmConfig::update(&path, |config| {
                            config.last_trigger_millis += 1;
                            Ok(())
                        })
                        .unwrap();
                    }
                });
            }
        });

        // Every increment survives
        assert_eq!(AlarmConfig::load(&path).unwrap().last_trigger_millis, 80);
    }

    #[test]
    fn test_update_lock_uses_sidecar_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");

        let inside = with_update_lock(&path, || Ok(path.with_file_name("alarm.json.lock").exists()))
            .unwrap();
        assert!(inside);
        assert!(!path.exists());
    }

    #[test]
    fn test_atomic_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarm.json");

        AlarmConfig::default().save(&path).unwrap();

        assert!(path.exists());
        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "alarm.json")
            .collect();
        assert!(
            extras.is_empty(),
            "Expected only alarm.json, found extras: {:?}",
            extras
        );
    }
}
