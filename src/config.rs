use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use directories::ProjectDirs;

use crate::{error::ConfigError, settings::Settings};

const APP_NAME: &str = "keepalive";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_SOUND_FILE: &str = "default.mp3";

#[must_use]
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// `<config dir>/keepalive/config.toml`
///
/// # Errors
/// if the platform has no notion of a home directory
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let mut path = project_dirs()
        .ok_or(ConfigError::NoProjectDirs)?
        .config_dir()
        .to_path_buf();
    path.push(CONFIG_FILE);
    Ok(path)
}

/// Where bundled and user sounds live, `<data dir>/keepalive/sounds`.
#[must_use]
pub fn sounds_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("sounds"))
}

/// Falls back to a relative path when there is no data dir.
#[must_use]
pub fn default_sound_path() -> PathBuf {
    sounds_path().map_or_else(
        || PathBuf::from(DEFAULT_SOUND_FILE),
        |dir| dir.join(DEFAULT_SOUND_FILE),
    )
}

/// Persists [`Settings`] as toml.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// # Errors
    /// see [`config_path`]
    pub fn at_default_location() -> Result<Self, ConfigError> {
        config_path().map(Self::new)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Modification time and length of the file, `None` when it doesn't exist.
    ///
    /// Two equal fingerprints mean nobody rewrote the file in between.
    #[must_use]
    pub fn fingerprint(&self) -> Option<(SystemTime, u64)> {
        let metadata = std::fs::metadata(&self.path).ok()?;
        Some((metadata.modified().ok()?, metadata.len()))
    }

    /// Reads the settings, filling missing keys with defaults and clamping the rest.
    ///
    /// A missing file is not an error, it gives the defaults.
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed
    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.exists() {
            log::info!("no settings file at {}", self.path.display());
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let settings = settings.normalized();
        if settings.has_sound() && !settings.sound_exists() {
            log::warn!(
                "sound file {} does not exist",
                settings.sound_path.display()
            );
        }
        log::info!("loaded settings from {}", self.path.display());
        Ok(settings)
    }

    /// Like [`load`](Self::load), but logs failures and returns the defaults.
    #[must_use]
    pub fn load_or_default(&self) -> Settings {
        self.load().unwrap_or_else(|e| {
            log::error!("{e}, using default settings");
            Settings::default()
        })
    }

    /// # Errors
    /// if the directory can't be created or the file can't be written
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        log::info!("saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DEFAULT_INTERVAL_MINUTES, DEFAULT_VOLUME};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let settings = store.load().unwrap();
        assert!(settings.watch_list.is_empty());
        assert!((settings.volume - DEFAULT_VOLUME).abs() < f32::EPSILON);
        assert_eq!(settings.interval_minutes, DEFAULT_INTERVAL_MINUTES);
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("config.toml"));
        let settings = Settings {
            watch_list: vec!["mysonic".to_string(), "buds".to_string()],
            sound_path: dir.path().join("ding.mp3"),
            volume: 0.25,
            interval_minutes: 12,
        };
        store.save(&settings).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn partial_file_is_merged_with_defaults_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "devices = [\" MySonic \", \"mysonic\"]\nvolume = 1.7\ninterval_minutes = 1000\n",
        )
        .unwrap();
        let settings = ConfigStore::new(&path).load().unwrap();
        assert_eq!(settings.watch_list, vec!["mysonic".to_string()]);
        assert!((settings.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(settings.interval_minutes, 360);
        assert_eq!(settings.sound_path, default_sound_path());
    }

    #[test]
    fn negative_interval_is_clamped_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "devices = [\"mysonic\"]\nsound_path = \"ding.mp3\"\ninterval_minutes = -5\n",
        )
        .unwrap();
        let store = ConfigStore::new(&path);
        let settings = store.load().unwrap();
        assert_eq!(settings.interval_minutes, 1);
        assert_eq!(settings.watch_list, vec!["mysonic".to_string()]);
        assert_eq!(settings.sound_path, PathBuf::from("ding.mp3"));
        assert_eq!(store.load_or_default(), settings);
    }

    #[test]
    fn fingerprint_follows_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        assert_eq!(store.fingerprint(), None);
        store.save(&Settings::default()).unwrap();
        let first = store.fingerprint();
        assert!(first.is_some());
        store
            .save(&Settings {
                watch_list: vec!["buds".to_string()],
                ..Settings::default()
            })
            .unwrap();
        assert_ne!(store.fingerprint(), first);
    }

    #[test]
    fn malformed_file_is_an_error_but_load_or_default_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "devices = 5\n").unwrap();
        let store = ConfigStore::new(&path);
        assert!(matches!(store.load(), Err(ConfigError::Parse { .. })));
        assert_eq!(store.load_or_default(), Settings::default());
    }
}
