use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures of the audio output backend.
///
/// None of these are fatal to the monitor, they are reported and the current
/// tick is treated as "no match".
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("couldn't open the default audio output: {0}")]
    Stream(String),
    #[error("couldn't enumerate output devices: {0}")]
    Enumerate(String),
    #[error("sound file {} does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("couldn't open sound file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("couldn't decode sound file {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
}

/// Failures of the settings store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't determine a config directory for this platform")]
    NoProjectDirs,
    #[error("couldn't access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("couldn't parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("couldn't serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Reasons a monitor refused to start.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("device monitor already running")]
    AlreadyRunning,
    #[error("no target devices configured")]
    NoTargetDevices,
    #[error("no sound file configured")]
    NoSoundFile,
    #[error("couldn't spawn the monitor thread: {0}")]
    Spawn(#[source] io::Error),
}
