use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 360;
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;
pub const DEFAULT_VOLUME: f32 = 0.5;

/// A point-in-time copy of the user's settings.
///
/// The monitor receives a fresh one on every poll and never holds a
/// reference into the controller's copy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// device-name fragments, matched case-insensitively as substrings
    #[serde(rename = "devices")]
    pub watch_list: Vec<String>,
    pub sound_path: PathBuf,
    pub volume: f32,
    /// out of range values in a file are clamped, not rejected
    #[serde(deserialize_with = "deserialize_interval")]
    pub interval_minutes: u32,
}

fn deserialize_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    i64::deserialize(deserializer).map(clamp_interval)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_list: vec![],
            sound_path: crate::config::default_sound_path(),
            volume: DEFAULT_VOLUME,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every clamp and clean-up rule, see [`clamp_volume`],
    /// [`clamp_interval`] and [`normalize_device_name`].
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.volume = clamp_volume(self.volume);
        self.interval_minutes = clamp_interval(i64::from(self.interval_minutes));
        let mut watch_list: Vec<String> = Vec::with_capacity(self.watch_list.len());
        for name in self.watch_list.iter().map(|name| normalize_device_name(name)) {
            if !name.is_empty() && !watch_list.contains(&name) {
                watch_list.push(name);
            }
        }
        self.watch_list = watch_list;
        self
    }

    #[must_use]
    pub fn has_sound(&self) -> bool {
        !self.sound_path.as_os_str().is_empty()
    }

    #[must_use]
    pub fn sound_exists(&self) -> bool {
        self.has_sound() && self.sound_path.is_file()
    }

    #[must_use]
    pub fn sound_path(&self) -> &Path {
        &self.sound_path
    }

    /// The cooldown after a trigger, expressed in `unit`s (one minute in production).
    #[must_use]
    pub fn interval(&self, unit: std::time::Duration) -> std::time::Duration {
        unit * clamp_interval(i64::from(self.interval_minutes))
    }
}

/// Clamps to `[0.0, 1.0]`; NaN falls back to the default volume.
#[must_use]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        DEFAULT_VOLUME
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[must_use]
pub fn clamp_interval(minutes: i64) -> u32 {
    let clamped = minutes.clamp(
        i64::from(MIN_INTERVAL_MINUTES),
        i64::from(MAX_INTERVAL_MINUTES),
    );
    // in range of u32 after the clamp above
    u32::try_from(clamped).unwrap_or(DEFAULT_INTERVAL_MINUTES)
}

#[must_use]
pub fn normalize_device_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Finds the first watch-list fragment contained in a connected device name.
///
/// Both sides are case-folded, so callers may pass raw names.
/// Returns the matching `(fragment, device)` pair.
#[must_use]
pub fn find_watched<'w, 'd>(
    watch_list: &'w [String],
    connected: &'d [String],
) -> Option<(&'w str, &'d str)> {
    watch_list.iter().find_map(|fragment| {
        let needle = fragment.to_lowercase();
        connected
            .iter()
            .find(|device| device.to_lowercase().contains(&needle))
            .map(|device| (fragment.as_str(), device.as_str()))
    })
}
