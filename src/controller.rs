//! The settings owner.
//!
//! Holds the authoritative [`Settings`], persists them through a
//! [`ConfigStore`], answers the monitor's requests and drives its lifecycle.
//! The monitor only ever sees copies handed out through the settings channel.
//!
//! Other processes may edit the same file (`keepalive add` while `keepalive
//! run` is up). The controller reloads it when it changes on disk and only
//! writes what it changed itself.

use std::{path::PathBuf, sync::Arc, time::{Duration, SystemTime}};

use crossbeam_channel::Receiver;

use crate::{
    audio::{self, BackendFactory, OutputDevice},
    channel::{settings_channel, SettingsRequest, SettingsServer},
    config::ConfigStore,
    error::{AudioError, ConfigError, StartError},
    monitor::{DeviceMonitor, MonitorState, MonitorTimings},
    settings::{self, Settings},
    status::StatusSink,
};

/// A partial edit of the settings; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub sound_path: Option<PathBuf>,
    pub volume: Option<f32>,
    pub interval_minutes: Option<i64>,
}

impl SettingsUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sound_path.is_none() && self.volume.is_none() && self.interval_minutes.is_none()
    }
}

pub struct Controller {
    settings: Settings,
    store: ConfigStore,
    /// fingerprint of the file as of our last load or save
    seen: Option<(SystemTime, u64)>,
    /// an edit that failed to save
    unsaved: bool,
    server: SettingsServer,
    monitor: DeviceMonitor,
    backend: BackendFactory,
}

impl Controller {
    /// Loads the settings from `store`, falling back to defaults.
    #[must_use]
    pub fn new(store: ConfigStore, backend: BackendFactory, sink: Arc<dyn StatusSink>) -> Self {
        let seen = store.fingerprint();
        let settings = store.load_or_default();
        let mut controller = Self::with_settings(settings, store, backend, sink);
        controller.seen = seen;
        controller.unsaved = false;
        controller
    }

    /// Starts from `settings` instead of the file; they are written on [`close`](Self::close).
    #[must_use]
    pub fn with_settings(
        settings: Settings,
        store: ConfigStore,
        backend: BackendFactory,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (client, server) = settings_channel();
        let monitor = DeviceMonitor::new(client, Arc::clone(&backend), sink);
        Self {
            settings: settings.normalized(),
            seen: store.fingerprint(),
            unsaved: true,
            store,
            server,
            monitor,
            backend,
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: MonitorTimings) -> Self {
        self.monitor = self.monitor.with_timings(timings);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Incoming settings requests, for owners that wait on several channels.
    #[must_use]
    pub const fn requests(&self) -> &Receiver<SettingsRequest> {
        self.server.requests()
    }

    /// Answers `request` with the settings, picking up edits made to the file first.
    pub fn respond(&mut self, request: SettingsRequest) {
        self.reload_if_changed();
        request.respond(&self.settings);
    }

    /// Answers every pending request without blocking.
    pub fn serve_requests(&mut self) -> usize {
        if self.server.requests().is_empty() {
            return 0;
        }
        self.reload_if_changed();
        self.server.serve_pending(&self.settings)
    }

    /// Reloads the settings if the file was rewritten since we last read or wrote it.
    ///
    /// A file that vanished or no longer parses leaves the current settings in place.
    pub fn reload_if_changed(&mut self) -> bool {
        let fingerprint = self.store.fingerprint();
        if fingerprint.is_none() || fingerprint == self.seen {
            return false;
        }
        self.seen = fingerprint;
        match self.store.load() {
            Ok(settings) => {
                if self.unsaved {
                    log::warn!("settings file changed on disk, dropping unsaved edits");
                }
                log::info!("settings file changed, reloaded");
                self.settings = settings;
                self.unsaved = false;
                true
            }
            Err(e) => {
                log::warn!("{e}, keeping current settings");
                false
            }
        }
    }

    fn persist(&mut self) -> Result<(), ConfigError> {
        match self.store.save(&self.settings) {
            Ok(()) => {
                self.seen = self.store.fingerprint();
                self.unsaved = false;
                Ok(())
            }
            Err(e) => {
                self.unsaved = true;
                Err(e)
            }
        }
    }

    /// Adds `name` to the watch list and saves.
    ///
    /// Returns `false` when the name is empty or already watched.
    ///
    /// # Errors
    /// if saving fails, the in-memory change is kept
    pub fn add_device(&mut self, name: &str) -> Result<bool, ConfigError> {
        self.reload_if_changed();
        let name = settings::normalize_device_name(name);
        if name.is_empty() || self.settings.watch_list.contains(&name) {
            return Ok(false);
        }
        log::info!("watching {name}");
        self.settings.watch_list.push(name);
        self.persist()?;
        Ok(true)
    }

    /// Removes `name` from the watch list and saves.
    ///
    /// Returns `false` when it wasn't watched.
    ///
    /// # Errors
    /// if saving fails, the in-memory change is kept
    pub fn remove_device(&mut self, name: &str) -> Result<bool, ConfigError> {
        self.reload_if_changed();
        let name = settings::normalize_device_name(name);
        let before = self.settings.watch_list.len();
        self.settings.watch_list.retain(|watched| *watched != name);
        if self.settings.watch_list.len() == before {
            log::info!("{name} already removed");
            return Ok(false);
        }
        log::info!("stopped watching {name}");
        self.persist()?;
        Ok(true)
    }

    /// Applies `update`, clamping values, and saves.
    ///
    /// # Errors
    /// if saving fails, the in-memory change is kept
    pub fn update_settings(&mut self, update: SettingsUpdate) -> Result<(), ConfigError> {
        self.reload_if_changed();
        if let Some(sound_path) = update.sound_path {
            self.settings.sound_path = sound_path;
        }
        if let Some(volume) = update.volume {
            self.settings.volume = settings::clamp_volume(volume);
        }
        if let Some(minutes) = update.interval_minutes {
            self.settings.interval_minutes = settings::clamp_interval(minutes);
        }
        self.persist()
    }

    /// Output devices currently connected, for picking what to watch.
    ///
    /// # Errors
    /// if the host can't enumerate its devices
    pub fn available_devices(&self) -> Result<Vec<String>, AudioError> {
        let devices: Vec<OutputDevice> = (self.backend)().output_devices()?;
        Ok(audio::connected_device_names(devices))
    }

    /// Starts monitoring with the current settings.
    ///
    /// Unlike [`DeviceMonitor::start`] this also insists the sound file exists.
    ///
    /// # Errors
    /// see [`StartError`]
    pub fn start_monitor(&mut self) -> Result<(), StartError> {
        if !self.settings.watch_list.is_empty() && !self.settings.sound_exists() {
            log::info!("no audio file selected");
            return Err(StartError::NoSoundFile);
        }
        self.monitor.start(&self.settings)
    }

    pub fn stop_monitor(&mut self) {
        self.monitor.stop();
    }

    /// Answers requests already queued, then waits for a stopped monitor.
    pub fn join_monitor(&mut self, timeout: Duration) -> bool {
        self.serve_requests();
        self.monitor.join(timeout)
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    #[must_use]
    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Stops the monitor and waits the grace period.
    ///
    /// Settings are written only when there is no file yet or an earlier
    /// save failed, so edits made by another process survive.
    ///
    /// # Errors
    /// if saving fails
    pub fn close(&mut self) -> Result<(), ConfigError> {
        if self.monitor.is_running() {
            self.monitor.stop();
            let grace = self.monitor.timings().join_timeout;
            self.join_monitor(grace);
        }
        self.reload_if_changed();
        if self.unsaved || !self.store.exists() {
            self.persist()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .field("unsaved", &self.unsaved)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
