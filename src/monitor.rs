//! The background device monitor.
//!
//! One worker thread per running monitor. Each tick it pulls settings through
//! the [`SettingsClient`], enumerates output devices, and plays the configured
//! sound when a watched device is connected. Every wait observes the stop
//! signal, so stopping never takes longer than the current step.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::{
    audio::{self, AudioBackend, BackendFactory},
    channel::{FetchError, SettingsClient},
    error::StartError,
    settings::{self, Settings},
    signal::{stop_pair, StopHandle, StopSignal},
    status::{emit, StatusKind, StatusSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    /// how long one settings round trip may take
    pub settings_timeout: Duration,
    /// wait used when there's nothing to do
    pub idle_backoff: Duration,
    /// length of one "minute" of the configured interval
    pub interval_unit: Duration,
    /// default grace period for [`DeviceMonitor::join`]
    pub join_timeout: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            settings_timeout: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(15),
            interval_unit: Duration::from_secs(60),
            join_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

struct Worker {
    handle: JoinHandle<()>,
    stop: StopHandle,
    /// disconnects when the worker thread exits, however it exits
    done: Receiver<()>,
}

/// Owns the lifecycle of the worker.
///
/// Dropping a running monitor signals its worker to stop without waiting for it.
pub struct DeviceMonitor {
    client: SettingsClient,
    backend: BackendFactory,
    sink: Arc<dyn StatusSink>,
    timings: MonitorTimings,
    worker: Option<Worker>,
    has_run: bool,
}

impl DeviceMonitor {
    #[must_use]
    pub fn new(client: SettingsClient, backend: BackendFactory, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            client,
            backend,
            sink,
            timings: MonitorTimings::default(),
            worker: None,
            has_run: false,
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: MonitorTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub const fn timings(&self) -> &MonitorTimings {
        &self.timings
    }

    /// Spawns the worker, seeded with the caller's current settings.
    ///
    /// Refuses, with a reported reason and no state change, when already
    /// running or when `seed` has nothing to watch or no sound.
    ///
    /// # Errors
    /// see [`StartError`]
    pub fn start(&mut self, seed: &Settings) -> Result<(), StartError> {
        if self.is_running() {
            emit(self.sink.as_ref(), StatusKind::AlreadyRunning);
            return Err(StartError::AlreadyRunning);
        }
        let seed = seed.clone().normalized();
        if seed.watch_list.is_empty() {
            emit(self.sink.as_ref(), StatusKind::NoTargetDevices);
            return Err(StartError::NoTargetDevices);
        }
        if !seed.has_sound() {
            emit(self.sink.as_ref(), StatusKind::NoSoundFile);
            return Err(StartError::NoSoundFile);
        }
        // a finished worker from an earlier run
        self.reap();

        let (stop, signal) = stop_pair();
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let monitor_loop = MonitorLoop {
            client: self.client.clone(),
            sink: Arc::clone(&self.sink),
            timings: self.timings,
            stop: signal,
            current: seed,
        };
        let backend = Arc::clone(&self.backend);
        let handle = thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || {
                let _done = done_tx;
                let mut backend = backend();
                monitor_loop.run(backend.as_mut());
            })
            .map_err(|e| {
                emit(self.sink.as_ref(), StatusKind::Error(e.to_string()));
                StartError::Spawn(e)
            })?;

        self.worker = Some(Worker { handle, stop, done });
        self.has_run = true;
        Ok(())
    }

    /// Asks the worker to stop and returns immediately.
    pub fn stop(&mut self) {
        if !self.is_running() {
            emit(self.sink.as_ref(), StatusKind::NotRunning);
            return;
        }
        if let Some(worker) = &mut self.worker {
            if !worker.stop.is_stop_requested() {
                emit(self.sink.as_ref(), StatusKind::StopRequested);
                worker.stop.stop();
            }
        }
    }

    /// Waits up to `timeout` for the worker to exit.
    ///
    /// Returns `true` once no worker is left. A worker that outlives the
    /// timeout is reported and left to exit on its own.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(worker) = &self.worker else {
            return true;
        };
        match worker.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                emit(self.sink.as_ref(), StatusKind::StillStopping);
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                // the loop has returned, the thread is about to exit
                if let Some(worker) = self.worker.take() {
                    if worker.handle.join().is_err() {
                        log::error!("device monitor thread panicked");
                    }
                }
                true
            }
        }
    }

    /// [`join`](Self::join) with the configured grace period.
    pub fn join_default(&mut self) -> bool {
        self.join(self.timings.join_timeout)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        match &self.worker {
            None if self.has_run => MonitorState::Stopped,
            None => MonitorState::Idle,
            Some(worker) if worker.handle.is_finished() => MonitorState::Stopped,
            Some(worker) if worker.stop.is_stop_requested() => MonitorState::StopRequested,
            Some(_) => MonitorState::Running,
        }
    }

    fn reap(&mut self) {
        if self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.handle.is_finished())
        {
            if let Some(worker) = self.worker.take() {
                if worker.handle.join().is_err() {
                    log::error!("device monitor thread panicked");
                }
            }
        }
    }
}

impl fmt::Debug for DeviceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMonitor")
            .field("state", &self.state())
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

/// What a tick decided the worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Backoff,
    Interval(Duration),
    Exit,
}

/// State owned by the worker thread.
struct MonitorLoop {
    client: SettingsClient,
    sink: Arc<dyn StatusSink>,
    timings: MonitorTimings,
    stop: StopSignal,
    /// last snapshot that arrived, reused when the owner doesn't answer
    current: Settings,
}

impl MonitorLoop {
    fn run(mut self, backend: &mut dyn AudioBackend) {
        emit(self.sink.as_ref(), StatusKind::Started);
        while !self.stop.is_stopped() {
            let next = match panic::catch_unwind(AssertUnwindSafe(|| self.tick(backend))) {
                Ok(next) => next,
                Err(payload) => {
                    emit(
                        self.sink.as_ref(),
                        StatusKind::Error(panic_message(payload.as_ref())),
                    );
                    Next::Backoff
                }
            };
            let wait = match next {
                Next::Exit => break,
                Next::Backoff => self.timings.idle_backoff,
                Next::Interval(interval) => interval,
            };
            if self.stop.wait(wait) {
                break;
            }
        }
        backend.shutdown();
        emit(self.sink.as_ref(), StatusKind::Stopped);
    }

    fn tick(&mut self, backend: &mut dyn AudioBackend) -> Next {
        match self.client.fetch(self.timings.settings_timeout, &self.stop) {
            Ok(settings) => self.current = settings,
            Err(FetchError::Stopped) => return Next::Exit,
            Err(e) => emit(
                self.sink.as_ref(),
                StatusKind::SettingsUnavailable(e.to_string()),
            ),
        }
        let snapshot = &self.current;

        if snapshot.watch_list.is_empty() {
            emit(self.sink.as_ref(), StatusKind::NoTargetDevices);
            return Next::Backoff;
        }
        if !snapshot.sound_exists() {
            emit(self.sink.as_ref(), StatusKind::NoSoundFile);
            return Next::Backoff;
        }

        let connected = match backend.output_devices() {
            Ok(devices) => audio::connected_device_names(devices),
            Err(e) => {
                emit(
                    self.sink.as_ref(),
                    StatusKind::EnumerationFailed(e.to_string()),
                );
                return Next::Backoff;
            }
        };
        let Some((fragment, device)) = settings::find_watched(&snapshot.watch_list, &connected)
        else {
            log::debug!("no target device connected");
            return Next::Backoff;
        };
        emit(
            self.sink.as_ref(),
            StatusKind::TargetConnected {
                fragment: fragment.to_string(),
                device: device.to_string(),
            },
        );

        if backend.is_playing() {
            emit(self.sink.as_ref(), StatusKind::StillPlaying);
            return Next::Backoff;
        }
        let volume = settings::clamp_volume(snapshot.volume);
        match backend.play(snapshot.sound_path(), volume) {
            Ok(()) => Next::Interval(snapshot.interval(self.timings.interval_unit)),
            Err(e) => {
                emit(self.sink.as_ref(), StatusKind::PlaybackFailed(e.to_string()));
                Next::Backoff
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use super::*;
    use crate::{
        audio::OutputDevice,
        channel::settings_channel,
        error::AudioError,
        status::{NullSink, Status},
    };

    #[derive(Default)]
    struct Counter {
        plays: Mutex<Vec<(PathBuf, f32)>>,
    }

    struct OneDevice(Arc<Counter>);

    impl AudioBackend for OneDevice {
        fn initialize(&mut self) -> Result<(), AudioError> {
            Ok(())
        }
        fn shutdown(&mut self) {}
        fn play(&mut self, path: &Path, volume: f32) -> Result<(), AudioError> {
            self.0
                .plays
                .lock()
                .unwrap()
                .push((path.to_path_buf(), volume));
            Ok(())
        }
        fn is_playing(&self) -> bool {
            false
        }
        fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError> {
            Ok(vec![OutputDevice::new("MySonic Pro 2", 2)])
        }
    }

    fn fast() -> MonitorTimings {
        MonitorTimings {
            settings_timeout: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(10),
            interval_unit: Duration::from_secs(60),
            join_timeout: Duration::from_secs(2),
        }
    }

    fn seed() -> Settings {
        Settings {
            watch_list: vec!["mysonic".to_string()],
            sound_path: PathBuf::from("ding.mp3"),
            volume: 0.5,
            interval_minutes: 1,
        }
    }

    fn monitor(counter: &Arc<Counter>) -> (DeviceMonitor, crate::channel::SettingsServer) {
        let (client, server) = settings_channel();
        let counter = Arc::clone(counter);
        let factory: BackendFactory =
            Arc::new(move || Box::new(OneDevice(Arc::clone(&counter))) as Box<dyn AudioBackend>);
        let monitor = DeviceMonitor::new(client, factory, Arc::new(NullSink)).with_timings(fast());
        (monitor, server)
    }

    #[test]
    fn new_monitor_is_idle() {
        let (monitor, _server) = monitor(&Arc::default());
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(!monitor.is_running());
    }

    #[test]
    fn refuses_empty_watch_list() {
        let (mut monitor, _server) = monitor(&Arc::default());
        let seed = Settings {
            watch_list: vec!["   ".to_string()],
            ..seed()
        };
        assert!(matches!(
            monitor.start(&seed),
            Err(StartError::NoTargetDevices)
        ));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[test]
    fn refuses_missing_sound() {
        let (mut monitor, _server) = monitor(&Arc::default());
        let seed = Settings {
            sound_path: PathBuf::new(),
            ..seed()
        };
        assert!(matches!(monitor.start(&seed), Err(StartError::NoSoundFile)));
        assert!(!monitor.is_running());
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let (mut monitor, _server) = monitor(&Arc::default());
        monitor.stop();
        assert!(monitor.join(Duration::from_millis(10)));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[test]
    fn second_start_is_refused_and_restart_after_join_works() {
        let counter = Arc::default();
        let (mut monitor, _server) = monitor(&counter);
        monitor.start(&seed()).unwrap();
        assert!(monitor.is_running());
        assert!(matches!(
            monitor.start(&seed()),
            Err(StartError::AlreadyRunning)
        ));
        assert!(monitor.is_running());

        monitor.stop();
        assert!(matches!(
            monitor.state(),
            MonitorState::StopRequested | MonitorState::Stopped
        ));
        assert!(monitor.join(Duration::from_secs(2)));
        assert!(!monitor.is_running());
        assert_eq!(monitor.state(), MonitorState::Stopped);

        monitor.start(&seed()).unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);
        monitor.stop();
        assert!(monitor.join(Duration::from_secs(2)));
    }

    #[test]
    fn seed_is_used_when_owner_never_answers() {
        // the sound file doesn't exist, so the seed can't trigger, but the
        // loop must keep going on the seed instead of giving up
        let (tx, rx) = crossbeam_channel::unbounded::<Status>();
        let (client, _server) = settings_channel();
        let counter: Arc<Counter> = Arc::default();
        let factory: BackendFactory = {
            let counter = Arc::clone(&counter);
            Arc::new(move || Box::new(OneDevice(Arc::clone(&counter))) as Box<dyn AudioBackend>)
        };
        let mut monitor = DeviceMonitor::new(client, factory, Arc::new(tx)).with_timings(fast());
        monitor.start(&seed()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        monitor.stop();
        assert!(monitor.join(Duration::from_secs(2)));

        let kinds: Vec<StatusKind> = rx.try_iter().map(|status| status.kind).collect();
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, StatusKind::SettingsUnavailable(_))));
        assert!(kinds.contains(&StatusKind::NoSoundFile));
        assert_eq!(kinds.last(), Some(&StatusKind::Stopped));
        assert!(counter.plays.lock().unwrap().is_empty());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload = panic::catch_unwind(|| panic!("{}", String::from("bang"))).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
