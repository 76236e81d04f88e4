use std::{fmt, fs::File, io::BufReader, path::Path};

use rodio::{
    cpal::{
        self,
        traits::{DeviceTrait, HostTrait},
    },
    Decoder, OutputStream, OutputStreamBuilder, Sink,
};

use crate::{error::AudioError, settings};

/// An output device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    pub name: String,
    pub output_channel_count: u16,
}

impl OutputDevice {
    #[must_use]
    pub fn new(name: impl Into<String>, output_channel_count: u16) -> Self {
        Self {
            name: name.into(),
            output_channel_count,
        }
    }
}

impl fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ch)", self.name, self.output_channel_count)
    }
}

/// The capabilities the monitor needs from the audio subsystem.
///
/// A backend is created on, and only touched by, the thread that uses it.
pub trait AudioBackend {
    /// Prepares the playback subsystem. Calling it again is a no-op.
    fn initialize(&mut self) -> Result<(), AudioError>;

    /// Stops any playback and releases the subsystem. Calling it again is a no-op.
    fn shutdown(&mut self);

    /// Starts playing `path` at `volume` and returns without waiting for it to end.
    ///
    /// Initializes the backend first if needed.
    fn play(&mut self, path: &Path, volume: f32) -> Result<(), AudioError>;

    /// `false` when nothing is playing or the backend was never initialized.
    fn is_playing(&self) -> bool;

    fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError>;
}

/// Builds a fresh backend on the thread that will own it.
pub type BackendFactory = std::sync::Arc<dyn Fn() -> Box<dyn AudioBackend> + Send + Sync>;

/// Names of devices that can actually output sound, trimmed and lowercased.
#[must_use]
pub fn connected_device_names(devices: Vec<OutputDevice>) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(devices.len());
    for device in devices
        .into_iter()
        .filter(|device| device.output_channel_count > 0)
    {
        let name = settings::normalize_device_name(&device.name);
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Enumerates the output devices of the default host.
///
/// # Errors
/// if the host refuses to list its devices
pub fn list_output_devices() -> Result<Vec<OutputDevice>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Enumerate(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    log::debug!("skipping output device without a name: {e}");
                    return None;
                }
            };
            let output_channel_count = device
                .supported_output_configs()
                .ok()
                .and_then(|configs| configs.map(|config| config.channels()).max())
                .or_else(|| {
                    device
                        .default_output_config()
                        .ok()
                        .map(|config| config.channels())
                })
                .unwrap_or(0);
            Some(OutputDevice {
                name,
                output_channel_count,
            })
        })
        .collect())
}

/// Name of the host's current default output device.
#[must_use]
pub fn default_output_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|device| device.name().ok())
}

/// An open stream is bound to the device that was the default when it was
/// opened. Once the default moves (a headset was unplugged or plugged back in)
/// the stream has to be reopened.
fn stream_is_stale(opened_on: Option<&str>, default_now: Option<&str>) -> bool {
    opened_on != default_now
}

/// rodio backed player. Holds at most one sink, a new clip replaces the old one.
#[derive(Default)]
pub struct AudioPlayer {
    stream: Option<OutputStream>,
    sink: Option<Sink>,
    opened_on: Option<String>,
}

impl AudioPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`BackendFactory`] producing real players.
    #[must_use]
    pub fn factory() -> BackendFactory {
        std::sync::Arc::new(|| Box::new(Self::new()) as Box<dyn AudioBackend>)
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }
}

impl AudioBackend for AudioPlayer {
    fn initialize(&mut self) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let opened_on = default_output_name();
        let mut stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
            self.shutdown();
            AudioError::Stream(e.to_string())
        })?;
        stream.log_on_drop(false);
        self.stream = Some(stream);
        log::info!(
            "audio output initialized on {}",
            opened_on.as_deref().unwrap_or("unnamed device")
        );
        self.opened_on = opened_on;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(sink) = self.sink.take() {
            if !sink.empty() {
                sink.stop();
            }
        }
        if self.stream.take().is_some() {
            log::info!("audio output closed");
        }
        self.opened_on = None;
    }

    fn play(&mut self, path: &Path, volume: f32) -> Result<(), AudioError> {
        if !path.is_file() {
            return Err(AudioError::MissingFile(path.to_path_buf()));
        }
        if self.stream.is_some() {
            let default_now = default_output_name();
            if stream_is_stale(self.opened_on.as_deref(), default_now.as_deref()) {
                log::info!("default output device changed, reopening audio output");
                self.shutdown();
            }
        }
        self.initialize()?;

        let file = File::open(path).map_err(|source| AudioError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let Some(stream) = &self.stream else {
            return Err(AudioError::Stream("output stream went away".to_string()));
        };
        if let Some(previous) = self.sink.take() {
            previous.stop();
        }
        let sink = Sink::connect_new(stream.mixer());
        sink.set_volume(settings::clamp_volume(volume));
        sink.append(source);
        self.sink = Some(sink);

        log::info!("playing {}", path.display());
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.sink
            .as_ref()
            .is_some_and(|sink| !sink.empty() && !sink.is_paused())
    }

    fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError> {
        list_output_devices()
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("initialized", &self.is_initialized())
            .field("playing", &self.is_playing())
            .finish()
    }
}
