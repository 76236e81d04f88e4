#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Plays a keep-alive sound whenever a watched audio output device is connected.
//!
//! A [`monitor::DeviceMonitor`] runs on its own thread and pulls settings from
//! their owner through a [`channel::SettingsClient`]; the
//! [`controller::Controller`] is that owner for the bundled binary.

/// output device enumeration and sound playback
pub mod audio;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod settings;
pub mod signal;
pub mod status;
