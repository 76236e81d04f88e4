//! Request/response handoff between the monitor and whoever owns the settings.
//!
//! Every [`SettingsRequest`] carries its own one-shot reply channel, so a late
//! answer to a request that already timed out can never be mistaken for the
//! answer to a newer one. At most one request waits in the queue; an owner
//! that stops answering can't make it grow.

use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::{settings::Settings, signal::StopSignal};

#[must_use]
pub fn settings_channel() -> (SettingsClient, SettingsServer) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (SettingsClient { requests: tx }, SettingsServer { requests: rx })
}

#[derive(Debug)]
pub enum SettingsRequest {
    /// give me the current settings
    Current { reply: Sender<Settings> },
}

impl SettingsRequest {
    /// Answers with a copy of `settings`. A requester that gave up is ignored.
    pub fn respond(self, settings: &Settings) {
        match self {
            Self::Current { reply } => {
                if reply.try_send(settings.clone()).is_ok() {
                    log::debug!("settings sent to monitor");
                } else {
                    log::debug!("monitor stopped waiting for settings");
                }
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no settings owner is listening")]
    Disconnected,
    #[error("settings request was dropped without an answer")]
    Unanswered,
    #[error("an earlier settings request is still waiting")]
    Backlogged,
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("stopped while waiting for settings")]
    Stopped,
}

/// The requesting side, owned by the monitor.
#[derive(Debug, Clone)]
pub struct SettingsClient {
    requests: Sender<SettingsRequest>,
}

impl SettingsClient {
    /// Round-trips one request, waiting at most `timeout` for the answer.
    ///
    /// The answer comes back normalized. A stop request cuts the wait short.
    ///
    /// # Errors
    /// see [`FetchError`]
    pub fn fetch(&self, timeout: Duration, stop: &StopSignal) -> Result<Settings, FetchError> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.requests
            .try_send(SettingsRequest::Current { reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => FetchError::Backlogged,
                TrySendError::Disconnected(_) => FetchError::Disconnected,
            })?;
        log::debug!("waiting for settings");

        select! {
            recv(answer) -> settings => settings
                .map(Settings::normalized)
                .map_err(|_| FetchError::Unanswered),
            recv(stop.receiver()) -> _ => Err(FetchError::Stopped),
            default(timeout) => Err(FetchError::Timeout(timeout)),
        }
    }
}

/// The answering side, owned by the controller.
#[derive(Debug)]
pub struct SettingsServer {
    requests: Receiver<SettingsRequest>,
}

impl SettingsServer {
    /// Answers every request already waiting, without blocking.
    ///
    /// Returns how many were answered.
    pub fn serve_pending(&self, settings: &Settings) -> usize {
        self.requests
            .try_iter()
            .map(|request| request.respond(settings))
            .count()
    }

    /// For use in `select!` by an owner that has other work to wait on.
    #[must_use]
    pub const fn requests(&self) -> &Receiver<SettingsRequest> {
        &self.requests
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, thread, time::Instant};

    use super::*;
    use crate::signal::stop_pair;

    fn sample() -> Settings {
        Settings {
            watch_list: vec!["MySonic".to_string()],
            sound_path: PathBuf::from("ding.mp3"),
            volume: 1.7,
            interval_minutes: 1000,
        }
    }

    #[test]
    fn round_trip_returns_normalized_copy() {
        let (client, server) = settings_channel();
        let (_stop, signal) = stop_pair();
        let owner = thread::spawn(move || {
            let request = server.requests().recv().unwrap();
            request.respond(&sample());
        });
        let settings = client.fetch(Duration::from_secs(5), &signal).unwrap();
        owner.join().unwrap();
        assert_eq!(settings.watch_list, vec!["mysonic".to_string()]);
        assert!((settings.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(settings.interval_minutes, 360);
    }

    #[test]
    fn silent_owner_times_out() {
        let (client, _server) = settings_channel();
        let (_stop, signal) = stop_pair();
        let started = Instant::now();
        let result = client.fetch(Duration::from_millis(30), &signal);
        assert_eq!(result, Err(FetchError::Timeout(Duration::from_millis(30))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_owner_is_reported() {
        let (client, server) = settings_channel();
        drop(server);
        let (_stop, signal) = stop_pair();
        assert_eq!(
            client.fetch(Duration::from_secs(5), &signal),
            Err(FetchError::Disconnected)
        );
    }

    #[test]
    fn dropped_request_is_unanswered() {
        let (client, server) = settings_channel();
        let (_stop, signal) = stop_pair();
        let owner = thread::spawn(move || drop(server.requests().recv().unwrap()));
        assert_eq!(
            client.fetch(Duration::from_secs(5), &signal),
            Err(FetchError::Unanswered)
        );
        owner.join().unwrap();
    }

    #[test]
    fn stop_cuts_the_wait_short() {
        let (client, _server) = settings_channel();
        let (mut stop, signal) = stop_pair();
        stop.stop();
        assert_eq!(
            client.fetch(Duration::from_secs(30), &signal),
            Err(FetchError::Stopped)
        );
    }

    #[test]
    fn late_answers_are_dropped() {
        let (client, server) = settings_channel();
        let (_stop, signal) = stop_pair();
        assert!(client.fetch(Duration::from_millis(10), &signal).is_err());
        // the stale request is still queued, answering it must not panic
        assert_eq!(server.serve_pending(&sample()), 1);
        assert_eq!(server.serve_pending(&sample()), 0);
    }

    #[test]
    fn undrained_queue_holds_one_request() {
        let (client, server) = settings_channel();
        let (_stop, signal) = stop_pair();
        assert_eq!(
            client.fetch(Duration::from_millis(10), &signal),
            Err(FetchError::Timeout(Duration::from_millis(10)))
        );
        for _ in 0..5 {
            assert_eq!(
                client.fetch(Duration::from_millis(10), &signal),
                Err(FetchError::Backlogged)
            );
        }
        assert_eq!(server.serve_pending(&sample()), 1);

        let owner = thread::spawn(move || {
            let request = server.requests().recv().unwrap();
            request.respond(&sample());
        });
        assert!(client.fetch(Duration::from_secs(5), &signal).is_ok());
        owner.join().unwrap();
    }
}
