use std::fmt;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Started,
    AlreadyRunning,
    NotRunning,
    StopRequested,
    Stopped,
    /// the worker didn't exit within the join grace period
    StillStopping,
    NoTargetDevices,
    NoSoundFile,
    SettingsUnavailable(String),
    TargetConnected { fragment: String, device: String },
    /// a previous clip is still playing, this trigger is skipped
    StillPlaying,
    PlaybackFailed(String),
    EnumerationFailed(String),
    Error(String),
}

impl StatusKind {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SettingsUnavailable(_)
                | Self::PlaybackFailed(_)
                | Self::EnumerationFailed(_)
                | Self::Error(_)
                | Self::StillStopping
        )
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "Monitoring devices"),
            Self::AlreadyRunning => write!(f, "Device monitor already running"),
            Self::NotRunning => write!(f, "Device monitor not running"),
            Self::StopRequested => write!(f, "Stopping device monitor"),
            Self::Stopped => write!(f, "Device monitor stopped"),
            Self::StillStopping => write!(f, "Device monitor did not stop in time"),
            Self::NoTargetDevices => write!(f, "No target devices configured"),
            Self::NoSoundFile => write!(f, "No sound file configured"),
            Self::SettingsUnavailable(reason) => write!(f, "Failed to get settings: {reason}"),
            Self::TargetConnected { device, .. } => write!(f, "Target connected: {device}"),
            Self::StillPlaying => write!(f, "Previous sound still playing, skipping"),
            Self::PlaybackFailed(reason) => write!(f, "Failed to play sound: {reason}"),
            Self::EnumerationFailed(reason) => {
                write!(f, "Error getting output devices: {reason}")
            }
            Self::Error(reason) => write!(f, "Error monitoring devices: {reason}"),
        }
    }
}

/// A status transition, stamped with the local time it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub at: DateTime<Local>,
    pub kind: StatusKind,
}

impl Status {
    #[must_use]
    pub fn now(kind: StatusKind) -> Self {
        Self {
            at: Local::now(),
            kind,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.kind)
    }
}

/// Output-only observer of monitor status.
///
/// Reporting must never block or fail the caller.
pub trait StatusSink: Send + Sync {
    fn report(&self, status: Status);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn report(&self, _status: Status) {}
}

impl StatusSink for Sender<Status> {
    fn report(&self, status: Status) {
        // a dropped observer is not our problem
        let _ = self.try_send(status);
    }
}

/// Logs the status and forwards it to the sink.
pub(crate) fn emit(sink: &dyn StatusSink, kind: StatusKind) {
    if kind.is_failure() {
        log::warn!("{kind}");
    } else {
        log::info!("{kind}");
    }
    sink.report(Status::now(kind));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = crossbeam_channel::unbounded();
        emit(&tx, StatusKind::Started);
        assert_eq!(rx.try_recv().map(|s| s.kind), Ok(StatusKind::Started));
    }

    #[test]
    fn dropped_observer_is_ignored() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        emit(&tx, StatusKind::NoSoundFile);
    }

    #[test]
    fn messages_are_human_readable() {
        let kind = StatusKind::TargetConnected {
            fragment: "mysonic".to_string(),
            device: "mysonic pro 2".to_string(),
        };
        assert_eq!(kind.to_string(), "Target connected: mysonic pro 2");
        assert!(!kind.is_failure());
        assert!(StatusKind::Error("boom".to_string()).is_failure());
    }
}
