use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Creates a connected stop handle / signal pair.
///
/// Nothing is ever sent on the channel: stopping drops the sender, which
/// wakes every pending and future wait on the signal immediately.
#[must_use]
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopHandle { tx: Some(tx) }, StopSignal { rx })
}

/// The requesting side. Dropping it counts as a stop request.
#[derive(Debug)]
pub struct StopHandle {
    tx: Option<Sender<()>>,
}

impl StopHandle {
    pub fn stop(&mut self) {
        self.tx.take();
    }

    #[must_use]
    pub const fn is_stop_requested(&self) -> bool {
        self.tx.is_none()
    }
}

/// The observing side, owned by the worker.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Sleeps for `duration` unless stopped first.
    ///
    /// Returns `true` if the wait ended because of a stop request.
    #[must_use]
    pub fn wait(&self, duration: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(duration),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// For use in `select!` alongside other channels. Becomes ready once stopped.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
