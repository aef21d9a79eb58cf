use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::cell::Cell;
use std::time::Duration;

/// Create a linked cancellation pair. The handle lives with the caller, the
/// token travels into the capture loop.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(1);
    (
        CancelHandle { tx },
        CancelToken {
            rx,
            observed: Cell::new(false),
        },
    )
}

/// Caller-side handle that requests a graceful stop.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent; the loop observes it at its next
    /// iteration boundary, never mid-poll.
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Loop-side token. Checked once per iteration; its [`Self::sleep`] is the
/// run's only suspension point and wakes early on cancellation.
#[derive(Debug)]
pub struct CancelToken {
    rx: Receiver<()>,
    observed: Cell<bool>,
}

impl CancelToken {
    /// Whether cancellation has been requested. Sticky once observed.
    pub fn is_cancelled(&self) -> bool {
        if self.observed.get() {
            return true;
        }
        if self.rx.try_recv().is_ok() {
            self.observed.set(true);
        }
        self.observed.get()
    }

    /// Sleep for `delay` or until cancellation arrives, whichever is first.
    /// Returns true when cancelled.
    pub fn sleep(&self, delay: Duration) -> bool {
        if self.observed.get() {
            return true;
        }
        match self.rx.recv_timeout(delay) {
            Ok(()) => {
                self.observed.set(true);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                // Handle dropped without cancelling; plain sleep from here on.
                std::thread::sleep(delay);
                false
            }
        }
    }
}
