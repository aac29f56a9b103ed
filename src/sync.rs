//! Synchronization primitives for search cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// A thread-safe, one-shot cancellation signal.
///
/// Cancelling drops the internal sender, which wakes every thread blocked
/// in [`CancelToken::wait_timeout`] or selecting on
/// [`CancelToken::receiver`], so cancellable waits never poll.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    /// Create a new token (initially not cancelled).
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Create a token that is already cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.sender.lock().take();
    }

    /// Sleep for up to `duration`; returns `true` if cancelled meanwhile.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        !matches!(
            self.receiver.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Receiver that disconnects when the token fires, for `select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
