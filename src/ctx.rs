//! Cancellation primitives.
//!
//! Long-running operations (stream reads, watch loops, backoff sleeps) accept
//! a [`CancelToken`]. Cancellation is signaled by disconnecting a
//! crossbeam channel, so a token can participate directly in `select!` and
//! wakes every blocked waiter at once. A token is cheap to clone and all
//! clones observe the same cancellation.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Uninhabited message type: the cancellation channel only ever disconnects.
#[derive(Debug)]
pub enum Never {}

/// Cancellation signal observed by workers.
#[derive(Debug, Clone)]
pub struct CancelToken {
    done: Receiver<Never>,
    // Background tokens own their sender so the channel never disconnects.
    _keep: Option<Arc<Sender<Never>>>,
}

/// Cancels the paired tokens when dropped or canceled explicitly.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<Sender<Never>>,
}

/// Creates a linked (handle, token) pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded::<Never>(0);
    (
        CancelHandle { tx: Some(tx) },
        CancelToken {
            done: rx,
            _keep: None,
        },
    )
}

impl CancelToken {
    /// A token that is never canceled.
    #[must_use]
    pub fn background() -> Self {
        let (tx, rx) = bounded::<Never>(0);
        Self {
            done: rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    /// The channel to select on; it becomes ready (disconnected) on cancel.
    #[must_use]
    pub fn done(&self) -> &Receiver<Never> {
        &self.done
    }

    /// Non-blocking cancellation check.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self.done.try_recv() {
            Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
            Ok(never) => match never {},
        }
    }

    /// Sleeps for `duration` unless canceled first.
    ///
    /// Returns true if the full duration elapsed, false if the token was
    /// canceled during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.done.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
            Ok(never) => match never {},
        }
    }
}

impl CancelHandle {
    /// Cancels all linked tokens.
    pub fn cancel(mut self) {
        self.tx.take();
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.tx.take();
    }
}
