//! Cancellation token and stop-aware bounded queue operations.
//!
//! Every blocking send or receive in the loader goes through these helpers.
//! They block in `poll` slices and re-check the stop token between slices, so
//! no thread ever waits longer than one poll interval after cancellation.
//! A timeout never drops the item being sent.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared stop flag.
///
/// A child token is stopped when either it or any ancestor is cancelled,
/// which lets one partition stream be halted without stopping the epoch.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<StopToken>>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also stopped whenever `self` is.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_stopped())
    }
}

/// Why a stop-aware queue operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueClosed {
    /// The stop token was cancelled
    Stopped,
    /// The other end of the channel was dropped
    Disconnected,
}

/// Sends `item`, blocking while the queue is full.
///
/// On failure the item is dropped together with the error; callers only use
/// this for values that are worthless once the epoch is stopped.
pub fn send_until_stopped<T>(
    tx: &Sender<T>,
    mut item: T,
    stop: &StopToken,
    poll: Duration,
) -> Result<(), QueueClosed> {
    loop {
        if stop.is_stopped() {
            return Err(QueueClosed::Stopped);
        }
        match tx.send_timeout(item, poll) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(returned)) => item = returned,
            Err(SendTimeoutError::Disconnected(_)) => return Err(QueueClosed::Disconnected),
        }
    }
}

/// Receives the next item, blocking while the queue is empty.
pub fn recv_until_stopped<T>(
    rx: &Receiver<T>,
    stop: &StopToken,
    poll: Duration,
) -> Result<T, QueueClosed> {
    loop {
        if stop.is_stopped() {
            return Err(QueueClosed::Stopped);
        }
        match rx.recv_timeout(poll) {
            Ok(item) => return Ok(item),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(QueueClosed::Disconnected),
        }
    }
}
