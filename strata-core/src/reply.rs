//! One-shot Replies
//!
//! Every request that needs an answer carries a [`Reply`]; the requesting
//! thread keeps the matching [`Pending`] and blocks on it. The processor
//! answers exactly once, and it may answer later than the request that
//! produced the reply (a barrier is answered when the last task ends).
//!
//! Both halves wrap a `tokio::sync::oneshot` channel, so a waiter never
//! busy-polls and a reply that is dropped unanswered wakes its waiter with
//! [`RuntimeError::ReplyDropped`].

use tokio::sync::oneshot;

use crate::error::{Result, RuntimeError};

/// Sending half, owned by whoever will produce the answer.
#[derive(Debug)]
pub struct Reply<T> {
    tx: oneshot::Sender<T>,
}

/// Receiving half, owned by the thread that waits for the answer.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

/// Create a connected reply/pending pair.
pub fn channel<T>() -> (Reply<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Reply { tx }, Pending { rx })
}

impl<T> Reply<T> {
    /// Deliver the answer. A requester that stopped waiting is not an error.
    pub fn send(self, value: T) {
        if self.tx.send(value).is_err() {
            tracing::trace!("reply receiver dropped before the answer arrived");
        }
    }

    /// Whether the waiting side is still interested.
    pub fn is_waiting(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl<T> Pending<T> {
    /// Block the calling thread until the answer arrives.
    ///
    /// Must not be called from within an async runtime context.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| RuntimeError::ReplyDropped)
    }

    /// Non-blocking check used by tests and polling callers.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RuntimeError::ReplyDropped)),
        }
    }
}

impl<T> Pending<Result<T>> {
    /// Wait for an answer that is itself fallible.
    pub fn wait_flat(self) -> Result<T> {
        self.wait()?
    }
}
