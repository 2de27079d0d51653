//! Fixed-capacity FIFO mailbox with blocking put/get.
//!
//! A mailbox is split into two halves:
//!
//! - [`MailboxSender`]: the producer half. `Clone`, so the dispatcher and any
//!   number of stages can feed the same mailbox.
//! - [`Mailbox`]: the consumer half. Not `Clone`: exactly one owner drains
//!   it, which is what makes per-mailbox FIFO a sufficient ordering guarantee.
//!
//! Both halves sit on a bounded crossbeam channel. `put` parks while the
//! mailbox holds `capacity` items and `get` parks while it is empty; both
//! waits are event driven. The only way out of a wait other than progress is
//! the other side going away entirely, which surfaces as `Closed`.

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

/// Create a mailbox that holds at most `capacity` items.
pub fn mailbox<T>(capacity: NonZeroUsize) -> (MailboxSender<T>, Mailbox<T>) {
    let (tx, rx) = bounded(capacity.get());
    (MailboxSender { tx }, Mailbox { rx })
}

/// Failure to insert an item. The rejected item is handed back.
#[derive(Error)]
pub enum PutError<T> {
    /// The consumer half has been dropped.
    #[error("mailbox closed: consumer is gone")]
    Closed(T),
    /// The mailbox stayed full for the whole timeout.
    #[error("mailbox still full after timeout")]
    Timeout(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Closed(item) | PutError::Timeout(item) => item,
        }
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("Closed(..)"),
            PutError::Timeout(_) => f.write_str("Timeout(..)"),
        }
    }
}

/// Failure to take an item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
    /// Nothing queued (non-blocking get only).
    #[error("mailbox empty")]
    Empty,
    /// Nothing arrived within the timeout.
    #[error("no item before timeout")]
    Timeout,
    /// Empty and every producer half has been dropped.
    #[error("mailbox closed: all producers are gone")]
    Closed,
}

/// Producer half of a mailbox.
pub struct MailboxSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Block until a slot is free, then append `item` at the tail.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        self.tx.send(item).map_err(|e| PutError::Closed(e.into_inner()))
    }

    /// Like [`put`](Self::put), but give up after `timeout`.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(item) => PutError::Timeout(item),
            SendTimeoutError::Disconnected(item) => PutError::Closed(item),
        })
    }

    pub fn capacity(&self) -> usize {
        // Always Some for a bounded channel.
        self.tx.capacity().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Underlying channel, for `select!` in the dispatcher.
    pub(crate) fn channel(&self) -> &Sender<T> {
        &self.tx
    }
}

impl<T> fmt::Debug for MailboxSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxSender")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Consumer half of a mailbox. Owned by exactly one reader.
pub struct Mailbox<T> {
    rx: Receiver<T>,
}

impl<T> Mailbox<T> {
    /// Block until an item is queued, then remove and return the head.
    pub fn get(&self) -> Result<T, GetError> {
        self.rx.recv().map_err(|_| GetError::Closed)
    }

    /// Take the head item if one is queued.
    pub fn try_get(&self) -> Result<T, GetError> {
        self.rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => GetError::Empty,
            TryRecvError::Disconnected => GetError::Closed,
        })
    }

    /// Like [`get`](Self::get), but give up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, GetError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => GetError::Timeout,
            RecvTimeoutError::Disconnected => GetError::Closed,
        })
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub(crate) fn channel(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
