//! Bounded queue of deferred results
//!
//! Producers push handles in the order the results must be consumed; the
//! consumer waits on them in that same order. Because the queue holds
//! handles rather than values, a slow job never lets a later one overtake
//! it, and the capacity bounds how far the producer can run ahead.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::trace;

use super::pool::Deferred;
use crate::error::{OsmError, Result};

/// Sending half of a [`deferred_queue`]
#[derive(Debug)]
pub struct QueueSender<T> {
    name: &'static str,
    sender: Sender<Deferred<T>>,
}

/// Receiving half of a [`deferred_queue`]
#[derive(Debug)]
pub struct QueueReceiver<T> {
    name: &'static str,
    receiver: Receiver<Deferred<T>>,
}

/// Create a queue holding at most `capacity` handles (at least one)
pub fn deferred_queue<T>(capacity: usize, name: &'static str) -> (QueueSender<T>, QueueReceiver<T>) {
    let (sender, receiver) = channel::bounded(capacity.max(1));
    (
        QueueSender { name, sender },
        QueueReceiver { name, receiver },
    )
}

impl<T> QueueSender<T> {
    /// Append a handle, blocking while the queue is full
    ///
    /// Fails once the receiving side is gone.
    pub fn push(&self, handle: Deferred<T>) -> Result<()> {
        self.sender
            .send(handle)
            .map_err(|_| OsmError::ChannelClosed(self.name))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> QueueReceiver<T> {
    /// Next handle in push order
    ///
    /// Blocks while the queue is empty. `None` once every sender is gone
    /// and all handles were taken.
    pub fn pop(&self) -> Option<Deferred<T>> {
        self.receiver.recv().ok()
    }

    /// Next handle if one is queued
    pub fn try_pop(&self) -> Option<Deferred<T>> {
        match self.receiver.try_recv() {
            Ok(handle) => Some(handle),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Drop every handle currently queued, returns how many were dropped
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.try_pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            trace!("Dropped {} pending handles from {}", dropped, self.name);
        }
        dropped
    }
}
