// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bounded dispatch queue between triggers and workers.
//!
//! - `enqueue` waits while the queue is full (backpressure, nothing is dropped)
//! - `dequeue` waits while the queue is empty and open
//! - `close` stops acceptance; items already queued are still delivered, and
//!   `dequeue` returns `None` once the queue is closed and drained
//!
//! An `enqueue` that fetched its sender before `close` may still complete
//! after `close` returns. Such an item is delivered like any other before
//! `dequeue` reports `None`; it is never lost.

use std::sync::{PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};

use crate::error::QueueError;
use crate::window::DataQuery;

/// Multi-producer, multi-consumer FIFO of [`DataQuery`] items.
#[derive(Debug)]
pub struct DispatchQueue {
    sender: RwLock<Option<mpsc::Sender<DataQuery>>>,
    receiver: Mutex<mpsc::Receiver<DataQuery>>,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(rx),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push an item, waiting for space if the queue is full.
    ///
    /// A call already past the closed check when `close` runs still lands.
    pub async fn enqueue(&self, item: DataQuery) -> Result<(), QueueError> {
        // Clone out of the lock so a blocked send never holds it
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueueError::Closed)?;
        sender.send(item).await.map_err(|_| QueueError::Closed)
    }

    /// Push an item only if there is space right now.
    pub fn try_enqueue(&self, item: DataQuery) -> Result<bool, QueueError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;
        match sender.try_send(item) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Next item in FIFO order, or `None` once closed and drained.
    pub async fn dequeue(&self) -> Option<DataQuery> {
        self.receiver.lock().await.recv().await
    }

    /// Stop accepting new items.
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
