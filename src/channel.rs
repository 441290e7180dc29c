//! Bounded channel with a drop-oldest overflow policy.
//!
//! Producers on the protocol side must never wait on slow consumers, so a full
//! queue evicts its oldest entry instead of blocking. Evictions are counted so
//! callers can log them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};

/// Bounded MPMC queue that evicts the oldest item when full.
pub struct DropOldest<T> {
  tx: Sender<T>,
  rx: Receiver<T>,
  dropped: Arc<AtomicU64>,
}

impl<T> DropOldest<T> {
  /// Create a queue holding at most `capacity` items (minimum 1).
  pub fn new(capacity: usize) -> Self {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    Self {
      tx,
      rx,
      dropped: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Push an item without waiting.
  ///
  /// Returns the evicted item when the queue was full, or gives the item back
  /// as `Err` when the queue has been closed.
  pub fn push(&self, mut item: T) -> Result<Option<T>, T> {
    let mut evicted = None;
    loop {
      match self.tx.try_send(item) {
        Ok(()) => return Ok(evicted),
        Err(TrySendError::Full(back)) => {
          item = back;
          if let Ok(oldest) = self.rx.try_recv() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            evicted = Some(oldest);
          }
        }
        Err(TrySendError::Closed(back)) => return Err(back),
      }
    }
  }

  /// A receiver for consumers. All receivers share the same queue.
  pub fn receiver(&self) -> Receiver<T> {
    self.rx.clone()
  }

  /// Number of items evicted so far.
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  /// Number of queued items.
  pub fn len(&self) -> usize {
    self.tx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tx.is_empty()
  }

  /// Close the queue. Consumers drain what is left, then see the end.
  pub fn close(&self) {
    self.tx.close();
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

impl<T> Clone for DropOldest<T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      rx: self.rx.clone(),
      dropped: self.dropped.clone(),
    }
  }
}
