//! Notification delivery off the controller's lock.
//!
//! The controller posts notifications while holding its state lock; a single
//! consumer task hands them to the scrobbler and observer in order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::services::{PlayerObserver, ScrobbleTrack, Scrobbler};
use crate::channel::DropOldest;

#[derive(Debug, Clone)]
pub enum Notification {
  Log(String),
  StateChanged,
  NowPlaying { track_id: String, track: ScrobbleTrack },
  Scrobble { track_id: String, track: ScrobbleTrack },
  EndOfQueue,
}

pub struct Notifier {
  queue: DropOldest<Notification>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
  /// Start the consumer task. Must be called inside a tokio runtime.
  pub fn spawn(capacity: usize, scrobbler: Arc<dyn Scrobbler>, observer: Arc<dyn PlayerObserver>) -> Self {
    let queue = DropOldest::new(capacity);
    let task = tokio::spawn(Self::deliver(queue.receiver(), scrobbler, observer));
    Self {
      queue,
      task: Mutex::new(Some(task)),
    }
  }

  async fn deliver(
    rx: async_channel::Receiver<Notification>,
    scrobbler: Arc<dyn Scrobbler>,
    observer: Arc<dyn PlayerObserver>,
  ) {
    while let Ok(notification) = rx.recv().await {
      match notification {
        Notification::Log(message) => observer.log(&message),
        Notification::StateChanged => observer.state_changed(),
        Notification::NowPlaying { track_id, track } => {
          if let Err(e) = scrobbler.now_playing(&track_id, &track) {
            log::warn!("Now playing update for {} failed: {}", track_id, e);
          }
        }
        Notification::Scrobble { track_id, track } => {
          if let Err(e) = scrobbler.scrobble(&track_id, &track) {
            log::warn!("Scrobble for {} failed: {}", track_id, e);
          }
        }
        Notification::EndOfQueue => observer.end_of_queue(),
      }
    }
    log::debug!("Notifier stopped");
  }

  /// Queue a notification. Never waits; a full queue loses its oldest entry.
  pub fn post(&self, notification: Notification) {
    match self.queue.push(notification) {
      Ok(None) => {}
      Ok(Some(dropped)) => log::warn!(
        "Notification queue full, dropped {:?} ({} dropped so far)",
        dropped,
        self.queue.dropped()
      ),
      Err(notification) => log::debug!("Notifier closed, discarding {:?}", notification),
    }
  }

  /// Log through the `log` facade and forward to the observer.
  pub fn log(&self, message: impl Into<String>) {
    let message = message.into();
    log::info!("{}", message);
    self.post(Notification::Log(message));
  }

  pub fn dropped(&self) -> u64 {
    self.queue.dropped()
  }

  /// Deliver what is queued, then stop the consumer.
  pub async fn shutdown(&self) {
    self.queue.close();
    let task = self.task.lock().take();
    if let Some(task) = task {
      if let Err(e) = task.await {
        log::error!("Notifier task failed: {}", e);
      }
    }
  }
}
