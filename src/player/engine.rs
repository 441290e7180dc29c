use std::future::Future;
use std::time::Duration;

use async_channel::Receiver;

use crate::mpv::{CommandError, DomainEvent};

/// Audio backend driven by the [`PlaybackController`](super::PlaybackController).
///
/// `load` tags subsequent events with `track_id` so the controller can tell
/// which track an end-of-file belongs to.
pub trait PlaybackEngine: Send + Sync + 'static {
  /// Replace whatever is playing with `url`.
  fn load(&self, url: &str, track_id: &str) -> impl Future<Output = Result<(), CommandError>> + Send;

  fn play(&self) -> impl Future<Output = Result<(), CommandError>> + Send;

  fn pause(&self) -> impl Future<Output = Result<(), CommandError>> + Send;

  fn stop(&self) -> impl Future<Output = Result<(), CommandError>> + Send;

  fn seek_relative(&self, seconds: f64) -> impl Future<Output = Result<(), CommandError>> + Send;

  /// Volume in percent, 0-100.
  fn set_volume(&self, volume: f64) -> impl Future<Output = Result<(), CommandError>> + Send;

  fn position(&self) -> impl Future<Output = Result<Duration, CommandError>> + Send;

  fn duration(&self) -> impl Future<Output = Result<Duration, CommandError>> + Send;

  /// Stream of translated playback events.
  fn events(&self) -> Receiver<DomainEvent>;

  fn shutdown(&self) -> impl Future<Output = ()> + Send;
}
