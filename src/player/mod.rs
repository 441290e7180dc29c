//! Queue and playback control on top of a [`PlaybackEngine`].
//!
//! - `engine.rs` - backend contract the controller drives
//! - `queue.rs` - track order, shuffle and repeat rules
//! - `controller.rs` - the playback state machine
//! - `services.rs` - media source, scrobbler and observer hooks
//! - `notify.rs` - delivery of notifications to those hooks
//! - `error.rs` - queue and playback errors

mod controller;
mod engine;
mod error;
mod notify;
mod queue;
mod services;

pub use controller::{ControllerOptions, PlaybackController, PlaybackState};
pub use engine::PlaybackEngine;
pub use error::{PlaybackError, QueueError};
pub use notify::{Notification, Notifier};
pub use queue::{next_index, previous_index, shuffle, Queue, RepeatMode};
pub use services::{MediaSource, NoScrobbler, PlayerObserver, ScrobbleTrack, Scrobbler, ServiceError};
