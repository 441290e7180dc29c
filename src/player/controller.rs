//! Queue and playback state machine.
//!
//! Every user action and every automatic advance goes through one async
//! lock around [`PlayerState`]. Collaborators are told about changes through
//! the [`Notifier`] so they never run under that lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::PlaybackEngine;
use super::error::{PlaybackError, QueueError};
use super::notify::{Notification, Notifier};
use super::queue::{Queue, RepeatMode};
use super::services::{MediaSource, PlayerObserver, ScrobbleTrack, Scrobbler};
use crate::mpv::{DomainEvent, DomainEventKind, EventDetail};
use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
  #[default]
  Stopped,
  Playing,
  Paused,
}

impl fmt::Display for PlaybackState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PlaybackState::Stopped => "stopped",
      PlaybackState::Playing => "playing",
      PlaybackState::Paused => "paused",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
  /// Pause between a track ending and the next one loading.
  pub advance_delay: Duration,
  pub notify_capacity: usize,
  /// 0.0-1.0
  pub initial_volume: f64,
}

impl Default for ControllerOptions {
  fn default() -> Self {
    Self {
      advance_delay: Duration::from_millis(100),
      notify_capacity: 100,
      initial_volume: 1.0,
    }
  }
}

struct PlayerState {
  queue: Queue,
  playback: PlaybackState,
  position: Duration,
  duration: Duration,
  volume: f64,
}

struct Shared<E> {
  engine: E,
  media: Arc<dyn MediaSource>,
  notifier: Notifier,
  options: ControllerOptions,
  state: tokio::sync::Mutex<PlayerState>,
  shutdown: CancellationToken,
  consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Drives a [`PlaybackEngine`] through a track queue.
pub struct PlaybackController<E: PlaybackEngine> {
  inner: Arc<Shared<E>>,
}

impl<E: PlaybackEngine> Clone for PlaybackController<E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<E: PlaybackEngine> PlaybackController<E> {
  /// Must be called inside a tokio runtime.
  pub fn new(
    engine: E,
    media: Arc<dyn MediaSource>,
    scrobbler: Arc<dyn Scrobbler>,
    observer: Arc<dyn PlayerObserver>,
    options: ControllerOptions,
  ) -> Self {
    let notifier = Notifier::spawn(options.notify_capacity, scrobbler, observer);
    let state = PlayerState {
      queue: Queue::new(),
      playback: PlaybackState::Stopped,
      position: Duration::ZERO,
      duration: Duration::ZERO,
      volume: options.initial_volume.clamp(0.0, 1.0),
    };

    Self {
      inner: Arc::new(Shared {
        engine,
        media,
        notifier,
        options,
        state: tokio::sync::Mutex::new(state),
        shutdown: CancellationToken::new(),
        consumer: Mutex::new(None),
      }),
    }
  }

  pub fn engine(&self) -> &E {
    &self.inner.engine
  }

  fn notifier(&self) -> &Notifier {
    &self.inner.notifier
  }

  /// Start consuming the engine's events. Calling it again does nothing.
  pub fn start(&self) {
    let mut consumer = self.inner.consumer.lock();
    if consumer.is_some() {
      return;
    }

    let events = self.inner.engine.events();
    let weak = Arc::downgrade(&self.inner);
    let cancel = self.inner.shutdown.clone();

    *consumer = Some(tokio::spawn(async move {
      loop {
        let event = tokio::select! {
          _ = cancel.cancelled() => break,
          event = events.recv() => match event {
            Ok(event) => event,
            Err(_) => break,
          },
        };
        let Some(inner) = weak.upgrade() else {
          break;
        };
        PlaybackController { inner }.handle_domain_event(event).await;
      }
      log::debug!("Playback event consumer stopped");
    }));
  }

  /// Stop consuming events, shut the engine down and flush notifications.
  pub async fn shutdown(&self) {
    self.inner.shutdown.cancel();
    let consumer = self.inner.consumer.lock().take();
    if let Some(consumer) = consumer {
      if let Err(e) = consumer.await {
        log::error!("Playback event consumer failed: {}", e);
      }
    }

    {
      let mut state = self.inner.state.lock().await;
      state.playback = PlaybackState::Stopped;
      state.position = Duration::ZERO;
    }
    self.inner.engine.shutdown().await;
    self.notifier().shutdown().await;
  }

  pub async fn add_to_queue(&self, track: Track) {
    let mut state = self.inner.state.lock().await;
    self
      .notifier()
      .log(format!("Added track to queue: {}", track.display_name()));
    state.queue.push(track);
    self.notifier().post(Notification::StateChanged);
  }

  pub async fn add_tracks_to_queue(&self, tracks: Vec<Track>) {
    let mut state = self.inner.state.lock().await;
    let count = tracks.len();
    state.queue.extend(tracks);
    self.notifier().log(format!(
      "Added {} tracks to queue (shuffle: {})",
      count,
      state.queue.is_shuffled()
    ));
    self.notifier().post(Notification::StateChanged);
  }

  /// Remove the track at `index`. Out-of-range indexes are ignored.
  /// Removing the track that is playing stops playback.
  pub async fn remove_from_queue(&self, index: usize) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    if index >= state.queue.len() {
      return Ok(());
    }

    let mut result = Ok(());
    if state.queue.current_index() == Some(index) && state.playback != PlaybackState::Stopped {
      result = self.inner.engine.stop().await.map_err(PlaybackError::from);
      state.playback = PlaybackState::Stopped;
      state.position = Duration::ZERO;
    }

    state.queue.remove(index);
    self
      .notifier()
      .log(format!("Removed track from queue at index {}", index));
    self.notifier().post(Notification::StateChanged);
    result
  }

  pub async fn clear_queue(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    let mut result = Ok(());
    if state.playback != PlaybackState::Stopped {
      result = self.inner.engine.stop().await.map_err(PlaybackError::from);
    }

    state.queue.clear();
    state.playback = PlaybackState::Stopped;
    state.position = Duration::ZERO;
    state.duration = Duration::ZERO;
    self.notifier().log("Cleared playback queue");
    self.notifier().post(Notification::StateChanged);
    result
  }

  pub async fn play_track_at_index(&self, index: usize) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    let len = state.queue.len();
    if len == 0 {
      return Err(QueueError::Empty.into());
    }
    if index >= len {
      return Err(QueueError::IndexOutOfRange { index, len }.into());
    }
    self.play_locked(&mut state, index).await
  }

  /// Play the current track, or the first one if none is selected.
  pub async fn play_current(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    self.play_current_locked(&mut state).await
  }

  async fn play_current_locked(&self, state: &mut PlayerState) -> Result<(), PlaybackError> {
    if state.queue.is_empty() {
      return Err(QueueError::Empty.into());
    }
    let index = state.queue.current_index().unwrap_or(0);
    self.play_locked(state, index).await
  }

  /// Advance according to the repeat mode. Running off the end of the queue
  /// stops playback.
  pub async fn next_track(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    if state.queue.is_empty() {
      return Err(QueueError::Empty.into());
    }

    match state.queue.next_index() {
      Some(index) => self.play_locked(&mut state, index).await,
      None => {
        self.end_of_queue(&mut state).await;
        Ok(())
      }
    }
  }

  /// Go back according to the repeat mode. Does nothing at the start of
  /// the queue.
  pub async fn previous_track(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    if state.queue.is_empty() {
      return Err(QueueError::Empty.into());
    }

    match state.queue.previous_index() {
      Some(index) => self.play_locked(&mut state, index).await,
      None => Ok(()),
    }
  }

  async fn end_of_queue(&self, state: &mut PlayerState) {
    if let Err(e) = self.inner.engine.stop().await {
      log::warn!("Failed to stop playback at end of queue: {}", e);
    }
    state.playback = PlaybackState::Stopped;
    state.position = Duration::ZERO;
    self.notifier().log("Reached end of queue");
    self.notifier().post(Notification::StateChanged);
    self.notifier().post(Notification::EndOfQueue);
  }

  /// Load the track at `index`, falling back to the alternate URL once.
  /// State is only touched after a successful load.
  async fn play_locked(&self, state: &mut PlayerState, index: usize) -> Result<(), PlaybackError> {
    let len = state.queue.len();
    let track = state
      .queue
      .get(index)
      .cloned()
      .ok_or(QueueError::IndexOutOfRange { index, len })?;

    let url = self.inner.media.stream_url(&track.id);
    if let Err(primary) = self.inner.engine.load(&url, &track.id).await {
      let Some(fallback) = self.inner.media.fallback_url(&track.id) else {
        self
          .notifier()
          .log(format!("Failed to load {}: {}", track.display_name(), primary));
        return Err(PlaybackError::LoadFailed {
          track_id: track.id,
          source: primary,
        });
      };

      log::warn!("Stream URL for {} failed ({}), trying fallback", track.id, primary);
      if let Err(e) = self.inner.engine.load(&fallback, &track.id).await {
        self
          .notifier()
          .log(format!("Failed to load {}: {}", track.display_name(), e));
        return Err(PlaybackError::LoadFailed {
          track_id: track.id,
          source: e,
        });
      }
    }

    // MPV keeps its pause flag across loads and stops.
    let playback = match self.inner.engine.play().await {
      Ok(()) => PlaybackState::Playing,
      Err(e) => {
        log::warn!("Failed to unpause after loading {}: {}", track.id, e);
        PlaybackState::Paused
      }
    };

    state.queue.set_current(Some(index));
    state.playback = playback;
    state.position = Duration::ZERO;
    state.duration = track.duration();

    self
      .notifier()
      .log(format!("Playing track: {}", track.display_name()));
    self.notifier().post(Notification::StateChanged);
    self.notifier().post(Notification::NowPlaying {
      track: ScrobbleTrack::from_track(&track),
      track_id: track.id,
    });
    Ok(())
  }

  pub async fn pause(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    self.pause_locked(&mut state).await
  }

  async fn pause_locked(&self, state: &mut PlayerState) -> Result<(), PlaybackError> {
    if state.playback != PlaybackState::Playing {
      return Ok(());
    }
    self.inner.engine.pause().await?;
    state.playback = PlaybackState::Paused;
    self.notifier().log("Paused playback");
    self.notifier().post(Notification::StateChanged);
    Ok(())
  }

  pub async fn resume(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    self.resume_locked(&mut state).await
  }

  async fn resume_locked(&self, state: &mut PlayerState) -> Result<(), PlaybackError> {
    if state.playback != PlaybackState::Paused {
      return Ok(());
    }
    self.inner.engine.play().await?;
    state.playback = PlaybackState::Playing;
    self.notifier().log("Resumed playback");
    self.notifier().post(Notification::StateChanged);
    Ok(())
  }

  pub async fn stop(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    let result = self.inner.engine.stop().await;
    state.playback = PlaybackState::Stopped;
    state.position = Duration::ZERO;
    self.notifier().log("Stopped playback");
    self.notifier().post(Notification::StateChanged);
    Ok(result?)
  }

  /// Pause, resume, or start the current track when stopped.
  pub async fn toggle_play_pause(&self) -> Result<(), PlaybackError> {
    let mut state = self.inner.state.lock().await;
    match state.playback {
      PlaybackState::Playing => self.pause_locked(&mut state).await,
      PlaybackState::Paused => self.resume_locked(&mut state).await,
      PlaybackState::Stopped => self.play_current_locked(&mut state).await,
    }
  }

  pub async fn seek_forward(&self, seconds: f64) -> Result<(), PlaybackError> {
    self.seek(seconds.abs()).await
  }

  pub async fn seek_backward(&self, seconds: f64) -> Result<(), PlaybackError> {
    self.seek(-seconds.abs()).await
  }

  async fn seek(&self, seconds: f64) -> Result<(), PlaybackError> {
    let state = self.inner.state.lock().await;
    if state.queue.current_track().is_none() {
      return Err(QueueError::NothingPlaying.into());
    }
    log::debug!("Seeking {:+} seconds", seconds);
    self.inner.engine.seek_relative(seconds).await?;
    Ok(())
  }

  /// Set volume, 0.0-1.0. Values outside the range are clamped.
  pub async fn set_volume(&self, volume: f64) -> Result<(), PlaybackError> {
    let volume = volume.clamp(0.0, 1.0);
    let mut state = self.inner.state.lock().await;
    self.inner.engine.set_volume(volume * 100.0).await?;
    state.volume = volume;
    self
      .notifier()
      .log(format!("Set volume to {:.0}%", volume * 100.0));
    self.notifier().post(Notification::StateChanged);
    Ok(())
  }

  /// Turn shuffle on or off; returns the new setting.
  pub async fn toggle_shuffle(&self) -> bool {
    let mut state = self.inner.state.lock().await;
    let enabled = state.queue.toggle_shuffle();
    if enabled {
      self.notifier().log(format!(
        "Shuffle enabled - queue randomized ({} tracks)",
        state.queue.len()
      ));
    } else {
      self.notifier().log("Shuffle disabled - original order restored");
    }
    self.notifier().post(Notification::StateChanged);
    enabled
  }

  pub async fn set_repeat_mode(&self, mode: RepeatMode) {
    let mut state = self.inner.state.lock().await;
    state.queue.set_repeat_mode(mode);
    self.notifier().log(format!("Repeat mode: {}", mode));
    self.notifier().post(Notification::StateChanged);
  }

  /// Switch to the next repeat mode and return it.
  pub async fn cycle_repeat_mode(&self) -> RepeatMode {
    let mut state = self.inner.state.lock().await;
    let mode = state.queue.repeat_mode().next();
    state.queue.set_repeat_mode(mode);
    self.notifier().log(format!("Repeat mode: {}", mode));
    self.notifier().post(Notification::StateChanged);
    mode
  }

  pub async fn repeat_mode(&self) -> RepeatMode {
    self.inner.state.lock().await.queue.repeat_mode()
  }

  pub async fn is_shuffle_enabled(&self) -> bool {
    self.inner.state.lock().await.queue.is_shuffled()
  }

  pub async fn queue(&self) -> Vec<Track> {
    self.inner.state.lock().await.queue.tracks().to_vec()
  }

  pub async fn current_track(&self) -> Option<Track> {
    self.inner.state.lock().await.queue.current_track().cloned()
  }

  pub async fn current_index(&self) -> Option<usize> {
    self.inner.state.lock().await.queue.current_index()
  }

  pub async fn state(&self) -> PlaybackState {
    self.inner.state.lock().await.playback
  }

  pub async fn is_playing(&self) -> bool {
    self.state().await == PlaybackState::Playing
  }

  pub async fn position(&self) -> Duration {
    self.inner.state.lock().await.position
  }

  pub async fn duration(&self) -> Duration {
    self.inner.state.lock().await.duration
  }

  pub async fn volume(&self) -> f64 {
    self.inner.state.lock().await.volume
  }

  /// React to one playback event from the engine.
  pub async fn handle_domain_event(&self, event: DomainEvent) {
    match event.kind {
      DomainEventKind::TrackStarted => log::debug!("Track started: {:?}", event.track_id),
      DomainEventKind::TrackFinished => {
        self.scrobble_finished(event.track_id.as_deref()).await;
        self.schedule_advance();
      }
      DomainEventKind::TrackError => {
        let reason = match &event.detail {
          EventDetail::EndFile { error: Some(error), .. } => error.as_str(),
          _ => "unknown error",
        };
        self.notifier().log(format!("Track error: {}", reason));
        self.schedule_advance();
      }
      DomainEventKind::PositionUpdate => {
        let mut state = self.inner.state.lock().await;
        if let Some(position) = event.position {
          state.position = position;
        }
        if let Some(duration) = event.duration {
          state.duration = duration;
        }
      }
      DomainEventKind::StateChange => self.apply_state_change(&event.detail).await,
    }
  }

  async fn scrobble_finished(&self, track_id: Option<&str>) {
    let state = self.inner.state.lock().await;
    let track = match track_id {
      Some(id) => state.queue.find(id),
      None => state.queue.current_track(),
    }
    .cloned();
    drop(state);

    if let Some(track) = track {
      self
        .notifier()
        .log(format!("Scrobbling completed track: {}", track.display_name()));
      self.notifier().post(Notification::Scrobble {
        track: ScrobbleTrack::from_track(&track),
        track_id: track.id,
      });
    }
  }

  async fn apply_state_change(&self, detail: &EventDetail) {
    let mut state = self.inner.state.lock().await;
    let before = state.playback;

    match detail {
      EventDetail::Idle | EventDetail::Disconnected => {
        state.playback = PlaybackState::Stopped;
        state.position = Duration::ZERO;
      }
      EventDetail::Paused(paused) if state.playback != PlaybackState::Stopped => {
        state.playback = if *paused {
          PlaybackState::Paused
        } else {
          PlaybackState::Playing
        };
      }
      _ => {}
    }

    if matches!(detail, EventDetail::Disconnected) {
      self.notifier().log("Lost connection to the player");
    }
    if state.playback != before {
      self.notifier().post(Notification::StateChanged);
    }
  }

  /// Run `next_track` shortly, on its own task.
  fn schedule_advance(&self) {
    let controller = self.clone();
    let delay = self.inner.options.advance_delay;
    let cancel = self.inner.shutdown.clone();

    tokio::spawn(async move {
      tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
      }
      if let Err(e) = controller.next_track().await {
        controller.notifier().log(format!("Could not advance: {}", e));
      }
    });
  }
}
