//! [`PlaybackEngine`] backed by an MPV process.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::client::{CommandError, MpvClient};
use super::events::{translate, DomainEvent};
use super::ipc::{IpcError, MpvIpc};
use super::process::{MpvProcess, ProcessError, ProcessOptions};
use super::protocol::{LoadMode, MpvEvent};
use crate::channel::DropOldest;
use crate::player::PlaybackEngine;

/// Properties observed on every connection, by observer id.
pub const OBSERVED_PROPERTIES: [(i64, &str); 4] = [
  (1, "playback-time"),
  (2, "duration"),
  (3, "pause"),
  (4, "idle-active"),
];

pub struct MpvEngine {
  process: MpvProcess,
  client: RwLock<Option<MpvClient>>,
  /// Track the pump tags events with.
  current_track: Arc<Mutex<Option<String>>>,
  events: DropOldest<DomainEvent>,
  pump: Mutex<Option<JoinHandle<()>>>,
  /// Percent, applied on every (re)connect.
  initial_volume: f64,
}

impl MpvEngine {
  pub fn new(options: ProcessOptions, initial_volume: f64) -> Self {
    let events = DropOldest::new(options.ipc.event_capacity);
    Self {
      process: MpvProcess::new(options),
      client: RwLock::new(None),
      current_track: Arc::new(Mutex::new(None)),
      events,
      pump: Mutex::new(None),
      initial_volume: initial_volume.clamp(0.0, 100.0),
    }
  }

  pub fn process(&self) -> &MpvProcess {
    &self.process
  }

  /// The command client of the live connection.
  pub fn client(&self) -> Option<MpvClient> {
    self.client.read().clone()
  }

  /// Start MPV and wire its events into this engine.
  pub async fn start(&self, extra_args: &[String]) -> Result<(), ProcessError> {
    let ipc = self.process.start(extra_args).await?;
    self.attach(ipc).await;
    log::info!("MPV backend started");
    Ok(())
  }

  /// Restart MPV, for instance after it crashed.
  pub async fn restart(&self, extra_args: &[String]) -> Result<(), ProcessError> {
    self.detach().await;
    let ipc = self.process.restart(extra_args).await?;
    self.attach(ipc).await;
    Ok(())
  }

  /// Observe properties, apply the volume and start pumping events from `ipc`.
  pub(crate) async fn attach(&self, ipc: Arc<MpvIpc>) {
    let client = MpvClient::new(ipc.clone());

    for (id, name) in OBSERVED_PROPERTIES {
      if let Err(e) = client.observe_property(id, name).await {
        log::warn!("Failed to observe {}: {}", name, e);
      }
    }
    if let Err(e) = client.set_volume(self.initial_volume).await {
      log::warn!("Failed to set initial volume: {}", e);
    }

    match ipc.events() {
      Some(raw) => {
        let pump = tokio::spawn(Self::pump(raw, self.events.clone(), self.current_track.clone()));
        if let Some(previous) = self.pump.lock().replace(pump) {
          previous.abort();
        }
      }
      None => log::warn!("MPV connection has no event stream"),
    }

    *self.client.write() = Some(client);
  }

  async fn detach(&self) {
    let client = self.client.write().take();
    if let Some(client) = client {
      client.ipc().close().await;
    }
    let pump = self.pump.lock().take();
    if let Some(pump) = pump {
      let _ = pump.await;
    }
  }

  async fn pump(raw: Receiver<MpvEvent>, out: DropOldest<DomainEvent>, current_track: Arc<Mutex<Option<String>>>) {
    while let Ok(event) = raw.recv().await {
      let track_id = current_track.lock().clone();
      if let Some(domain) = translate(&event, track_id.as_deref()) {
        log::trace!("{} event for {:?}: {:?}", domain.kind, domain.track_id, domain.detail);
        Self::forward(&out, domain);
      }
    }

    log::info!("MPV event stream ended");
    let track_id = current_track.lock().clone();
    Self::forward(&out, DomainEvent::disconnected(track_id.as_deref()));
  }

  fn forward(out: &DropOldest<DomainEvent>, event: DomainEvent) {
    if let Ok(Some(dropped)) = out.push(event) {
      log::warn!(
        "Playback event queue full, dropped {} event ({} dropped so far)",
        dropped.kind,
        out.dropped()
      );
    }
  }

  fn connected_client(&self) -> Result<MpvClient, CommandError> {
    self.client().ok_or(CommandError::Ipc(IpcError::NotConnected))
  }
}

impl PlaybackEngine for MpvEngine {
  async fn load(&self, url: &str, track_id: &str) -> Result<(), CommandError> {
    let client = self.connected_client()?;
    let previous = self.current_track.lock().replace(track_id.to_string());

    if let Err(e) = client.load_file(url, LoadMode::Replace).await {
      *self.current_track.lock() = previous;
      return Err(e);
    }
    Ok(())
  }

  async fn play(&self) -> Result<(), CommandError> {
    self.connected_client()?.play().await
  }

  async fn pause(&self) -> Result<(), CommandError> {
    self.connected_client()?.pause().await
  }

  async fn stop(&self) -> Result<(), CommandError> {
    self.connected_client()?.stop().await
  }

  async fn seek_relative(&self, seconds: f64) -> Result<(), CommandError> {
    self.connected_client()?.seek_relative(seconds).await
  }

  async fn set_volume(&self, volume: f64) -> Result<(), CommandError> {
    self.connected_client()?.set_volume(volume).await
  }

  async fn position(&self) -> Result<Duration, CommandError> {
    self.connected_client()?.position().await
  }

  async fn duration(&self) -> Result<Duration, CommandError> {
    self.connected_client()?.duration().await
  }

  fn events(&self) -> Receiver<DomainEvent> {
    self.events.receiver()
  }

  async fn shutdown(&self) {
    self.detach().await;
    self.process.stop().await;
    self.events.close();
    log::info!("MPV backend stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::events::{DomainEventKind, EventDetail};
  use crate::mpv::testing::spawn_fake_mpv;
  use serde_json::{json, Value};

  async fn next_event(events: &Receiver<DomainEvent>) -> DomainEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
      .await
      .expect("timed out waiting for event")
      .expect("event stream closed")
  }

  #[tokio::test]
  async fn test_attach_observes_properties_and_sets_volume() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let engine = MpvEngine::new(ProcessOptions::default(), 70.0);
    engine.attach(fake.ipc.clone()).await;

    assert_eq!(
      fake.commands(),
      vec![
        json!(["observe_property", 1, "playback-time"]),
        json!(["observe_property", 2, "duration"]),
        json!(["observe_property", 3, "pause"]),
        json!(["observe_property", 4, "idle-active"]),
        json!(["set_property", "volume", 70.0]),
      ]
    );
    assert!(engine.client().is_some());
  }

  #[tokio::test]
  async fn test_events_carry_loaded_track_id() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let engine = MpvEngine::new(ProcessOptions::default(), 100.0);
    engine.attach(fake.ipc.clone()).await;
    let events = engine.events();

    engine.load("http://host/a", "track-a").await.unwrap();
    fake.emit(json!({"event": "end-file", "reason": "eof"}));

    let event = next_event(&events).await;
    assert_eq!(event.kind, DomainEventKind::TrackFinished);
    assert_eq!(event.track_id.as_deref(), Some("track-a"));
    assert_eq!(fake.commands_named("loadfile"), vec![json!(["loadfile", "http://host/a", "replace"])]);
  }

  #[tokio::test]
  async fn test_failed_load_keeps_previous_track_id() {
    let fake = spawn_fake_mpv(|cmd| match cmd[0].as_str() {
      Some("loadfile") if cmd[1] == "http://host/bad" => Err("loading failed".to_string()),
      _ => Ok(Value::Null),
    });
    let engine = MpvEngine::new(ProcessOptions::default(), 100.0);
    engine.attach(fake.ipc.clone()).await;
    let events = engine.events();

    engine.load("http://host/good", "good").await.unwrap();
    assert!(engine.load("http://host/bad", "bad").await.is_err());
    fake.emit(json!({"event": "pause"}));

    let event = next_event(&events).await;
    assert_eq!(event.detail, EventDetail::Paused(true));
    assert_eq!(event.track_id.as_deref(), Some("good"));
  }

  #[tokio::test]
  async fn test_lost_connection_emits_disconnected() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let engine = MpvEngine::new(ProcessOptions::default(), 100.0);
    engine.attach(fake.ipc.clone()).await;
    let events = engine.events();

    fake.hang_up();
    let event = next_event(&events).await;
    assert_eq!(event.kind, DomainEventKind::StateChange);
    assert_eq!(event.detail, EventDetail::Disconnected);

    assert!(matches!(
      engine.play().await,
      Err(CommandError::Ipc(IpcError::NotConnected))
    ));
  }

  #[tokio::test]
  async fn test_commands_without_connection_fail() {
    let engine = MpvEngine::new(ProcessOptions::default(), 100.0);
    assert!(matches!(
      engine.stop().await,
      Err(CommandError::Ipc(IpcError::NotConnected))
    ));
  }

  #[tokio::test]
  async fn test_shutdown_closes_event_stream() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let engine = MpvEngine::new(ProcessOptions::default(), 100.0);
    engine.attach(fake.ipc.clone()).await;
    let events = engine.events();

    engine.shutdown().await;

    // The pump reports the closed connection before the stream ends.
    assert_eq!(next_event(&events).await.detail, EventDetail::Disconnected);
    assert!(events.recv().await.is_err());
    assert!(!fake.ipc.is_connected());
  }
}
