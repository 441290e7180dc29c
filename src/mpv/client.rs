//! High-level MPV client with command methods.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::ipc::{IpcError, MpvIpc};
use super::protocol::{LoadMode, MpvCommand, PropertyValue, SeekMode};

#[derive(Error, Debug)]
pub enum CommandError {
  #[error("Property '{property}' is {found}, expected {expected}")]
  TypeMismatch {
    property: String,
    expected: &'static str,
    found: &'static str,
  },
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
}

impl CommandError {
  fn mismatch(property: &str, expected: &'static str, found: &PropertyValue) -> Self {
    CommandError::TypeMismatch {
      property: property.to_string(),
      expected,
      found: found.type_name(),
    }
  }
}

/// Typed MPV operations over a shared IPC connection.
pub struct MpvClient {
  ipc: Arc<MpvIpc>,
}

impl MpvClient {
  pub fn new(ipc: Arc<MpvIpc>) -> Self {
    Self { ipc }
  }

  pub fn ipc(&self) -> &Arc<MpvIpc> {
    &self.ipc
  }

  async fn send(&self, cmd: MpvCommand) -> Result<Value, CommandError> {
    Ok(self.ipc.send_command(cmd).await?)
  }

  /// Load a file or URL for playback.
  pub async fn load_file(&self, url: &str, mode: LoadMode) -> Result<(), CommandError> {
    log::info!("Loading file: {} ({})", url, mode.as_str());
    self.send(MpvCommand::loadfile(url, mode)).await?;
    Ok(())
  }

  pub async fn play(&self) -> Result<(), CommandError> {
    self.set_property("pause", false).await
  }

  pub async fn pause(&self) -> Result<(), CommandError> {
    self.set_property("pause", true).await
  }

  pub async fn toggle_pause(&self) -> Result<(), CommandError> {
    self.send(MpvCommand::cycle("pause")).await?;
    Ok(())
  }

  /// Stop playback. MPV stays alive in idle mode.
  pub async fn stop(&self) -> Result<(), CommandError> {
    self.send(MpvCommand::stop()).await?;
    Ok(())
  }

  /// Seek to absolute position in seconds.
  pub async fn seek_absolute(&self, seconds: f64) -> Result<(), CommandError> {
    self.send(MpvCommand::seek(seconds, SeekMode::Absolute)).await?;
    Ok(())
  }

  /// Seek relative to the current position (negative goes back).
  pub async fn seek_relative(&self, seconds: f64) -> Result<(), CommandError> {
    self.send(MpvCommand::seek(seconds, SeekMode::Relative)).await?;
    Ok(())
  }

  pub async fn seek_percent(&self, percent: f64) -> Result<(), CommandError> {
    self.send(MpvCommand::seek(percent, SeekMode::AbsolutePercent)).await?;
    Ok(())
  }

  /// Set volume (0-100). Values outside the range are clamped.
  pub async fn set_volume(&self, volume: f64) -> Result<(), CommandError> {
    self.set_property("volume", volume.clamp(0.0, 100.0)).await
  }

  /// Get current volume (0-100).
  pub async fn get_volume(&self) -> Result<f64, CommandError> {
    self.get_number("volume").await
  }

  pub async fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<(), CommandError> {
    self.send(MpvCommand::set_property(name, value)).await?;
    Ok(())
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<PropertyValue, CommandError> {
    Ok(PropertyValue::from(self.send(MpvCommand::get_property(name)).await?))
  }

  async fn get_number(&self, name: &str) -> Result<f64, CommandError> {
    match self.get_property(name).await? {
      PropertyValue::Number(n) => Ok(n),
      other => Err(CommandError::mismatch(name, "number", &other)),
    }
  }

  async fn get_bool(&self, name: &str) -> Result<bool, CommandError> {
    match self.get_property(name).await? {
      PropertyValue::Bool(b) => Ok(b),
      other => Err(CommandError::mismatch(name, "bool", &other)),
    }
  }

  async fn get_string(&self, name: &str) -> Result<String, CommandError> {
    match self.get_property(name).await? {
      PropertyValue::String(s) => Ok(s),
      other => Err(CommandError::mismatch(name, "string", &other)),
    }
  }

  async fn get_duration(&self, name: &str) -> Result<Duration, CommandError> {
    let seconds = self.get_number(name).await?;
    Ok(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO))
  }

  /// Observe a property for changes.
  /// Changes arrive on the IPC event stream as `property-change` events.
  pub async fn observe_property(&self, observer_id: i64, property: &str) -> Result<(), CommandError> {
    self.send(MpvCommand::observe_property(observer_id, property)).await?;
    Ok(())
  }

  pub async fn unobserve_property(&self, observer_id: i64) -> Result<(), CommandError> {
    self.send(MpvCommand::unobserve_property(observer_id)).await?;
    Ok(())
  }

  pub async fn playlist_append(&self, url: &str) -> Result<(), CommandError> {
    self.load_file(url, LoadMode::Append).await
  }

  pub async fn playlist_remove(&self, index: usize) -> Result<(), CommandError> {
    self.send(MpvCommand::playlist_remove(index)).await?;
    Ok(())
  }

  pub async fn playlist_clear(&self) -> Result<(), CommandError> {
    self.send(MpvCommand::playlist_clear()).await?;
    Ok(())
  }

  pub async fn playlist_next(&self) -> Result<(), CommandError> {
    self.send(MpvCommand::playlist_next()).await?;
    Ok(())
  }

  pub async fn playlist_prev(&self) -> Result<(), CommandError> {
    self.send(MpvCommand::playlist_prev()).await?;
    Ok(())
  }

  pub async fn playlist_count(&self) -> Result<usize, CommandError> {
    Ok(self.get_number("playlist-count").await?.max(0.0) as usize)
  }

  /// Current playlist position, `None` when nothing is selected.
  pub async fn playlist_pos(&self) -> Result<Option<usize>, CommandError> {
    let pos = self.get_number("playlist-pos").await?;
    Ok((pos >= 0.0).then_some(pos as usize))
  }

  pub async fn set_playlist_pos(&self, index: usize) -> Result<(), CommandError> {
    self.set_property("playlist-pos", index).await
  }

  pub async fn filename(&self) -> Result<String, CommandError> {
    self.get_string("filename").await
  }

  pub async fn path(&self) -> Result<String, CommandError> {
    self.get_string("path").await
  }

  /// MPV version string, e.g. "mpv 0.38.0".
  pub async fn version(&self) -> Result<String, CommandError> {
    self.get_string("mpv-version").await
  }

  pub async fn audio_device(&self) -> Result<String, CommandError> {
    self.get_string("audio-device").await
  }

  pub async fn set_audio_device(&self, device: &str) -> Result<(), CommandError> {
    self.set_property("audio-device", device).await
  }

  /// ReplayGain mode: "no", "track" or "album".
  pub async fn set_replay_gain(&self, mode: &str) -> Result<(), CommandError> {
    self.set_property("replaygain", mode).await
  }

  /// Playing means a file is loaded and not paused.
  pub async fn is_playing(&self) -> Result<bool, CommandError> {
    if self.get_bool("idle-active").await? {
      return Ok(false);
    }
    Ok(!self.get_bool("pause").await?)
  }

  /// Current playback position.
  pub async fn position(&self) -> Result<Duration, CommandError> {
    self.get_duration("playback-time").await
  }

  pub async fn duration(&self) -> Result<Duration, CommandError> {
    self.get_duration("duration").await
  }

  /// Ask MPV to quit. Does not wait for a reply.
  pub async fn quit(&self) -> Result<(), CommandError> {
    self.ipc.send_command_async(MpvCommand::quit()).await?;
    Ok(())
  }

  /// Quit and let MPV remember the position of the current file.
  pub async fn quit_watch_later(&self) -> Result<(), CommandError> {
    self.ipc.send_command_async(MpvCommand::quit_watch_later()).await?;
    Ok(())
  }
}

impl Clone for MpvClient {
  fn clone(&self) -> Self {
    Self {
      ipc: self.ipc.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::testing::spawn_fake_mpv;
  use serde_json::json;

  #[tokio::test]
  async fn test_commands_on_the_wire() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let client = MpvClient::new(fake.ipc.clone());

    client.load_file("http://host/a.flac", LoadMode::Replace).await.unwrap();
    client.pause().await.unwrap();
    client.play().await.unwrap();
    client.seek_relative(-10.0).await.unwrap();
    client.seek_percent(50.0).await.unwrap();
    client.set_volume(150.0).await.unwrap();
    client.playlist_append("http://host/b.flac").await.unwrap();

    assert_eq!(
      fake.commands(),
      vec![
        json!(["loadfile", "http://host/a.flac", "replace"]),
        json!(["set_property", "pause", true]),
        json!(["set_property", "pause", false]),
        json!(["seek", -10.0, "relative"]),
        json!(["seek", 50.0, "absolute-percent"]),
        json!(["set_property", "volume", 100.0]),
        json!(["loadfile", "http://host/b.flac", "append"]),
      ]
    );
  }

  #[tokio::test]
  async fn test_typed_getters() {
    let fake = spawn_fake_mpv(|cmd| match cmd[1].as_str() {
      Some("volume") => Ok(json!(70.0)),
      Some("mpv-version") => Ok(json!("mpv 0.38.0")),
      Some("playlist-pos") => Ok(json!(-1)),
      Some("playlist-count") => Ok(json!(3)),
      Some("playback-time") => Ok(json!(12.5)),
      Some("idle-active") => Ok(json!(false)),
      Some("pause") => Ok(json!(false)),
      _ => Err("property unavailable".to_string()),
    });
    let client = MpvClient::new(fake.ipc.clone());

    assert_eq!(client.get_volume().await.unwrap(), 70.0);
    assert_eq!(client.version().await.unwrap(), "mpv 0.38.0");
    assert_eq!(client.playlist_pos().await.unwrap(), None);
    assert_eq!(client.playlist_count().await.unwrap(), 3);
    assert_eq!(client.position().await.unwrap(), Duration::from_millis(12_500));
    assert!(client.is_playing().await.unwrap());
    assert!(matches!(
      client.audio_device().await,
      Err(CommandError::Ipc(IpcError::Mpv(_)))
    ));
  }

  #[tokio::test]
  async fn test_type_mismatch_is_an_error() {
    let fake = spawn_fake_mpv(|_| Ok(json!("not a number")));
    let client = MpvClient::new(fake.ipc.clone());

    match client.get_volume().await {
      Err(CommandError::TypeMismatch {
        property,
        expected,
        found,
      }) => {
        assert_eq!(property, "volume");
        assert_eq!(expected, "number");
        assert_eq!(found, "string");
      }
      other => panic!("Expected type mismatch, got {:?}", other),
    }

    // Missing data decodes to Null, which is not a string either.
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let client = MpvClient::new(fake.ipc.clone());
    assert!(matches!(
      client.filename().await,
      Err(CommandError::TypeMismatch { found: "null", .. })
    ));
  }

  #[tokio::test]
  async fn test_quit_is_fire_and_forget() {
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let client = MpvClient::new(fake.ipc.clone());

    client.quit().await.unwrap();
    fake.wait_for_commands(1).await;
    assert_eq!(fake.commands(), vec![json!(["quit"])]);
    assert_eq!(fake.ipc.pending_requests(), 0);
  }
}
