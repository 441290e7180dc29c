//! Player configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mpv::{IpcOptions, ProcessOptions};
use crate::player::{ControllerOptions, RepeatMode};

/// Player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// IPC socket path (None = per-process path in the runtime dir).
  #[serde(default)]
  pub socket_path: Option<String>,

  /// Initial volume in percent.
  #[serde(default = "default_volume")]
  pub volume: u8,

  #[serde(default)]
  pub repeat: RepeatMode,

  #[serde(default)]
  pub shuffle: bool,

  /// How long to wait for MPV to answer a command, in milliseconds.
  #[serde(default = "default_command_timeout_ms")]
  pub command_timeout_ms: u64,

  /// Delay between spawning MPV and connecting to it, in milliseconds.
  #[serde(default = "default_settle_delay_ms")]
  pub settle_delay_ms: u64,

  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,

  /// Time MPV gets to exit after SIGTERM, in milliseconds.
  #[serde(default = "default_shutdown_grace_ms")]
  pub shutdown_grace_ms: u64,

  /// Events buffered before the oldest is dropped.
  #[serde(default = "default_event_capacity")]
  pub event_capacity: usize,

  /// Delay before advancing to the next track, in milliseconds.
  #[serde(default = "default_advance_delay_ms")]
  pub advance_delay_ms: u64,

  /// Seconds to skip per seek step.
  #[serde(default = "default_seek_step")]
  pub seek_step: u32,
}

fn default_volume() -> u8 {
  100
}

fn default_command_timeout_ms() -> u64 {
  5000
}

fn default_settle_delay_ms() -> u64 {
  500
}

fn default_connect_retries() -> u32 {
  10
}

fn default_shutdown_grace_ms() -> u64 {
  5000
}

fn default_event_capacity() -> usize {
  100
}

fn default_advance_delay_ms() -> u64 {
  100
}

fn default_seek_step() -> u32 {
  10
}

impl Default for PlayerConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      socket_path: None,
      volume: default_volume(),
      repeat: RepeatMode::default(),
      shuffle: false,
      command_timeout_ms: default_command_timeout_ms(),
      settle_delay_ms: default_settle_delay_ms(),
      connect_retries: default_connect_retries(),
      shutdown_grace_ms: default_shutdown_grace_ms(),
      event_capacity: default_event_capacity(),
      advance_delay_ms: default_advance_delay_ms(),
      seek_step: default_seek_step(),
    }
  }
}

impl PlayerConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.mpv_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
      return Err("MPV path cannot be empty".to_string());
    }
    if self.socket_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
      return Err("Socket path cannot be empty".to_string());
    }
    if self.volume > 100 {
      return Err("Volume must be between 0 and 100".to_string());
    }
    if !(100..=60_000).contains(&self.command_timeout_ms) {
      return Err("Command timeout must be between 100 and 60000 milliseconds".to_string());
    }
    if self.connect_retries < 1 || self.connect_retries > 100 {
      return Err("Connect retries must be between 1 and 100".to_string());
    }
    if self.event_capacity < 1 {
      return Err("Event capacity must be at least 1".to_string());
    }
    if self.seek_step < 1 || self.seek_step > 600 {
      return Err("Seek step must be between 1 and 600 seconds".to_string());
    }
    Ok(())
  }

  pub fn process_options(&self) -> ProcessOptions {
    let options = ProcessOptions {
      mpv_path: self.mpv_path.as_ref().map(PathBuf::from),
      settle_delay: Duration::from_millis(self.settle_delay_ms),
      connect_retries: self.connect_retries,
      shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
      ipc: IpcOptions {
        command_timeout: Duration::from_millis(self.command_timeout_ms),
        event_capacity: self.event_capacity,
      },
      ..ProcessOptions::default()
    };
    match &self.socket_path {
      Some(path) => options.with_socket_path(PathBuf::from(path)),
      None => options,
    }
  }

  pub fn controller_options(&self) -> ControllerOptions {
    ControllerOptions {
      advance_delay: Duration::from_millis(self.advance_delay_ms),
      notify_capacity: self.event_capacity,
      initial_volume: f64::from(self.volume) / 100.0,
    }
  }
}
