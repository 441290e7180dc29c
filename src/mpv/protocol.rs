//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How `loadfile` treats the current playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
  /// Stop the current file and play the new one.
  #[default]
  Replace,
  /// Append to the playlist.
  Append,
  /// Append, and start playing if nothing is playing.
  AppendPlay,
}

impl LoadMode {
  pub fn as_str(self) -> &'static str {
    match self {
      LoadMode::Replace => "replace",
      LoadMode::Append => "append",
      LoadMode::AppendPlay => "append-play",
    }
  }
}

/// Reference point for `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
  Absolute,
  Relative,
  AbsolutePercent,
}

impl SeekMode {
  pub fn as_str(self) -> &'static str {
    match self {
      SeekMode::Absolute => "absolute",
      SeekMode::Relative => "relative",
      SeekMode::AbsolutePercent => "absolute-percent",
    }
  }
}

/// Command sent to MPV via IPC.
///
/// Without a request id the command is fire-and-forget and the key is left
/// out of the JSON entirely.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_id: Option<i64>,
}

impl MpvCommand {
  /// Create a command from a method name and positional arguments.
  pub fn new(name: &str, args: Vec<Value>) -> Self {
    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(Value::from(name));
    command.extend(args);
    Self {
      command,
      request_id: None,
    }
  }

  /// Tag the command with a request id so MPV replies to it.
  pub fn with_request_id(mut self, request_id: i64) -> Self {
    self.request_id = Some(request_id);
    self
  }

  /// Method name (first element of the command array).
  pub fn name(&self) -> &str {
    self.command.first().and_then(Value::as_str).unwrap_or("")
  }

  /// Load a file or URL.
  pub fn loadfile(url: &str, mode: LoadMode) -> Self {
    Self::new("loadfile", vec![url.into(), mode.as_str().into()])
  }

  /// Stop playback and clear the playlist.
  pub fn stop() -> Self {
    Self::new("stop", Vec::new())
  }

  /// Seek by `amount` (seconds, or percent for [`SeekMode::AbsolutePercent`]).
  pub fn seek(amount: f64, mode: SeekMode) -> Self {
    Self::new("seek", vec![amount.into(), mode.as_str().into()])
  }

  pub fn set_property(name: &str, value: impl Into<Value>) -> Self {
    Self::new("set_property", vec![name.into(), value.into()])
  }

  pub fn get_property(name: &str) -> Self {
    Self::new("get_property", vec![name.into()])
  }

  /// Observe a property; changes arrive as `property-change` events tagged with `id`.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new("observe_property", vec![id.into(), name.into()])
  }

  pub fn unobserve_property(id: i64) -> Self {
    Self::new("unobserve_property", vec![id.into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new("cycle", vec![property.into()])
  }

  pub fn playlist_next() -> Self {
    Self::new("playlist-next", Vec::new())
  }

  pub fn playlist_prev() -> Self {
    Self::new("playlist-prev", Vec::new())
  }

  pub fn playlist_clear() -> Self {
    Self::new("playlist-clear", Vec::new())
  }

  pub fn playlist_remove(index: usize) -> Self {
    Self::new("playlist-remove", vec![index.into()])
  }

  pub fn quit() -> Self {
    Self::new("quit", Vec::new())
  }

  pub fn quit_watch_later() -> Self {
    Self::new("quit-watch-later", Vec::new())
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  #[serde(default)]
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error.is_empty() || self.error == "success"
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "client-message").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data.
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub reason: Option<String>,
  /// Error text for end-file events with reason "error".
  pub file_error: Option<String>,
  /// Arguments for client-message events (from script-message command).
  pub args: Option<Vec<String>>,
}

impl MpvEvent {
  /// Event with just a name, as MPV sends for `pause`, `idle`, `seek`...
  pub fn named(event: &str) -> Self {
    Self {
      event: event.to_string(),
      ..Self::default()
    }
  }
}

/// Typed property values from MPV.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Bool(bool),
  Number(f64),
  String(String),
  /// Arrays and objects, kept as JSON.
  Node(Value),
  Null,
}

impl PropertyValue {
  /// Name of the variant, for error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      PropertyValue::Bool(_) => "bool",
      PropertyValue::Number(_) => "number",
      PropertyValue::String(_) => "string",
      PropertyValue::Node(_) => "node",
      PropertyValue::Null => "null",
    }
  }
}

impl From<Value> for PropertyValue {
  fn from(value: Value) -> Self {
    match value {
      Value::Bool(b) => PropertyValue::Bool(b),
      Value::Number(n) => match n.as_f64() {
        Some(f) => PropertyValue::Number(f),
        None => PropertyValue::Node(Value::Number(n)),
      },
      Value::String(s) => PropertyValue::String(s),
      Value::Array(_) | Value::Object(_) => PropertyValue::Node(value),
      Value::Null => PropertyValue::Null,
    }
  }
}

/// Message received from MPV IPC.
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
  /// Valid JSON that is neither a reply nor an event.
  Unknown,
}

impl MpvMessage {
  /// Classify a JSON line from MPV.
  ///
  /// A nonzero `request_id` marks a reply. MPV stamps `request_id: 0` on
  /// replies to commands sent without one, so those are not replies to us.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;

    let request_id = value.get("request_id").and_then(Value::as_i64).unwrap_or(0);
    if request_id != 0 {
      return Ok(MpvMessage::Response(serde_json::from_value(value)?));
    }

    if value.get("event").is_some_and(Value::is_string) {
      return Ok(MpvMessage::Event(serde_json::from_value(value)?));
    }

    Ok(MpvMessage::Unknown)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_command_serialization() {
    let cmd = MpvCommand::loadfile("http://example.com/track.flac", LoadMode::Replace).with_request_id(3);
    let json: Value = serde_json::to_value(&cmd).unwrap();
    assert_eq!(
      json,
      json!({"command": ["loadfile", "http://example.com/track.flac", "replace"], "request_id": 3})
    );
    assert_eq!(cmd.name(), "loadfile");
  }

  #[test]
  fn test_fire_and_forget_omits_request_id() {
    let json = serde_json::to_string(&MpvCommand::quit()).unwrap();
    assert_eq!(json, r#"{"command":["quit"]}"#);
  }

  #[test]
  fn test_response_parsing() {
    let json = r#"{"error":"success","data":null,"request_id":1}"#;
    let msg = MpvMessage::parse(json).unwrap();
    match msg {
      MpvMessage::Response(r) => {
        assert!(r.is_success());
        assert_eq!(r.request_id, 1);
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_error_response_is_not_success() {
    let json = r#"{"error":"property unavailable","request_id":9}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(!r.is_success());
        assert_eq!(r.data, None);
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_zero_request_id_is_not_a_reply() {
    let json = r#"{"error":"success","request_id":0}"#;
    assert!(matches!(MpvMessage::parse(json).unwrap(), MpvMessage::Unknown));
  }

  #[test]
  fn test_event_parsing() {
    let json = r#"{"event":"property-change","id":1,"name":"pause","data":false}"#;
    let msg = MpvMessage::parse(json).unwrap();
    match msg {
      MpvMessage::Event(e) => {
        assert_eq!(e.event, "property-change");
        assert_eq!(e.name, Some("pause".to_string()));
        assert_eq!(e.data, Some(json!(false)));
      }
      _ => panic!("Expected event"),
    }
  }

  #[test]
  fn test_end_file_event_parsing() {
    let json = r#"{"event":"end-file","reason":"error","playlist_entry_id":1,"file_error":"loading failed"}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Event(e) => {
        assert_eq!(e.reason.as_deref(), Some("error"));
        assert_eq!(e.file_error.as_deref(), Some("loading failed"));
      }
      _ => panic!("Expected event"),
    }
  }

  #[test]
  fn test_garbage_is_an_error() {
    assert!(MpvMessage::parse("not json").is_err());
  }

  #[test]
  fn test_property_value_from_json() {
    assert_eq!(PropertyValue::from(json!(true)), PropertyValue::Bool(true));
    assert_eq!(PropertyValue::from(json!(42)), PropertyValue::Number(42.0));
    assert_eq!(PropertyValue::from(json!("pulse")), PropertyValue::String("pulse".into()));
    assert_eq!(PropertyValue::from(Value::Null), PropertyValue::Null);
    assert_eq!(PropertyValue::from(json!([1, 2])).type_name(), "node");
  }
}
