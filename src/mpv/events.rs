//! Translation of MPV events into player domain events.
//!
//! Stateless: the caller supplies the id of the track it believes is loaded.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use super::protocol::MpvEvent;

/// MPV event names this player understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEvent {
  StartFile,
  FileLoaded,
  PlaybackRestart,
  EndFile,
  Pause,
  Unpause,
  Idle,
  Seek,
  PropertyChange,
  AudioReconfig,
  Other,
}

impl UpstreamEvent {
  pub fn from_name(name: &str) -> Self {
    match name {
      "start-file" => UpstreamEvent::StartFile,
      "file-loaded" => UpstreamEvent::FileLoaded,
      "playback-restart" => UpstreamEvent::PlaybackRestart,
      "end-file" => UpstreamEvent::EndFile,
      "pause" => UpstreamEvent::Pause,
      "unpause" => UpstreamEvent::Unpause,
      "idle" => UpstreamEvent::Idle,
      "seek" => UpstreamEvent::Seek,
      "property-change" => UpstreamEvent::PropertyChange,
      "audio-reconfig" => UpstreamEvent::AudioReconfig,
      _ => UpstreamEvent::Other,
    }
  }
}

/// `reason` field of an `end-file` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFileReason {
  Eof,
  Stop,
  Quit,
  Error,
  Redirect,
  Unknown,
}

impl EndFileReason {
  pub fn from_reason(reason: Option<&str>) -> Self {
    match reason {
      Some("eof") => EndFileReason::Eof,
      Some("stop") => EndFileReason::Stop,
      Some("quit") => EndFileReason::Quit,
      Some("error") => EndFileReason::Error,
      Some("redirect") => EndFileReason::Redirect,
      _ => EndFileReason::Unknown,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventKind {
  TrackStarted,
  TrackFinished,
  TrackError,
  PositionUpdate,
  StateChange,
}

impl fmt::Display for DomainEventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      DomainEventKind::TrackStarted => "Track Started",
      DomainEventKind::TrackFinished => "Track Finished",
      DomainEventKind::TrackError => "Track Error",
      DomainEventKind::PositionUpdate => "Position Update",
      DomainEventKind::StateChange => "State Change",
    };
    f.write_str(name)
  }
}

/// Extra information carried by a domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
  None,
  EndFile {
    reason: EndFileReason,
    error: Option<String>,
  },
  Paused(bool),
  Idle,
  Seeking,
  AudioReconfig,
  /// The connection to the player went away.
  Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
  pub kind: DomainEventKind,
  pub track_id: Option<String>,
  pub position: Option<Duration>,
  pub duration: Option<Duration>,
  pub detail: EventDetail,
}

impl DomainEvent {
  pub fn new(kind: DomainEventKind, track_id: Option<&str>) -> Self {
    Self {
      kind,
      track_id: track_id.map(str::to_string),
      position: None,
      duration: None,
      detail: EventDetail::None,
    }
  }

  pub fn with_detail(mut self, detail: EventDetail) -> Self {
    self.detail = detail;
    self
  }

  /// Synthetic event for a lost player connection.
  pub fn disconnected(track_id: Option<&str>) -> Self {
    Self::new(DomainEventKind::StateChange, track_id).with_detail(EventDetail::Disconnected)
  }
}

fn seconds(value: Option<&Value>) -> Option<Duration> {
  value
    .and_then(Value::as_f64)
    .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

/// Map one MPV event to a domain event. `None` for events the player does
/// not care about.
pub fn translate(event: &MpvEvent, track_id: Option<&str>) -> Option<DomainEvent> {
  use DomainEventKind::*;

  let domain = match UpstreamEvent::from_name(&event.event) {
    UpstreamEvent::StartFile | UpstreamEvent::FileLoaded | UpstreamEvent::PlaybackRestart => {
      DomainEvent::new(TrackStarted, track_id)
    }
    UpstreamEvent::EndFile => {
      let reason = EndFileReason::from_reason(event.reason.as_deref());
      let kind = match reason {
        EndFileReason::Error => TrackError,
        EndFileReason::Stop | EndFileReason::Quit => StateChange,
        EndFileReason::Eof | EndFileReason::Redirect | EndFileReason::Unknown => TrackFinished,
      };
      DomainEvent::new(kind, track_id).with_detail(EventDetail::EndFile {
        reason,
        error: event.file_error.clone(),
      })
    }
    UpstreamEvent::Pause => DomainEvent::new(StateChange, track_id).with_detail(EventDetail::Paused(true)),
    UpstreamEvent::Unpause => DomainEvent::new(StateChange, track_id).with_detail(EventDetail::Paused(false)),
    UpstreamEvent::Idle => DomainEvent::new(StateChange, track_id).with_detail(EventDetail::Idle),
    UpstreamEvent::Seek => DomainEvent::new(PositionUpdate, track_id).with_detail(EventDetail::Seeking),
    UpstreamEvent::AudioReconfig => DomainEvent::new(StateChange, track_id).with_detail(EventDetail::AudioReconfig),
    UpstreamEvent::PropertyChange => return translate_property(event, track_id),
    UpstreamEvent::Other => return None,
  };
  Some(domain)
}

fn translate_property(event: &MpvEvent, track_id: Option<&str>) -> Option<DomainEvent> {
  let data = event.data.as_ref();
  match event.name.as_deref()? {
    "playback-time" | "time-pos" => {
      let mut domain = DomainEvent::new(DomainEventKind::PositionUpdate, track_id);
      domain.position = Some(seconds(data)?);
      Some(domain)
    }
    "duration" => {
      let mut domain = DomainEvent::new(DomainEventKind::PositionUpdate, track_id);
      domain.duration = Some(seconds(data)?);
      Some(domain)
    }
    "pause" => {
      let paused = data.and_then(Value::as_bool)?;
      Some(DomainEvent::new(DomainEventKind::StateChange, track_id).with_detail(EventDetail::Paused(paused)))
    }
    "idle-active" => match data.and_then(Value::as_bool) {
      Some(true) => Some(DomainEvent::new(DomainEventKind::StateChange, track_id).with_detail(EventDetail::Idle)),
      _ => None,
    },
    _ => None,
  }
}
