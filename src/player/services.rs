//! Collaborators the player reports to or pulls from.

use std::time::{Duration, SystemTime};

use crate::track::Track;

pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves track ids to playable URLs.
pub trait MediaSource: Send + Sync {
  /// Primary (usually transcoded) stream URL.
  fn stream_url(&self, track_id: &str) -> String;

  /// URL to try when the stream URL fails to load, typically the original
  /// file download.
  fn fallback_url(&self, _track_id: &str) -> Option<String> {
    None
  }
}

/// Listening-history service (Last.fm, ListenBrainz, the library server...).
pub trait Scrobbler: Send + Sync {
  fn now_playing(&self, track_id: &str, track: &ScrobbleTrack) -> Result<(), ServiceError>;
  fn scrobble(&self, track_id: &str, track: &ScrobbleTrack) -> Result<(), ServiceError>;
}

/// Front end hooks. Every method defaults to doing nothing.
pub trait PlayerObserver: Send + Sync {
  fn log(&self, _message: &str) {}
  fn state_changed(&self) {}
  fn end_of_queue(&self) {}
}

/// Scrobbler that drops everything.
pub struct NoScrobbler;

impl Scrobbler for NoScrobbler {
  fn now_playing(&self, _track_id: &str, _track: &ScrobbleTrack) -> Result<(), ServiceError> {
    Ok(())
  }

  fn scrobble(&self, _track_id: &str, _track: &ScrobbleTrack) -> Result<(), ServiceError> {
    Ok(())
  }
}

/// What a listening-history service needs to know about a play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobbleTrack {
  pub artist: String,
  pub title: String,
  pub album: String,
  pub duration: Duration,
  pub track_number: Option<u32>,
  pub timestamp: SystemTime,
}

impl ScrobbleTrack {
  pub fn from_track(track: &Track) -> Self {
    Self::played_at(track, SystemTime::now())
  }

  pub fn played_at(track: &Track, timestamp: SystemTime) -> Self {
    Self {
      artist: track.artist.clone(),
      title: track.title.clone(),
      album: track.album.clone(),
      duration: track.duration(),
      track_number: track.track_number,
      timestamp,
    }
  }

  /// Seconds since the Unix epoch, as scrobble APIs expect.
  pub fn unix_timestamp(&self) -> u64 {
    self
      .timestamp
      .duration_since(SystemTime::UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scrobble_track_from_track() {
    let track = Track {
      id: "42".to_string(),
      title: "So What".to_string(),
      artist: "Miles Davis".to_string(),
      album: "Kind of Blue".to_string(),
      duration: 562,
      track_number: Some(1),
      format_hint: Some("flac".to_string()),
    };
    let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let scrobble = ScrobbleTrack::played_at(&track, at);

    assert_eq!(scrobble.title, "So What");
    assert_eq!(scrobble.duration, Duration::from_secs(562));
    assert_eq!(scrobble.track_number, Some(1));
    assert_eq!(scrobble.unix_timestamp(), 1_700_000_000);
  }
}
