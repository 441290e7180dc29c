//! Track metadata.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A playable track as the library server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub artist: String,
  #[serde(default)]
  pub album: String,
  /// Length in whole seconds, 0 when unknown.
  #[serde(default)]
  pub duration: u32,
  #[serde(default)]
  pub track_number: Option<u32>,
  /// Container/codec suffix such as "flac" or "mp3".
  #[serde(default)]
  pub format_hint: Option<String>,
}

impl Track {
  pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      ..Self::default()
    }
  }

  pub fn duration(&self) -> Duration {
    Duration::from_secs(u64::from(self.duration))
  }

  /// "Artist - Title", or just the title when the artist is unknown.
  pub fn display_name(&self) -> String {
    if self.artist.is_empty() {
      self.title.clone()
    } else {
      format!("{} - {}", self.artist, self.title)
    }
  }

  /// A track for a local path or URL given on the command line. The location
  /// doubles as the id.
  pub fn from_location(location: &str) -> Self {
    let name = location
      .rsplit('/')
      .find(|segment| !segment.is_empty())
      .unwrap_or(location);
    let path = Path::new(name);
    let title = path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| name.to_string());
    let format_hint = path
      .extension()
      .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

    Self {
      id: location.to_string(),
      title,
      format_hint,
      ..Self::default()
    }
  }
}
