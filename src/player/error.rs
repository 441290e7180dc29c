use thiserror::Error;

use crate::mpv::{CommandError, ProcessError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
  #[error("Queue is empty")]
  Empty,
  #[error("Invalid queue index {index} (queue has {len} tracks)")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("No track currently playing")]
  NothingPlaying,
}

#[derive(Error, Debug)]
pub enum PlaybackError {
  #[error("Failed to load track {track_id}: {source}")]
  LoadFailed {
    track_id: String,
    #[source]
    source: CommandError,
  },
  #[error(transparent)]
  Queue(#[from] QueueError),
  #[error("Player command failed: {0}")]
  Command(#[from] CommandError),
  #[error("Player process error: {0}")]
  Process(#[from] ProcessError),
}
