//! Play queue with shuffle and repeat.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
  #[default]
  None,
  One,
  All,
}

impl RepeatMode {
  /// None -> All -> One -> None.
  pub fn next(self) -> Self {
    match self {
      RepeatMode::None => RepeatMode::All,
      RepeatMode::All => RepeatMode::One,
      RepeatMode::One => RepeatMode::None,
    }
  }
}

impl fmt::Display for RepeatMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RepeatMode::None => "off",
      RepeatMode::One => "one",
      RepeatMode::All => "all",
    };
    f.write_str(name)
  }
}

/// Fisher-Yates shuffle in place.
pub fn shuffle<T>(items: &mut [T]) {
  for i in (1..items.len()).rev() {
    let j = fastrand::usize(..=i);
    items.swap(i, j);
  }
}

/// Index to play after `current`, if any.
pub fn next_index(current: Option<usize>, len: usize, mode: RepeatMode) -> Option<usize> {
  if len == 0 {
    return None;
  }
  let Some(current) = current else {
    return Some(0);
  };
  match mode {
    RepeatMode::One => Some(current),
    RepeatMode::All => Some((current + 1) % len),
    RepeatMode::None => (current + 1 < len).then_some(current + 1),
  }
}

/// Index to play before `current`, if any.
pub fn previous_index(current: Option<usize>, len: usize, mode: RepeatMode) -> Option<usize> {
  let current = current?;
  if len == 0 {
    return None;
  }
  match mode {
    RepeatMode::One => Some(current),
    RepeatMode::All => Some((current + len - 1) % len),
    RepeatMode::None => current.checked_sub(1),
  }
}

/// Ordered tracks plus the position of the current one.
///
/// While shuffle is on, `snapshot` keeps the order from before shuffling and
/// always holds the same tracks as the live queue.
#[derive(Debug, Clone, Default)]
pub struct Queue {
  tracks: Vec<Track>,
  current: Option<usize>,
  snapshot: Option<Vec<Track>>,
  repeat: RepeatMode,
}

impl Queue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.tracks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tracks.is_empty()
  }

  pub fn tracks(&self) -> &[Track] {
    &self.tracks
  }

  pub fn get(&self, index: usize) -> Option<&Track> {
    self.tracks.get(index)
  }

  pub fn current_index(&self) -> Option<usize> {
    self.current
  }

  pub fn current_track(&self) -> Option<&Track> {
    self.current.and_then(|i| self.tracks.get(i))
  }

  /// Out-of-range indexes clear the current position.
  pub fn set_current(&mut self, index: Option<usize>) {
    self.current = index.filter(|&i| i < self.tracks.len());
  }

  pub fn repeat_mode(&self) -> RepeatMode {
    self.repeat
  }

  pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
    self.repeat = mode;
  }

  pub fn is_shuffled(&self) -> bool {
    self.snapshot.is_some()
  }

  pub fn position_of(&self, track_id: &str) -> Option<usize> {
    self.tracks.iter().position(|t| t.id == track_id)
  }

  pub fn find(&self, track_id: &str) -> Option<&Track> {
    self.tracks.iter().find(|t| t.id == track_id)
  }

  pub fn next_index(&self) -> Option<usize> {
    next_index(self.current, self.tracks.len(), self.repeat)
  }

  pub fn previous_index(&self) -> Option<usize> {
    previous_index(self.current, self.tracks.len(), self.repeat)
  }

  pub fn push(&mut self, track: Track) {
    self.extend(vec![track]);
  }

  /// Append tracks. With shuffle on, only the appended region is shuffled
  /// and the snapshot gets the tracks in their given order.
  pub fn extend(&mut self, tracks: Vec<Track>) {
    let start = self.tracks.len();
    if let Some(snapshot) = self.snapshot.as_mut() {
      snapshot.extend(tracks.iter().cloned());
      self.tracks.extend(tracks);
      shuffle(&mut self.tracks[start..]);
    } else {
      self.tracks.extend(tracks);
    }
  }

  /// Remove the track at `index`. Returns `None` when out of range.
  ///
  /// Tracks before the current one shift it down. Removing the current
  /// track leaves the position on whatever slid into its place, or clears
  /// it at the end of the queue.
  pub fn remove(&mut self, index: usize) -> Option<Track> {
    if index >= self.tracks.len() {
      return None;
    }
    let removed = self.tracks.remove(index);

    if let Some(current) = self.current {
      if index < current {
        self.current = Some(current - 1);
      } else if index == current && current >= self.tracks.len() {
        self.current = None;
      }
    }

    if let Some(snapshot) = self.snapshot.as_mut() {
      if let Some(pos) = snapshot.iter().position(|t| t.id == removed.id) {
        snapshot.remove(pos);
      }
    }
    Some(removed)
  }

  pub fn clear(&mut self) {
    self.tracks.clear();
    self.current = None;
    if let Some(snapshot) = self.snapshot.as_mut() {
      snapshot.clear();
    }
  }

  /// Turn shuffle on or off and return the new setting. The current track
  /// keeps playing from its new position.
  pub fn toggle_shuffle(&mut self) -> bool {
    let current_id = self.current_track().map(|t| t.id.clone());

    match self.snapshot.take() {
      Some(mut original) => {
        original.truncate(self.tracks.len());
        self.tracks = original;
      }
      None => {
        self.snapshot = Some(self.tracks.clone());
        shuffle(&mut self.tracks);
      }
    }

    if let Some(id) = current_id {
      self.current = self.position_of(&id);
    }
    self.is_shuffled()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tracks(n: usize) -> Vec<Track> {
    (0..n).map(|i| Track::new(format!("t{}", i), format!("Track {}", i))).collect()
  }

  fn ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.id.clone()).collect()
  }

  fn sorted_ids(tracks: &[Track]) -> Vec<String> {
    let mut ids = ids(tracks);
    ids.sort();
    ids
  }

  #[test]
  fn test_shuffle_preserves_multiset() {
    for n in 0..=50 {
      let mut items: Vec<usize> = (0..n).collect();
      shuffle(&mut items);
      let mut sorted = items.clone();
      sorted.sort_unstable();
      assert_eq!(sorted, (0..n).collect::<Vec<_>>(), "n = {}", n);
    }
  }

  #[test]
  fn test_next_index_rules() {
    assert_eq!(next_index(Some(0), 3, RepeatMode::None), Some(1));
    assert_eq!(next_index(Some(2), 3, RepeatMode::None), None);
    assert_eq!(next_index(Some(2), 3, RepeatMode::All), Some(0));
    assert_eq!(next_index(Some(1), 3, RepeatMode::One), Some(1));
    assert_eq!(next_index(None, 3, RepeatMode::None), Some(0));
    assert_eq!(next_index(None, 0, RepeatMode::All), None);
    assert_eq!(next_index(Some(0), 1, RepeatMode::All), Some(0));
  }

  #[test]
  fn test_previous_index_rules() {
    assert_eq!(previous_index(Some(1), 3, RepeatMode::None), Some(0));
    assert_eq!(previous_index(Some(0), 3, RepeatMode::None), None);
    assert_eq!(previous_index(Some(0), 3, RepeatMode::All), Some(2));
    assert_eq!(previous_index(Some(2), 3, RepeatMode::One), Some(2));
    assert_eq!(previous_index(None, 3, RepeatMode::All), None);
  }

  #[test]
  fn test_repeat_mode_cycle() {
    assert_eq!(RepeatMode::None.next(), RepeatMode::All);
    assert_eq!(RepeatMode::All.next(), RepeatMode::One);
    assert_eq!(RepeatMode::One.next(), RepeatMode::None);
    assert_eq!(RepeatMode::None.to_string(), "off");
  }

  #[test]
  fn test_appends_keep_order() {
    let mut queue = Queue::new();
    queue.push(Track::new("a", "A"));
    queue.extend(vec![Track::new("b", "B"), Track::new("c", "C")]);
    assert_eq!(ids(queue.tracks()), vec!["a", "b", "c"]);
    assert_eq!(queue.current_index(), None);
  }

  #[test]
  fn test_shuffle_round_trip_restores_order() {
    let mut queue = Queue::new();
    queue.extend(tracks(20));
    queue.set_current(Some(7));

    assert!(queue.toggle_shuffle());
    assert_eq!(sorted_ids(queue.tracks()), sorted_ids(&tracks(20)));
    assert_eq!(queue.current_track().unwrap().id, "t7");

    assert!(!queue.toggle_shuffle());
    assert_eq!(ids(queue.tracks()), ids(&tracks(20)));
    assert_eq!(queue.current_index(), Some(7));
  }

  #[test]
  fn test_extend_while_shuffled_only_shuffles_new_region() {
    let mut queue = Queue::new();
    queue.extend(tracks(5));
    queue.toggle_shuffle();
    let before = ids(queue.tracks());

    let extra: Vec<Track> = (5..10).map(|i| Track::new(format!("t{}", i), "x")).collect();
    queue.extend(extra);

    assert_eq!(ids(&queue.tracks()[..5]), before);
    assert_eq!(sorted_ids(&queue.tracks()[5..]), sorted_ids(&tracks(10)[5..]));

    queue.toggle_shuffle();
    assert_eq!(ids(queue.tracks()), ids(&tracks(10)));
  }

  #[test]
  fn test_remove_adjusts_current() {
    let mut queue = Queue::new();
    queue.extend(tracks(4));
    queue.set_current(Some(2));

    assert_eq!(queue.remove(9), None);
    assert_eq!(queue.remove(0).unwrap().id, "t0");
    assert_eq!(queue.current_index(), Some(1));
    assert_eq!(queue.current_track().unwrap().id, "t2");

    // Removing a later track leaves the position alone.
    queue.remove(2);
    assert_eq!(queue.current_index(), Some(1));

    // Removing the last, current track clears the position.
    queue.remove(1);
    assert_eq!(queue.current_index(), None);
    assert_eq!(ids(queue.tracks()), vec!["t1"]);
  }

  #[test]
  fn test_remove_while_shuffled_keeps_snapshot_in_sync() {
    let mut queue = Queue::new();
    queue.extend(tracks(6));
    queue.toggle_shuffle();

    let victim = queue.position_of("t3").unwrap();
    queue.remove(victim);
    queue.toggle_shuffle();

    assert_eq!(ids(queue.tracks()), vec!["t0", "t1", "t2", "t4", "t5"]);
  }

  #[test]
  fn test_clear() {
    let mut queue = Queue::new();
    queue.extend(tracks(3));
    queue.set_current(Some(1));
    queue.toggle_shuffle();
    queue.clear();

    assert!(queue.is_empty());
    assert_eq!(queue.current_index(), None);
    assert!(!queue.toggle_shuffle());
    assert!(queue.is_empty());
  }

  #[test]
  fn test_set_current_out_of_range() {
    let mut queue = Queue::new();
    queue.extend(tracks(2));
    queue.set_current(Some(5));
    assert_eq!(queue.current_index(), None);
    assert_eq!(queue.find("t1").unwrap().title, "Track 1");
  }
}
