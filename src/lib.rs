//! Terminal music player core that drives an external MPV process over its
//! JSON IPC socket.
//!
//! - `mpv` - process supervision, IPC transport, typed commands and event
//!   translation
//! - `player` - queue, shuffle/repeat and the playback state machine
//! - `channel` - bounded drop-oldest queue shared by both
//! - `config` - tunables with defaults and validation

pub mod channel;
pub mod config;
pub mod mpv;
pub mod player;
pub mod track;

pub use config::PlayerConfig;
pub use track::Track;
