//! MPV module - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, spawning and supervision
//! - `ipc.rs` - Async IPC connection over a Unix socket
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - Typed MPV commands
//! - `events.rs` - MPV events to player domain events
//! - `engine.rs` - `PlaybackEngine` implementation tying the above together

mod client;
mod engine;
mod events;
mod ipc;
mod process;
mod protocol;
#[cfg(test)]
mod testing;

pub use client::{CommandError, MpvClient};
pub use engine::{MpvEngine, OBSERVED_PROPERTIES};
pub use events::{translate, DomainEvent, DomainEventKind, EndFileReason, EventDetail, UpstreamEvent};
pub use ipc::{IpcError, IpcOptions, MpvIpc, DEFAULT_COMMAND_TIMEOUT, DEFAULT_EVENT_CAPACITY};
pub use process::{
  baseline_args, default_socket_path, find_mpv, log_path_for, resolve_mpv, MpvProcess, ProcessError, ProcessOptions,
  Termination,
};
pub use protocol::{LoadMode, MpvCommand, MpvEvent, MpvMessage, MpvResponse, PropertyValue, SeekMode};
