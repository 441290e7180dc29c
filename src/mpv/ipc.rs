//! Async IPC connection to MPV.
//!
//! One reader task splits the socket's line stream into replies for pending
//! requests and a bounded event queue. One writer task serializes outgoing
//! lines, so callers never contend on the socket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};
use crate::channel::DropOldest;

/// Default time to wait for a reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of undelivered events kept before the oldest is dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Not connected")]
  NotConnected,
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Failed to encode command: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("Command timeout after {0:?}")]
  Timeout(Duration),
  #[error("MPV error: {0}")]
  Mpv(String),
  #[error("Disconnected")]
  Disconnected,
}

/// Tunables for one connection.
#[derive(Debug, Clone, Copy)]
pub struct IpcOptions {
  pub command_timeout: Duration,
  pub event_capacity: usize,
}

impl Default for IpcOptions {
  fn default() -> Self {
    Self {
      command_timeout: DEFAULT_COMMAND_TIMEOUT,
      event_capacity: DEFAULT_EVENT_CAPACITY,
    }
  }
}

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<MpvResponse>;

/// IPC connection state shared between callers and the reader task.
struct IpcState {
  pending: HashMap<i64, PendingRequest>,
  connected: bool,
}

impl IpcState {
  /// Mark the connection dead. Dropping the senders wakes every waiter
  /// with a disconnect.
  fn disconnect(&mut self) {
    self.connected = false;
    self.pending.clear();
  }
}

/// Writer channel message.
enum WriteMessage {
  Line(Vec<u8>),
  Close,
}

/// Tasks and channels of one live socket connection.
struct Connection {
  write_tx: async_channel::Sender<WriteMessage>,
  events: DropOldest<MpvEvent>,
  cancel: CancellationToken,
  reader: JoinHandle<()>,
  writer: JoinHandle<()>,
}

/// Removes a pending entry however the request ends, including when the
/// caller's future is dropped mid-wait.
struct PendingGuard<'a> {
  state: &'a Mutex<IpcState>,
  request_id: i64,
}

impl Drop for PendingGuard<'_> {
  fn drop(&mut self) {
    self.state.lock().pending.remove(&self.request_id);
  }
}

/// MPV IPC connection.
pub struct MpvIpc {
  options: IpcOptions,
  state: Arc<Mutex<IpcState>>,
  conn: Mutex<Option<Connection>>,
  next_id: AtomicI64,
}

impl MpvIpc {
  /// Connect to the MPV socket at `path`, retrying while MPV creates it.
  pub async fn connect(path: &Path, options: IpcOptions, retry_count: u32) -> Result<Self, IpcError> {
    let mut last_error = None;

    for attempt in 0..retry_count.max(1) {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match Self::dial(path).await {
        Ok(stream) => {
          let (reader, writer) = stream.into_split();
          return Ok(Self::setup(reader, writer, options));
        }
        Err(e) => {
          log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| IpcError::ConnectionFailed("Unknown error".into())))
  }

  async fn dial(path: &Path) -> Result<tokio::net::UnixStream, IpcError> {
    tokio::net::UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(format!("{}: {}", path.display(), e)))
  }

  /// Run the protocol over an already-open byte stream.
  pub fn setup<R, W>(reader: R, writer: W, options: IpcOptions) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let state = Arc::new(Mutex::new(IpcState {
      pending: HashMap::new(),
      connected: true,
    }));
    let conn = Self::spawn_connection(reader, writer, &state, options);

    Self {
      options,
      state,
      conn: Mutex::new(Some(conn)),
      next_id: AtomicI64::new(1),
    }
  }

  fn spawn_connection<R, W>(reader: R, writer: W, state: &Arc<Mutex<IpcState>>, options: IpcOptions) -> Connection
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let events = DropOldest::new(options.event_capacity);
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();
    let cancel = CancellationToken::new();

    let reader = tokio::spawn(Self::reader_loop(reader, state.clone(), events.clone(), cancel.clone()));
    let writer = tokio::spawn(Self::writer_loop(writer, write_rx, state.clone()));

    Connection {
      write_tx,
      events,
      cancel,
      reader,
      writer,
    }
  }

  async fn reader_loop<R: AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<IpcState>>,
    events: DropOldest<MpvEvent>,
    cancel: CancellationToken,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      let read = tokio::select! {
        _ = cancel.cancelled() => break,
        read = buf_reader.read_line(&mut line) => read,
      };

      match read {
        Ok(0) => {
          log::info!("MPV IPC connection closed");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            Self::dispatch(trimmed, &state, &events);
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }

    state.lock().disconnect();
    events.close();
  }

  fn dispatch(line: &str, state: &Mutex<IpcState>, events: &DropOldest<MpvEvent>) {
    match MpvMessage::parse(line) {
      Ok(MpvMessage::Response(response)) => {
        let waiter = state.lock().pending.remove(&response.request_id);
        match waiter {
          Some(tx) => {
            let _ = tx.send(response);
          }
          None => log::debug!("Dropping reply for request_id={} (no longer pending)", response.request_id),
        }
      }
      Ok(MpvMessage::Event(event)) => {
        log::trace!("MPV reader: received event {:?}", event);
        if let Ok(Some(oldest)) = events.push(event) {
          log::warn!(
            "MPV event queue full, dropped '{}' event ({} dropped so far)",
            oldest.event,
            events.dropped()
          );
        }
      }
      Ok(MpvMessage::Unknown) => log::debug!("Ignoring MPV message: {}", line),
      Err(e) => log::debug!("Failed to parse MPV message: {} - {}", e, line),
    }
  }

  async fn writer_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: async_channel::Receiver<WriteMessage>,
    state: Arc<Mutex<IpcState>>,
  ) {
    log::debug!("MPV IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Line(data) => {
          if let Err(e) = Self::write_line(&mut writer, &data).await {
            log::error!("MPV IPC write error: {}", e);
            state.lock().disconnect();
            break;
          }
        }
        WriteMessage::Close => {
          log::debug!("MPV IPC writer closing");
          break;
        }
      }
    }

    let _ = writer.shutdown().await;
  }

  async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
  }

  fn write_channel(&self) -> Result<async_channel::Sender<WriteMessage>, IpcError> {
    if !self.state.lock().connected {
      return Err(IpcError::NotConnected);
    }
    self
      .conn
      .lock()
      .as_ref()
      .map(|conn| conn.write_tx.clone())
      .ok_or(IpcError::NotConnected)
  }

  /// Send a command and wait for its reply, returning the reply's `data`.
  pub async fn send_command(&self, cmd: MpvCommand) -> Result<Value, IpcError> {
    self.send_command_with_timeout(cmd, self.options.command_timeout).await
  }

  /// Like [`send_command`](Self::send_command) with a custom timeout.
  pub async fn send_command_with_timeout(&self, cmd: MpvCommand, timeout: Duration) -> Result<Value, IpcError> {
    let write_tx = self.write_channel()?;
    let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let name = cmd.name().to_string();
    let json = serde_json::to_vec(&cmd.with_request_id(request_id))?;

    let (tx, rx) = oneshot::channel();
    self.state.lock().pending.insert(request_id, tx);
    let _guard = PendingGuard {
      state: &self.state,
      request_id,
    };

    log::debug!("Sending MPV command '{}' (request_id={})", name, request_id);
    write_tx
      .send(WriteMessage::Line(json))
      .await
      .map_err(|_| IpcError::Disconnected)?;

    let response = match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(response)) => response,
      Ok(Err(_)) => return Err(IpcError::Disconnected),
      Err(_) => {
        log::warn!("MPV command '{}' timed out after {:?}, request_id={}", name, timeout, request_id);
        return Err(IpcError::Timeout(timeout));
      }
    };

    if !response.is_success() {
      return Err(IpcError::Mpv(response.error));
    }
    Ok(response.data.unwrap_or(Value::Null))
  }

  /// Send a command without a request id. No reply is awaited.
  pub async fn send_command_async(&self, cmd: MpvCommand) -> Result<(), IpcError> {
    let write_tx = self.write_channel()?;
    let json = serde_json::to_vec(&cmd)?;
    write_tx
      .send(WriteMessage::Line(json))
      .await
      .map_err(|_| IpcError::Disconnected)
  }

  /// Receiver for property changes and other events of the current
  /// connection. A reconnect replaces the queue, so fetch it again afterwards.
  pub fn events(&self) -> Option<Receiver<MpvEvent>> {
    self.conn.lock().as_ref().map(|conn| conn.events.receiver())
  }

  pub fn is_connected(&self) -> bool {
    self.state.lock().connected
  }

  /// Number of requests still waiting for a reply.
  pub fn pending_requests(&self) -> usize {
    self.state.lock().pending.len()
  }

  /// Events evicted from the current connection's queue because it was full.
  pub fn dropped_events(&self) -> u64 {
    self.conn.lock().as_ref().map_or(0, |conn| conn.events.dropped())
  }

  /// Close the connection. Safe to call more than once.
  pub async fn close(&self) {
    let conn = self.conn.lock().take();
    let Some(conn) = conn else {
      return;
    };

    conn.cancel.cancel();
    let _ = conn.write_tx.send(WriteMessage::Close).await;
    if let Err(e) = conn.reader.await {
      log::error!("MPV IPC reader task failed: {}", e);
    }
    let _ = conn.writer.await;
    conn.events.close();
    self.state.lock().disconnect();
    log::debug!("MPV IPC connection closed");
  }

  /// Drop the current connection and dial `path` again with a fresh
  /// pending table and event queue.
  pub async fn reconnect(&self, path: &Path) -> Result<(), IpcError> {
    self.close().await;

    let stream = Self::dial(path).await?;
    let (reader, writer) = stream.into_split();

    {
      let mut state = self.state.lock();
      state.pending.clear();
      state.connected = true;
    }
    let conn = Self::spawn_connection(reader, writer, &self.state, self.options);
    *self.conn.lock() = Some(conn);
    log::info!("MPV IPC reconnected to {}", path.display());
    Ok(())
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    if let Some(conn) = self.conn.get_mut().take() {
      conn.cancel.cancel();
      conn.write_tx.close();
    }
  }
}
