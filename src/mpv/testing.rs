//! In-memory MPV stand-in for tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::ipc::{IpcOptions, MpvIpc};

type Responder = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// Fake MPV on the far end of a duplex pipe.
pub(crate) struct FakeMpv {
  pub ipc: Arc<MpvIpc>,
  commands: Arc<Mutex<Vec<Value>>>,
  emit_tx: async_channel::Sender<String>,
}

impl FakeMpv {
  /// Every command array received so far, in order.
  pub fn commands(&self) -> Vec<Value> {
    self.commands.lock().clone()
  }

  /// Commands whose name is `name`.
  pub fn commands_named(&self, name: &str) -> Vec<Value> {
    self
      .commands()
      .into_iter()
      .filter(|cmd| cmd[0] == name)
      .collect()
  }

  pub async fn wait_for_commands(&self, count: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
      while self.commands.lock().len() < count {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await;
    assert!(waited.is_ok(), "expected {} commands, got {:?}", count, self.commands());
  }

  /// Send an event line to the client.
  pub fn emit(&self, event: Value) {
    let _ = self.emit_tx.try_send(event.to_string());
  }

  /// Close the server side of the pipe.
  pub fn hang_up(&self) {
    self.emit_tx.close();
  }
}

/// Start a fake MPV that answers each request with `reply(command)`.
/// `Err(msg)` becomes an MPV error reply.
pub(crate) fn spawn_fake_mpv<F>(reply: F) -> FakeMpv
where
  F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
  let (client, server) = tokio::io::duplex(64 * 1024);
  let (client_rd, client_wr) = tokio::io::split(client);
  let ipc = Arc::new(MpvIpc::setup(client_rd, client_wr, IpcOptions::default()));

  let commands = Arc::new(Mutex::new(Vec::new()));
  let (emit_tx, emit_rx) = async_channel::unbounded::<String>();
  let reply: Arc<Responder> = Arc::new(reply);

  let recorded = commands.clone();
  tokio::spawn(async move {
    let (server_rd, mut server_wr) = tokio::io::split(server);
    let mut lines = BufReader::new(server_rd).lines();

    loop {
      let out = tokio::select! {
        line = lines.next_line() => {
          let Ok(Some(line)) = line else { break };
          let Ok(request) = serde_json::from_str::<Value>(&line) else { continue };
          let command = request["command"].as_array().cloned().unwrap_or_default();
          recorded.lock().push(Value::Array(command.clone()));

          let Some(request_id) = request.get("request_id").cloned() else { continue };
          match reply(&command) {
            Ok(data) => json!({"request_id": request_id, "error": "success", "data": data}),
            Err(message) => json!({"request_id": request_id, "error": message}),
          }
          .to_string()
        }
        event = emit_rx.recv() => {
          let Ok(event) = event else { break };
          event
        }
      };

      if server_wr.write_all(format!("{}\n", out).as_bytes()).await.is_err() {
        break;
      }
    }
  });

  FakeMpv {
    ipc,
    commands,
    emit_tx,
  }
}
