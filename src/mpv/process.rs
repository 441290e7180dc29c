//! MPV process detection, spawning and supervision.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;

use super::ipc::{IpcError, IpcOptions, MpvIpc};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("MPV is already running")]
  AlreadyRunning,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("Failed to connect to MPV: {0}")]
  Connect(#[source] IpcError),
  #[error("MPV is not running")]
  NotRunning,
}

/// Where and how MPV gets launched.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
  /// Custom MPV executable (None = auto-detect).
  pub mpv_path: Option<PathBuf>,
  pub socket_path: PathBuf,
  pub log_path: PathBuf,
  /// Pause between spawning and the first connect attempt.
  pub settle_delay: Duration,
  pub connect_retries: u32,
  /// How long MPV gets to exit after SIGTERM before the group is killed.
  pub shutdown_grace: Duration,
  pub restart_delay: Duration,
  pub ipc: IpcOptions,
}

impl Default for ProcessOptions {
  fn default() -> Self {
    let socket_path = default_socket_path();
    Self {
      mpv_path: None,
      log_path: log_path_for(&socket_path),
      socket_path,
      settle_delay: Duration::from_millis(500),
      connect_retries: 10,
      shutdown_grace: Duration::from_secs(5),
      restart_delay: Duration::from_millis(500),
      ipc: IpcOptions::default(),
    }
  }
}

impl ProcessOptions {
  /// Use `path` for the socket; the log file follows it.
  pub fn with_socket_path(mut self, path: PathBuf) -> Self {
    self.log_path = log_path_for(&path);
    self.socket_path = path;
    self
  }
}

/// Per-process socket path in the runtime dir (or temp dir).
pub fn default_socket_path() -> PathBuf {
  let secs = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0);
  let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
  dir.join(format!("tonearm-mpv-{}-{}.sock", std::process::id(), secs))
}

/// The log file sits next to the socket: `<socket>.log`.
pub fn log_path_for(socket_path: &Path) -> PathBuf {
  let mut path = socket_path.as_os_str().to_owned();
  path.push(".log");
  PathBuf::from(path)
}

/// Flags every MPV instance is started with. Caller arguments go after these
/// so they can override any of them.
pub fn baseline_args(socket_path: &Path, log_path: &Path) -> Vec<String> {
  vec![
    "--no-video".to_string(),
    "--idle".to_string(),
    "--no-terminal".to_string(),
    "--msg-level=all=error".to_string(),
    "--audio-buffer=0.5".to_string(),
    "--gapless-audio=yes".to_string(),
    "--replaygain=track".to_string(),
    "--volume=70".to_string(),
    format!("--input-ipc-server={}", socket_path.display()),
    format!("--log-file={}", log_path.display()),
  ]
}

/// Locate an `mpv` binary on PATH or in the usual install directories.
pub fn find_mpv() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  let common_paths = [
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(target_os = "macos"))]
  let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv", "/snap/bin/mpv"];

  common_paths.into_iter().map(PathBuf::from).find(|p| p.exists())
}

/// Resolve the executable to launch. A configured path must exist; only
/// without one do we search.
pub fn resolve_mpv(configured: Option<&Path>) -> Result<PathBuf, ProcessError> {
  match configured {
    Some(path) => which::which(path).map_err(|e| {
      log::error!("Configured MPV path {:?} is not usable: {}", path, e);
      ProcessError::NotFound
    }),
    None => find_mpv().ok_or(ProcessError::NotFound),
  }
}

fn remove_if_exists(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => log::debug!("Removed {}", path.display()),
    Err(e) if e.kind() == ErrorKind::NotFound => {}
    Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
  }
}

/// How a child went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
  AlreadyExited,
  /// Exited within the grace period after SIGTERM.
  Graceful,
  /// Needed SIGKILL on its process group.
  Forced,
}

/// A spawned child in its own process group. A background task reaps it and
/// publishes the exit status.
pub(crate) struct ChildHandle {
  pid: Option<u32>,
  exit_rx: watch::Receiver<Option<ExitStatus>>,
}

impl ChildHandle {
  pub(crate) fn spawn(mut cmd: Command) -> std::io::Result<Self> {
    cmd
      .process_group(0)
      .kill_on_drop(true)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null());

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(async move {
      match child.wait().await {
        Ok(status) => {
          let _ = exit_tx.send(Some(status));
        }
        Err(e) => log::error!("Failed to wait for child {:?}: {}", pid, e),
      }
    });

    Ok(Self { pid, exit_rx })
  }

  pub(crate) fn pid(&self) -> Option<u32> {
    self.pid
  }

  pub(crate) fn has_exited(&self) -> bool {
    self.exit_rx.borrow().is_some() || self.exit_rx.has_changed().is_err()
  }

  /// Wait for the child to exit. `None` if the status could not be collected.
  pub(crate) async fn wait(&self) -> Option<ExitStatus> {
    let mut rx = self.exit_rx.clone();
    let status = rx.wait_for(Option::is_some).await.ok().and_then(|status| *status);
    status
  }

  async fn wait_timeout(&self, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, self.wait()).await.is_ok()
  }

  fn send(&self, signal: Signal) {
    let Some(pid) = self.pid else {
      return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), signal) {
      log::debug!("kill({}, {:?}) failed: {}", pid, signal, e);
    }
  }

  /// SIGKILL the whole process group.
  pub(crate) fn kill_group(&self) {
    let Some(pid) = self.pid else {
      return;
    };
    if let Err(e) = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
      log::debug!("killpg({}) failed: {}", pid, e);
    }
    self.send(Signal::SIGKILL);
  }

  /// SIGTERM, wait up to `grace`, then SIGKILL the process group.
  pub(crate) async fn terminate(&self, grace: Duration) -> Termination {
    if self.has_exited() {
      return Termination::AlreadyExited;
    }

    self.send(Signal::SIGTERM);
    if self.wait_timeout(grace).await {
      return Termination::Graceful;
    }

    log::warn!("Process {:?} ignored SIGTERM for {:?}, killing its group", self.pid, grace);
    self.kill_group();
    if !self.wait_timeout(Duration::from_secs(1)).await {
      log::error!("Process {:?} still alive after SIGKILL", self.pid);
    }
    Termination::Forced
  }
}

/// A live MPV instance and its IPC connection.
struct Running {
  child: Arc<ChildHandle>,
  ipc: Arc<MpvIpc>,
}

/// Supervises one MPV process: spawn, connect, monitor, terminate.
pub struct MpvProcess {
  options: ProcessOptions,
  running: Arc<Mutex<Option<Running>>>,
  // Serializes start/stop/restart
  lifecycle: tokio::sync::Mutex<()>,
}

impl MpvProcess {
  pub fn new(options: ProcessOptions) -> Self {
    Self {
      options,
      running: Arc::new(Mutex::new(None)),
      lifecycle: tokio::sync::Mutex::new(()),
    }
  }

  pub fn options(&self) -> &ProcessOptions {
    &self.options
  }

  pub fn socket_path(&self) -> &Path {
    &self.options.socket_path
  }

  pub fn log_path(&self) -> &Path {
    &self.options.log_path
  }

  pub fn is_running(&self) -> bool {
    self.running.lock().is_some()
  }

  /// The live IPC connection, if MPV is running.
  pub fn ipc(&self) -> Option<Arc<MpvIpc>> {
    self.running.lock().as_ref().map(|r| r.ipc.clone())
  }

  pub fn pid(&self) -> Option<u32> {
    self.running.lock().as_ref().and_then(|r| r.child.pid())
  }

  /// Spawn MPV and connect to its IPC socket.
  pub async fn start(&self, extra_args: &[String]) -> Result<Arc<MpvIpc>, ProcessError> {
    let _lifecycle = self.lifecycle.lock().await;
    if self.is_running() {
      return Err(ProcessError::AlreadyRunning);
    }

    let mpv_exe = resolve_mpv(self.options.mpv_path.as_deref())?;
    let socket_path = &self.options.socket_path;
    remove_if_exists(socket_path);

    log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, socket_path.display());
    if !extra_args.is_empty() {
      log::info!("Extra MPV args: {:?}", extra_args);
    }

    let mut cmd = Command::new(&mpv_exe);
    cmd
      .args(baseline_args(socket_path, &self.options.log_path))
      .args(extra_args);
    let child = Arc::new(ChildHandle::spawn(cmd)?);

    // Give MPV a moment to create the socket
    tokio::time::sleep(self.options.settle_delay).await;

    let ipc = match MpvIpc::connect(socket_path, self.options.ipc, self.options.connect_retries).await {
      Ok(ipc) => Arc::new(ipc),
      Err(e) => {
        log::error!("Could not connect to MPV at {}: {}", socket_path.display(), e);
        child.terminate(self.options.shutdown_grace).await;
        self.remove_files();
        return Err(ProcessError::Connect(e));
      }
    };

    *self.running.lock() = Some(Running {
      child: child.clone(),
      ipc: ipc.clone(),
    });
    tokio::spawn(Self::monitor(
      child,
      self.running.clone(),
      socket_path.clone(),
      self.options.log_path.clone(),
    ));

    log::info!("MPV started (pid: {:?})", self.pid());
    Ok(ipc)
  }

  /// Watches for MPV exiting on its own. Deliberate stops unregister the
  /// child first, so only crashes get cleaned up here.
  async fn monitor(
    child: Arc<ChildHandle>,
    running: Arc<Mutex<Option<Running>>>,
    socket_path: PathBuf,
    log_path: PathBuf,
  ) {
    let status = child.wait().await;

    let crashed = {
      let mut running = running.lock();
      match running.as_ref() {
        Some(r) if Arc::ptr_eq(&r.child, &child) => running.take(),
        _ => None,
      }
    };
    let Some(crashed) = crashed else {
      return;
    };

    match status {
      Some(status) => log::warn!("MPV exited unexpectedly: {}", status),
      None => log::warn!("MPV exited unexpectedly"),
    }
    crashed.ipc.close().await;
    remove_if_exists(&socket_path);
    remove_if_exists(&log_path);
  }

  /// Stop MPV. Does nothing when it is not running.
  pub async fn stop(&self) {
    let _lifecycle = self.lifecycle.lock().await;
    let Some(running) = self.running.lock().take() else {
      log::debug!("stop(): MPV not running");
      return;
    };

    log::info!("Stopping MPV (pid: {:?})", running.child.pid());
    running.ipc.close().await;

    match running.child.terminate(self.options.shutdown_grace).await {
      Termination::AlreadyExited => log::info!("MPV had already exited"),
      Termination::Graceful => log::info!("MPV exited after SIGTERM"),
      Termination::Forced => log::warn!("MPV was killed"),
    }

    self.remove_files();
    log::info!("MPV stopped");
  }

  /// Stop, wait briefly, start again.
  pub async fn restart(&self, extra_args: &[String]) -> Result<Arc<MpvIpc>, ProcessError> {
    self.stop().await;
    tokio::time::sleep(self.options.restart_delay).await;
    self.start(extra_args).await
  }

  fn remove_files(&self) {
    remove_if_exists(&self.options.socket_path);
    remove_if_exists(&self.options.log_path);
  }
}

impl Drop for MpvProcess {
  fn drop(&mut self) {
    let running = self.running.lock().take();
    if let Some(running) = running {
      log::debug!("MpvProcess dropped while running, killing MPV");
      running.child.kill_group();
      self.remove_files();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::testing::spawn_fake_mpv;
  use serde_json::Value;

  fn sleeper() -> Arc<ChildHandle> {
    let mut cmd = Command::new("sleep");
    cmd.arg("30");
    Arc::new(ChildHandle::spawn(cmd).unwrap())
  }

  fn crashing() -> Arc<ChildHandle> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "exit 3"]);
    Arc::new(ChildHandle::spawn(cmd).unwrap())
  }

  /// Register `child` as the running MPV, along with the files it would own.
  fn adopt(process: &MpvProcess, child: Arc<ChildHandle>, ipc: Arc<MpvIpc>) {
    std::fs::write(process.socket_path(), b"").unwrap();
    std::fs::write(process.log_path(), b"log").unwrap();
    *process.running.lock() = Some(Running { child, ipc });
  }

  fn files_exist(process: &MpvProcess) -> (bool, bool) {
    (process.socket_path().exists(), process.log_path().exists())
  }

  fn options_in(dir: &Path) -> ProcessOptions {
    ProcessOptions {
      settle_delay: Duration::from_millis(10),
      connect_retries: 2,
      shutdown_grace: Duration::from_millis(500),
      ..ProcessOptions::default()
    }
    .with_socket_path(dir.join("mpv.sock"))
  }

  #[test]
  fn test_baseline_args() {
    let args = baseline_args(Path::new("/run/x.sock"), Path::new("/run/x.sock.log"));
    assert_eq!(args.len(), 10);
    assert!(args.contains(&"--idle".to_string()));
    assert!(args.contains(&"--no-video".to_string()));
    assert!(args.contains(&"--input-ipc-server=/run/x.sock".to_string()));
    assert!(args.contains(&"--log-file=/run/x.sock.log".to_string()));
  }

  #[test]
  fn test_log_path_follows_socket() {
    let options = ProcessOptions::default().with_socket_path(PathBuf::from("/tmp/a.sock"));
    assert_eq!(options.log_path, PathBuf::from("/tmp/a.sock.log"));

    let default = ProcessOptions::default();
    assert_eq!(default.log_path, log_path_for(&default.socket_path));
    let name = default.socket_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("tonearm-mpv-"));
  }

  #[tokio::test]
  async fn test_missing_binary_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let process = MpvProcess::new(ProcessOptions {
      mpv_path: Some(dir.path().join("no-such-mpv")),
      ..options_in(dir.path())
    });

    assert!(matches!(process.start(&[]).await, Err(ProcessError::NotFound)));
    assert!(!process.is_running());
  }

  #[tokio::test]
  async fn test_stop_when_not_running_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let process = MpvProcess::new(options_in(dir.path()));

    process.stop().await;
    process.stop().await;
    assert!(!process.is_running());
    assert!(process.ipc().is_none());
  }

  #[tokio::test]
  async fn test_start_fails_when_socket_never_appears() {
    let dir = tempfile::tempdir().unwrap();
    // sh rejects the mpv flags and exits without ever creating the socket.
    let process = MpvProcess::new(ProcessOptions {
      mpv_path: Some(PathBuf::from("/bin/sh")),
      ..options_in(dir.path())
    });

    let result = process.start(&[]).await;
    assert!(matches!(result, Err(ProcessError::Connect(_))), "got {:?}", result.err());
    assert!(!process.is_running());
    assert!(!dir.path().join("mpv.sock").exists());
  }

  #[tokio::test]
  async fn test_terminate_graceful() {
    let mut cmd = Command::new("sleep");
    cmd.arg("30");
    let child = ChildHandle::spawn(cmd).unwrap();

    assert_eq!(child.terminate(Duration::from_secs(5)).await, Termination::Graceful);
    assert!(child.has_exited());
    assert_eq!(child.terminate(Duration::from_secs(5)).await, Termination::AlreadyExited);
  }

  #[tokio::test]
  async fn test_terminate_kills_group_ignoring_sigterm() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "trap '' TERM; sleep 30"]);
    let child = ChildHandle::spawn(cmd).unwrap();
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(child.terminate(Duration::from_millis(200)).await, Termination::Forced);
    assert!(child.has_exited());
  }

  #[tokio::test]
  async fn test_stop_twice_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let process = MpvProcess::new(options_in(dir.path()));
    let child = sleeper();
    adopt(&process, child.clone(), fake.ipc.clone());
    assert!(process.is_running());
    assert_eq!(process.pid(), child.pid());

    process.stop().await;
    assert!(!process.is_running());
    assert!(child.has_exited());
    assert!(!fake.ipc.is_connected());
    assert_eq!(files_exist(&process), (false, false));

    process.stop().await;
    assert!(!process.is_running());
  }

  #[tokio::test]
  async fn test_drop_kills_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let process = MpvProcess::new(options_in(dir.path()));
    let child = sleeper();
    adopt(&process, child.clone(), fake.ipc.clone());

    drop(process);

    assert!(child.wait_timeout(Duration::from_secs(2)).await);
    assert!(!dir.path().join("mpv.sock").exists());
    assert!(!dir.path().join("mpv.sock.log").exists());
  }

  #[tokio::test]
  async fn test_monitor_cleans_up_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let process = MpvProcess::new(options_in(dir.path()));
    let child = crashing();
    adopt(&process, child.clone(), fake.ipc.clone());

    MpvProcess::monitor(
      child,
      process.running.clone(),
      process.socket_path().to_path_buf(),
      process.log_path().to_path_buf(),
    )
    .await;

    assert!(!process.is_running());
    assert!(process.ipc().is_none());
    assert!(!fake.ipc.is_connected());
    assert_eq!(files_exist(&process), (false, false));
  }

  #[tokio::test]
  async fn test_monitor_ignores_replaced_child() {
    let dir = tempfile::tempdir().unwrap();
    let fake = spawn_fake_mpv(|_| Ok(Value::Null));
    let process = MpvProcess::new(options_in(dir.path()));
    let old = crashing();
    let current = sleeper();
    adopt(&process, current.clone(), fake.ipc.clone());

    MpvProcess::monitor(
      old,
      process.running.clone(),
      process.socket_path().to_path_buf(),
      process.log_path().to_path_buf(),
    )
    .await;

    assert!(process.is_running());
    assert_eq!(process.pid(), current.pid());
    assert!(fake.ipc.is_connected());
    assert_eq!(files_exist(&process), (true, true));

    process.stop().await;
    assert!(current.has_exited());
  }
}
