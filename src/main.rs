use std::error::Error;
use std::process;
use std::sync::Arc;

use clap::{command, Parser, ValueEnum, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use tonearm::config::PlayerConfig;
use tonearm::mpv::MpvEngine;
use tonearm::player::{
  MediaSource, PlaybackController, PlayerObserver, RepeatMode, ScrobbleTrack, Scrobbler, ServiceError,
};
use tonearm::track::Track;

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

const HELP: &str = "\
keys (followed by Enter):
  n  next track          p  previous track
  t  play/pause (or a single space)
  s  toggle shuffle      r  cycle repeat mode
  +  volume up           -  volume down
  >  seek forward        <  seek backward
  l  list queue          q  quit";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Files or URLs to play
  #[arg(value_name = "TRACK", required = true, value_hint = ValueHint::AnyPath)]
  tracks: Vec<String>,

  /// MPV executable
  ///
  /// [default: search PATH and common install locations]
  #[arg(long, value_name = "FILE", env = "TONEARM_MPV", value_hint = ValueHint::ExecutablePath)]
  mpv: Option<String>,

  /// Extra argument for MPV, may be given more than once
  #[arg(long = "mpv-arg", value_name = "ARG", allow_hyphen_values = true)]
  mpv_args: Vec<String>,

  /// IPC socket path
  ///
  /// [default: a per-process path in the runtime directory]
  #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
  socket: Option<String>,

  /// Initial volume in percent
  #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
  volume: u8,

  /// Repeat mode
  #[arg(long, value_enum, default_value_t = Repeat::Off)]
  repeat: Repeat,

  /// Shuffle the queue before playing
  #[arg(long, default_value_t = false)]
  shuffle: bool,

  /// Suppresses all output except warnings and errors.
  #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
  quiet: bool,

  /// Enable verbose logging
  ///
  /// Specify twice for trace logging.
  #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
  verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Repeat {
  Off,
  One,
  All,
}

impl From<Repeat> for RepeatMode {
  fn from(repeat: Repeat) -> Self {
    match repeat {
      Repeat::Off => RepeatMode::None,
      Repeat::One => RepeatMode::One,
      Repeat::All => RepeatMode::All,
    }
  }
}

/// Initializes the logger facade.
///
/// Command line flags win over `RUST_LOG`, which wins over the default of
/// `info`.
fn init_logger(args: &Args) {
  let mut logger =
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

  if args.quiet || args.verbose > 0 {
    let level = match args.verbose {
      0 => LevelFilter::Warn,
      1 => LevelFilter::Debug,
      _ => LevelFilter::Trace,
    };
    logger.filter_module(module_path!(), level);
  }

  logger.init();
}

/// Tracks given on the command line are their own URLs.
struct DirectSource;

impl MediaSource for DirectSource {
  fn stream_url(&self, track_id: &str) -> String {
    track_id.to_string()
  }
}

/// Writes plays to the log instead of a listening-history service.
struct LogScrobbler;

impl Scrobbler for LogScrobbler {
  fn now_playing(&self, _track_id: &str, track: &ScrobbleTrack) -> Result<(), ServiceError> {
    info!("now playing: {}", track.title);
    Ok(())
  }

  fn scrobble(&self, _track_id: &str, track: &ScrobbleTrack) -> Result<(), ServiceError> {
    debug!("finished: {} at {}", track.title, track.unix_timestamp());
    Ok(())
  }
}

#[derive(Default)]
struct TerminalObserver {
  finished: Notify,
}

impl PlayerObserver for TerminalObserver {
  fn end_of_queue(&self) {
    self.finished.notify_one();
  }
}

async fn print_queue(controller: &PlaybackController<MpvEngine>) {
  let current = controller.current_index().await;
  for (i, track) in controller.queue().await.iter().enumerate() {
    let marker = if Some(i) == current { '>' } else { ' ' };
    println!("{} {:3}. {}", marker, i + 1, track.display_name());
  }
  println!(
    "[{}] volume {:.0}%, repeat {}, shuffle {}",
    controller.state().await,
    controller.volume().await * 100.0,
    controller.repeat_mode().await,
    if controller.is_shuffle_enabled().await { "on" } else { "off" }
  );
}

/// Run one key command. Returns `false` to quit.
async fn handle_key(
  controller: &PlaybackController<MpvEngine>,
  line: &str,
  seek_step: f64,
) -> Result<bool, Box<dyn Error>> {
  let key = match line.trim() {
    "" if line.contains(' ') => "t",
    key => key,
  };

  match key {
    "n" => controller.next_track().await?,
    "p" => controller.previous_track().await?,
    "t" => controller.toggle_play_pause().await?,
    "s" => {
      controller.toggle_shuffle().await;
    }
    "r" => {
      controller.cycle_repeat_mode().await;
    }
    "+" => controller.set_volume(controller.volume().await + 0.1).await?,
    "-" => controller.set_volume(controller.volume().await - 0.1).await?,
    ">" => controller.seek_forward(seek_step).await?,
    "<" => controller.seek_backward(seek_step).await?,
    "l" => print_queue(controller).await,
    "q" => return Ok(false),
    "" => {}
    _ => println!("{HELP}"),
  }
  Ok(true)
}

async fn command_loop(
  controller: &PlaybackController<MpvEngine>,
  observer: &TerminalObserver,
  seek_step: f64,
) -> Result<(), Box<dyn Error>> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("interrupted");
        break;
      }
      _ = observer.finished.notified() => {
        info!("end of queue");
        break;
      }
      line = lines.next_line() => {
        let Some(line) = line? else {
          break;
        };
        match handle_key(controller, &line, seek_step).await {
          Ok(true) => {}
          Ok(false) => break,
          Err(e) => error!("{e}"),
        }
      }
    }
  }
  Ok(())
}

/// Main application loop.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
  let config = PlayerConfig {
    mpv_path: args.mpv.clone(),
    mpv_args: args.mpv_args.clone(),
    socket_path: args.socket.clone(),
    volume: args.volume,
    repeat: args.repeat.into(),
    shuffle: args.shuffle,
    ..PlayerConfig::default()
  };
  config.validate()?;

  let engine = MpvEngine::new(config.process_options(), f64::from(config.volume));
  engine.start(&config.mpv_args).await?;
  if let Some(client) = engine.client() {
    match client.version().await {
      Ok(version) => info!("connected to {version}"),
      Err(e) => debug!("could not query MPV version: {e}"),
    }
  }

  let observer = Arc::new(TerminalObserver::default());
  let controller = PlaybackController::new(
    engine,
    Arc::new(DirectSource),
    Arc::new(LogScrobbler),
    observer.clone(),
    config.controller_options(),
  );
  controller.start();

  let tracks = args.tracks.iter().map(|t| Track::from_location(t)).collect();
  controller.add_tracks_to_queue(tracks).await;
  controller.set_repeat_mode(config.repeat).await;
  if config.shuffle {
    controller.toggle_shuffle().await;
  }

  println!("{HELP}");
  let result = match controller.play_current().await {
    Ok(()) => command_loop(&controller, &observer, f64::from(config.seek_step)).await,
    Err(e) => Err(e.into()),
  };

  controller.shutdown().await;
  result
}

#[tokio::main]
async fn main() {
  let args = Args::parse();
  init_logger(&args);
  debug!("Command {:#?}", args);

  let cmd = command!();
  let name = cmd.get_name().to_string();
  let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
  info!("starting {name}/{version}");

  if let Err(e) = run(args).await {
    error!("{e}");
    process::exit(1);
  }
}
