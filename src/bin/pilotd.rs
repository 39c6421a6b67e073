//! pilotd - Tello pilot daemon
//!
//! This daemon:
//! 1. Connects to the drone (or the simulator with `stub://`)
//! 2. Turns the video stream on and publishes decoded frames
//! 3. Keeps the control link alive and holds the altitude floor once airborne
//! 4. Executes operator keys read from stdin (`q` quits)
//! 5. Runs text recognition on live frames and triggers the label macros

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tello_pilot::video::open_decoder;
use tello_pilot::{
    open_sink, OperatorLoop, PilotConfig, PilotSession, RecognizerRegistry, ScriptedRecognizer,
    StdinConsole, StopSignal, TextRegion,
};

const OPERATOR_IDLE: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Pilot a Tello drone from keys and recognized text")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "TELLO_PILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Drone address (`udp://192.168.10.1:8889`, or `stub://name` to simulate).
    #[arg(long)]
    drone: Option<String>,

    /// Text recognizer backend.
    #[arg(long, default_value = "stub")]
    recognizer: String,

    /// Detections replayed by the stub recognizer, one pass per entry (`A:0.95,B:0.9`).
    #[arg(long, value_delimiter = ',')]
    stub_detections: Vec<String>,

    /// Directory for macro photos.
    #[arg(long)]
    photo_dir: Option<PathBuf>,

    /// Run without the video channel.
    #[arg(long)]
    no_video: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PilotConfig::load_from(args.config.as_deref())?;
    if let Some(drone) = &args.drone {
        config.drone.addr = drone.clone();
    }
    if let Some(dir) = &args.photo_dir {
        config.detection.photo_dir = dir.clone();
    }
    if args.no_video {
        config.video.enabled = false;
    }
    config.validate()?;

    let recognizers = build_recognizers(&args)?;
    let sink = open_sink(&config.drone)?;
    let decoder = if config.video.enabled {
        Some(open_decoder(&config.video.decoder)?)
    } else {
        None
    };

    let session = PilotSession::start(&config, sink, decoder)?;
    log::info!(
        "pilotd running. drone={}, recognizer={}, photos in {}",
        config.drone.addr,
        args.recognizer,
        config.detection.photo_dir.display()
    );

    let stop = StopSignal::new();
    let on_interrupt = stop.clone();
    ctrlc::set_handler(move || on_interrupt.trigger()).context("set Ctrl-C handler")?;

    let mut console = StdinConsole::spawn().context("start stdin console")?;
    let mut operator = OperatorLoop::new(
        session.key_sender(),
        session.channel().cloned(),
        recognizers,
        session.detection_filter(),
        OPERATOR_IDLE,
    );
    log::info!("pilotd waiting for keys (t takeoff, l land, q quit)...");
    operator.run(&mut console, &stop);

    log::info!("shutting down...");
    session.shutdown()?;
    Ok(())
}

fn build_recognizers(args: &Args) -> Result<RecognizerRegistry> {
    let passes = args
        .stub_detections
        .iter()
        .map(|entry| parse_detection(entry).map(|region| vec![region]))
        .collect::<Result<Vec<_>>>()?;

    let mut registry = RecognizerRegistry::new();
    registry.register(ScriptedRecognizer::new(passes));
    registry
        .set_default(&args.recognizer)
        .context("select recognizer (available: stub)")?;
    registry.warm_up()?;
    Ok(registry)
}

fn parse_detection(entry: &str) -> Result<TextRegion> {
    let (text, confidence) = entry
        .split_once(':')
        .ok_or_else(|| anyhow!("detection '{}' must look like LABEL:CONFIDENCE", entry))?;
    let confidence: f32 = confidence
        .parse()
        .with_context(|| format!("invalid confidence in '{}'", entry))?;
    Ok(TextRegion::new(text, confidence))
}
