//! Flight-command sinks.
//!
//! This module provides the boundary to the physical drone:
//! - `FlightSink`: primitive commands and queries, callable from any loop
//! - `TelloSink`: Tello text SDK over UDP (`udp://host:port`)
//! - `SimulatedDrone`: in-process drone for tests and dry runs (`stub://name`)
//!
//! Every call may fail with a transport-level error. Callers in the pilot
//! pipeline log those failures and carry on with their loop.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::config::DroneSettings;
use crate::PilotError;

pub mod sim;
pub mod tello;

pub use sim::SimulatedDrone;
pub use tello::TelloSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    fn sdk_word(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    fn sdk_letter(self) -> char {
        match self {
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
        }
    }
}

/// A primitive command the drone executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlightCommand {
    /// Enter SDK mode. Also serves as the link heartbeat.
    Connect,
    Takeoff,
    Land,
    Emergency,
    Move(Direction, u32),
    Rotate(Rotation, u32),
    Flip(FlipDirection),
    StreamOn,
    StreamOff,
}

impl FlightCommand {
    /// Text form understood by the Tello SDK.
    pub fn sdk_text(&self) -> String {
        match self {
            FlightCommand::Connect => "command".to_string(),
            FlightCommand::Takeoff => "takeoff".to_string(),
            FlightCommand::Land => "land".to_string(),
            FlightCommand::Emergency => "emergency".to_string(),
            FlightCommand::Move(direction, cm) => format!("{} {}", direction.sdk_word(), cm),
            FlightCommand::Rotate(Rotation::Clockwise, deg) => format!("cw {}", deg),
            FlightCommand::Rotate(Rotation::CounterClockwise, deg) => format!("ccw {}", deg),
            FlightCommand::Flip(direction) => format!("flip {}", direction.sdk_letter()),
            FlightCommand::StreamOn => "streamon".to_string(),
            FlightCommand::StreamOff => "streamoff".to_string(),
        }
    }

    /// Short kind name, stable across arguments.
    pub fn kind(&self) -> &'static str {
        match self {
            FlightCommand::Connect => "connect",
            FlightCommand::Takeoff => "takeoff",
            FlightCommand::Land => "land",
            FlightCommand::Emergency => "emergency",
            FlightCommand::Move(..) => "move",
            FlightCommand::Rotate(..) => "rotate",
            FlightCommand::Flip(_) => "flip",
            FlightCommand::StreamOn => "streamon",
            FlightCommand::StreamOff => "streamoff",
        }
    }
}

impl fmt::Display for FlightCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sdk_text())
    }
}

/// Read-only telemetry queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Query {
    AltitudeCm,
    BatteryPercent,
}

impl Query {
    pub fn sdk_text(self) -> &'static str {
        match self {
            Query::AltitudeCm => "height?",
            Query::BatteryPercent => "battery?",
        }
    }
}

/// Flight-command sink shared by every loop of a session.
///
/// Implementations serialise their own wire exchanges; callers never hold
/// session locks while calling in.
pub trait FlightSink: Send + Sync {
    /// Sink identifier for logs.
    fn name(&self) -> &str;

    /// Execute a primitive command.
    fn send(&self, command: &FlightCommand) -> Result<(), PilotError>;

    /// Run a telemetry query.
    fn query(&self, query: Query) -> Result<i32, PilotError>;

    fn connect(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::Connect)
    }

    /// Heartbeat that keeps the control link from timing out.
    fn keep_alive(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::Connect)
    }

    fn takeoff(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::Takeoff)
    }

    fn land(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::Land)
    }

    fn emergency(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::Emergency)
    }

    fn move_by(&self, direction: Direction, distance_cm: u32) -> Result<(), PilotError> {
        self.send(&FlightCommand::Move(direction, distance_cm))
    }

    fn rotate(&self, rotation: Rotation, degrees: u32) -> Result<(), PilotError> {
        self.send(&FlightCommand::Rotate(rotation, degrees))
    }

    fn flip(&self, direction: FlipDirection) -> Result<(), PilotError> {
        self.send(&FlightCommand::Flip(direction))
    }

    fn stream_on(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::StreamOn)
    }

    fn stream_off(&self) -> Result<(), PilotError> {
        self.send(&FlightCommand::StreamOff)
    }

    fn altitude_cm(&self) -> Result<i32, PilotError> {
        self.query(Query::AltitudeCm)
    }

    fn battery_percent(&self) -> Result<i32, PilotError> {
        self.query(Query::BatteryPercent)
    }
}

/// Open the sink named by `settings.addr`.
///
/// `stub://` selects the simulated drone; `udp://host:port` the Tello SDK.
pub fn open_sink(settings: &DroneSettings) -> Result<Arc<dyn FlightSink>> {
    if settings.addr.starts_with("stub://") {
        log::info!("flight sink: simulated drone ({})", settings.addr);
        return Ok(Arc::new(SimulatedDrone::new()));
    }

    let url = Url::parse(&settings.addr).context("parse drone address")?;
    match url.scheme() {
        "udp" => {
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("drone url missing host"))?;
            let port = url.port().ok_or_else(|| anyhow!("drone url missing port"))?;
            let drone_addr = format!("{}:{}", host, port);
            let sink = TelloSink::bind(
                &settings.command_bind,
                &drone_addr,
                settings.response_timeout,
            )?;
            log::info!("flight sink: tello sdk at {}", drone_addr);
            Ok(Arc::new(sink))
        }
        other => Err(anyhow!(
            "unsupported drone scheme '{}'; expected udp or stub",
            other
        )),
    }
}
