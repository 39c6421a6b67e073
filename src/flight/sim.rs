//! Simulated drone.
//!
//! Keeps a small flight model (airborne, altitude, heading, battery) and a
//! journal of every accepted command. Tests can script altitude readings,
//! inject failures for a command kind, and add per-command latency.
//!
//! Latency is spent outside the state lock so concurrent callers interleave
//! the way they would against a real drone.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Direction, FlightCommand, FlightSink, Query, Rotation};
use crate::PilotError;

const DEFAULT_TAKEOFF_ALTITUDE_CM: i32 = 80;
const DEFAULT_BATTERY: i32 = 87;

#[derive(Debug)]
struct SimState {
    airborne: bool,
    streaming: bool,
    altitude_cm: i32,
    heading_deg: i32,
    battery: i32,
    takeoff_altitude_cm: i32,
    altitude_script: VecDeque<i32>,
    failures: HashMap<&'static str, usize>,
    journal: Vec<FlightCommand>,
    queries: usize,
}

pub struct SimulatedDrone {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedDrone {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                airborne: false,
                streaming: false,
                altitude_cm: 0,
                heading_deg: 0,
                battery: DEFAULT_BATTERY,
                takeoff_altitude_cm: DEFAULT_TAKEOFF_ALTITUDE_CM,
                altitude_script: VecDeque::new(),
                failures: HashMap::new(),
                journal: Vec::new(),
                queries: 0,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Altitude the drone settles at after `takeoff`.
    pub fn with_takeoff_altitude(self, altitude_cm: i32) -> Self {
        self.lock().takeoff_altitude_cm = altitude_cm;
        self
    }

    /// Time every command takes to complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Readings returned by the next altitude queries, before the model takes over.
    pub fn script_altitudes(&self, readings: impl IntoIterator<Item = i32>) {
        self.lock().altitude_script.extend(readings);
    }

    /// Make the next `count` commands of `kind` fail with a transport error.
    pub fn fail_next(&self, kind: &'static str, count: usize) {
        *self.lock().failures.entry(kind).or_insert(0) += count;
    }

    pub fn commands(&self) -> Vec<FlightCommand> {
        self.lock().journal.clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|command| command.kind() == kind)
            .count()
    }

    pub fn is_airborne(&self) -> bool {
        self.lock().airborne
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn altitude(&self) -> i32 {
        self.lock().altitude_cm
    }

    pub fn heading(&self) -> i32 {
        self.lock().heading_deg
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedDrone {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightSink for SimulatedDrone {
    fn name(&self) -> &str {
        "simulated"
    }

    fn send(&self, command: &FlightCommand) -> Result<(), PilotError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let mut state = self.lock();
        if let Some(remaining) = state.failures.get_mut(command.kind()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PilotError::transport(command.sdk_text(), "injected failure"));
            }
        }

        let needs_flight = matches!(
            command,
            FlightCommand::Land
                | FlightCommand::Move(..)
                | FlightCommand::Rotate(..)
                | FlightCommand::Flip(_)
        );
        if needs_flight && !state.airborne {
            return Err(PilotError::Rejected {
                command: command.sdk_text(),
                reply: "error Not flying".to_string(),
            });
        }

        match command {
            FlightCommand::Connect => {}
            FlightCommand::Takeoff => {
                state.airborne = true;
                state.altitude_cm = state.takeoff_altitude_cm;
            }
            FlightCommand::Land | FlightCommand::Emergency => {
                state.airborne = false;
                state.altitude_cm = 0;
            }
            FlightCommand::Move(Direction::Up, cm) => state.altitude_cm += *cm as i32,
            FlightCommand::Move(Direction::Down, cm) => {
                state.altitude_cm = (state.altitude_cm - *cm as i32).max(0)
            }
            FlightCommand::Move(..) | FlightCommand::Flip(_) => {}
            FlightCommand::Rotate(Rotation::Clockwise, deg) => {
                state.heading_deg = (state.heading_deg + *deg as i32).rem_euclid(360)
            }
            FlightCommand::Rotate(Rotation::CounterClockwise, deg) => {
                state.heading_deg = (state.heading_deg - *deg as i32).rem_euclid(360)
            }
            FlightCommand::StreamOn => state.streaming = true,
            FlightCommand::StreamOff => state.streaming = false,
        }
        state.journal.push(command.clone());
        Ok(())
    }

    fn query(&self, query: Query) -> Result<i32, PilotError> {
        let mut state = self.lock();
        state.queries += 1;
        match query {
            Query::AltitudeCm => Ok(match state.altitude_script.pop_front() {
                Some(reading) => reading,
                None => state.altitude_cm,
            }),
            Query::BatteryPercent => Ok(state.battery),
        }
    }
}
