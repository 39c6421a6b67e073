//! Macro definitions and step execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::PhotoWriter;
use crate::flight::{Direction, FlightCommand, Rotation};
use crate::session::FlightSession;
use crate::video::FrameChannel;
use crate::{PilotError, StopSignal};

use super::ActionToken;

/// One step of a macro.
#[derive(Clone, Debug, PartialEq)]
pub enum MacroStep {
    /// A primitive flight command. Refused unless the session is airborne.
    Command(FlightCommand),
    /// Idle wait; cut short by shutdown.
    Pause(Duration),
    /// Freeze the channel, save the frozen frame, unfreeze.
    Photograph,
    /// Land through the session so the guard stops and the flag clears.
    Land,
}

/// Fixed label -> steps mapping, read-only once the dispatcher runs.
#[derive(Clone, Debug, Default)]
pub struct MacroBook {
    macros: HashMap<String, Vec<MacroStep>>,
}

impl MacroBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// `A`: full turn, pause, half turn, forward. `B`: half turn, photo. `C`: land.
    pub fn standard(pause: Duration) -> Self {
        Self::new()
            .with(
                "A",
                vec![
                    MacroStep::Command(FlightCommand::Rotate(Rotation::Clockwise, 360)),
                    MacroStep::Pause(pause),
                    MacroStep::Command(FlightCommand::Rotate(Rotation::Clockwise, 180)),
                    MacroStep::Command(FlightCommand::Move(Direction::Forward, 30)),
                ],
            )
            .with(
                "B",
                vec![
                    MacroStep::Command(FlightCommand::Rotate(Rotation::Clockwise, 180)),
                    MacroStep::Photograph,
                ],
            )
            .with("C", vec![MacroStep::Land])
    }

    pub fn with(mut self, label: &str, steps: Vec<MacroStep>) -> Self {
        self.macros.insert(label.to_string(), steps);
        self
    }

    pub fn get(&self, label: &str) -> Option<&[MacroStep]> {
        self.macros.get(label).map(Vec::as_slice)
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}

/// Everything a macro step may touch.
pub(crate) struct MacroRunner {
    pub(crate) session: Arc<FlightSession>,
    pub(crate) channel: Option<Arc<FrameChannel>>,
    pub(crate) photos: PhotoWriter,
}

impl MacroRunner {
    pub(crate) fn run(
        &self,
        token: &ActionToken,
        steps: &[MacroStep],
        stop: &StopSignal,
    ) -> Result<(), PilotError> {
        for step in steps {
            match step {
                MacroStep::Command(command) => {
                    self.session.require_airborne()?;
                    self.session.sink().send(command)?;
                }
                MacroStep::Pause(duration) => {
                    if stop.wait(*duration) {
                        return Err(PilotError::Interrupted);
                    }
                }
                MacroStep::Photograph => {
                    self.photograph(token)?;
                }
                MacroStep::Land => self.session.land()?,
            }
        }
        Ok(())
    }

    fn photograph(&self, token: &ActionToken) -> Result<PathBuf, PilotError> {
        let Some(channel) = &self.channel else {
            let frame = token.frame.as_ref().ok_or(PilotError::NoFrame)?;
            return self.photos.save(frame);
        };

        channel.set_freeze(true)?;
        let saved = channel.read().and_then(|read| {
            let frame = read
                .frame()
                .cloned()
                .or_else(|| token.frame.clone())
                .ok_or(PilotError::NoFrame)?;
            self.photos.save(&frame)
        });
        let unfrozen = channel.set_freeze(false);

        let path = saved?;
        unfrozen?;
        Ok(path)
    }
}
