//! Operator key handling.
//!
//! The operator loop offers raw key codes to a `KeySender` without ever
//! blocking. One consumer thread drains the queue in order and executes the
//! key table against the flight session.

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::KeySettings;
use crate::flight::{Direction, FlipDirection, Rotation};
use crate::session::FlightSession;
use crate::video::FrameChannel;
use crate::{LoopHandle, PilotError, StopSignal};

/// Key codes that mean "no key this iteration".
const NO_KEY: [u8; 2] = [0, 255];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCommand {
    ToggleFreeze,
    ReportAltitude,
    ReportBattery,
    Takeoff,
    Land,
    Emergency,
    Rotate(Rotation),
    Move(Direction),
    Flip(FlipDirection),
}

impl KeyCommand {
    pub fn from_key(code: u8) -> Option<Self> {
        let command = match code {
            b'p' => KeyCommand::ToggleFreeze,
            b'h' => KeyCommand::ReportAltitude,
            b'b' => KeyCommand::ReportBattery,
            b't' => KeyCommand::Takeoff,
            b'l' => KeyCommand::Land,
            b'e' => KeyCommand::Emergency,
            b'r' => KeyCommand::Rotate(Rotation::Clockwise),
            b'f' => KeyCommand::Rotate(Rotation::CounterClockwise),
            b'w' => KeyCommand::Move(Direction::Forward),
            b's' => KeyCommand::Move(Direction::Back),
            b'a' => KeyCommand::Move(Direction::Left),
            b'd' => KeyCommand::Move(Direction::Right),
            b'u' => KeyCommand::Move(Direction::Up),
            b'i' => KeyCommand::Move(Direction::Down),
            b'z' => KeyCommand::Flip(FlipDirection::Left),
            b'x' => KeyCommand::Flip(FlipDirection::Right),
            b'c' => KeyCommand::Flip(FlipDirection::Forward),
            b'v' => KeyCommand::Flip(FlipDirection::Back),
            _ => return None,
        };
        Some(command)
    }

    /// Whether the command alters flight and so needs a prior takeoff.
    pub fn requires_airborne(self) -> bool {
        matches!(
            self,
            KeyCommand::Land
                | KeyCommand::Emergency
                | KeyCommand::Rotate(_)
                | KeyCommand::Move(_)
                | KeyCommand::Flip(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Executed(KeyCommand),
    Altitude(i32),
    Battery(i32),
    Freeze(bool),
    Unmapped(u8),
}

/// Producer side of the key queue. Cloneable; never blocks.
#[derive(Clone, Debug)]
pub struct KeySender {
    tx: Sender<u8>,
}

impl KeySender {
    /// Queue a key code. Returns false for "no key" codes and when the
    /// consumer has gone away.
    pub fn offer(&self, code: u8) -> bool {
        if NO_KEY.contains(&code) {
            return false;
        }
        self.tx.send(code).is_ok()
    }
}

pub struct KeyRouter {
    session: Arc<FlightSession>,
    channel: Option<Arc<FrameChannel>>,
    settings: KeySettings,
}

impl KeyRouter {
    pub fn new(
        session: Arc<FlightSession>,
        channel: Option<Arc<FrameChannel>>,
        settings: KeySettings,
    ) -> Self {
        Self {
            session,
            channel,
            settings,
        }
    }

    /// Execute one key code.
    pub fn handle(&self, code: u8) -> Result<KeyOutcome, PilotError> {
        let Some(command) = KeyCommand::from_key(code) else {
            return Ok(KeyOutcome::Unmapped(code));
        };
        if command.requires_airborne() {
            self.session.require_airborne()?;
        }

        let sink = self.session.sink();
        match command {
            KeyCommand::ToggleFreeze => {
                let channel = self.channel.as_ref().ok_or(PilotError::NotInitialized)?;
                return Ok(KeyOutcome::Freeze(channel.toggle_freeze()?));
            }
            KeyCommand::ReportAltitude => return Ok(KeyOutcome::Altitude(sink.altitude_cm()?)),
            KeyCommand::ReportBattery => return Ok(KeyOutcome::Battery(sink.battery_percent()?)),
            KeyCommand::Takeoff => self.session.takeoff()?,
            KeyCommand::Land => self.session.land()?,
            KeyCommand::Emergency => self.session.emergency()?,
            KeyCommand::Rotate(rotation) => sink.rotate(rotation, self.settings.rotate_deg)?,
            KeyCommand::Move(direction @ (Direction::Up | Direction::Down)) => {
                sink.move_by(direction, self.settings.climb_cm)?
            }
            KeyCommand::Move(direction) => sink.move_by(direction, self.settings.move_cm)?,
            KeyCommand::Flip(direction) => sink.flip(direction)?,
        }
        Ok(KeyOutcome::Executed(command))
    }

    /// Start the consumer thread. The loop ends when stopped or when every
    /// `KeySender` has been dropped.
    pub fn spawn(self) -> Result<(KeySender, LoopHandle), PilotError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = LoopHandle::spawn("key-router", StopSignal::new(), move |stop| {
            self.run(rx, &stop)
        })?;
        Ok((KeySender { tx }, handle))
    }

    fn run(&self, rx: Receiver<u8>, stop: &StopSignal) {
        log::info!("KeyRouter: started");
        while !stop.is_triggered() {
            match rx.recv_timeout(self.settings.poll_timeout) {
                Ok(code) => self.dispatch(code),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("KeyRouter: stopped");
    }

    fn dispatch(&self, code: u8) {
        match self.handle(code) {
            Ok(KeyOutcome::Altitude(cm)) => log::info!("KeyRouter: altitude {} cm", cm),
            Ok(KeyOutcome::Battery(percent)) => log::info!("KeyRouter: battery {}%", percent),
            Ok(KeyOutcome::Freeze(frozen)) => log::info!("KeyRouter: frozen={}", frozen),
            Ok(KeyOutcome::Executed(command)) => log::debug!("KeyRouter: {:?} done", command),
            Ok(KeyOutcome::Unmapped(code)) => {
                log::debug!("KeyRouter: no command for key {}", code)
            }
            Err(e) if e.is_precondition() => log::warn!("KeyRouter: error: {}", e),
            Err(e) if e.is_transport() => log::warn!("KeyRouter: drone error: {}", e),
            Err(e) => log::error!("KeyRouter: key {} failed: {}", code, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardSettings;
    use crate::flight::{FlightCommand, SimulatedDrone};
    use std::time::Duration;

    fn router(drone: &Arc<SimulatedDrone>) -> KeyRouter {
        let guard = GuardSettings {
            floor_cm: 50,
            ascend_step_cm: 20,
            idle_wait: Duration::from_millis(5),
        };
        let session = Arc::new(FlightSession::new(drone.clone(), guard));
        KeyRouter::new(session, None, KeySettings::default())
    }

    #[test]
    fn key_table() {
        assert_eq!(KeyCommand::from_key(b't'), Some(KeyCommand::Takeoff));
        assert_eq!(
            KeyCommand::from_key(b'f'),
            Some(KeyCommand::Rotate(Rotation::CounterClockwise))
        );
        assert_eq!(
            KeyCommand::from_key(b'u'),
            Some(KeyCommand::Move(Direction::Up))
        );
        assert_eq!(KeyCommand::from_key(b'q'), None);
        assert!(!KeyCommand::Takeoff.requires_airborne());
        assert!(!KeyCommand::ReportBattery.requires_airborne());
        assert!(KeyCommand::Emergency.requires_airborne());
    }

    #[test]
    fn flight_keys_require_takeoff() {
        let drone = Arc::new(SimulatedDrone::new());
        let router = router(&drone);
        for key in [b'w', b'r', b'l', b'e', b'u', b'z'] {
            assert!(matches!(router.handle(key), Err(PilotError::NotAirborne)));
        }
        assert!(drone.commands().is_empty());
    }

    #[test]
    fn moves_use_configured_distances() {
        let drone = Arc::new(SimulatedDrone::new().with_takeoff_altitude(120));
        let router = router(&drone);
        router.handle(b't').unwrap();
        router.handle(b'w').unwrap();
        router.handle(b'u').unwrap();
        router.handle(b'f').unwrap();
        router.handle(b'l').unwrap();

        assert_eq!(
            drone.commands(),
            vec![
                FlightCommand::Takeoff,
                FlightCommand::Move(Direction::Forward, 30),
                FlightCommand::Move(Direction::Up, 20),
                FlightCommand::Rotate(Rotation::CounterClockwise, 90),
                FlightCommand::Land,
            ]
        );
    }

    #[test]
    fn telemetry_keys_work_on_the_ground() {
        let drone = Arc::new(SimulatedDrone::new());
        let router = router(&drone);
        assert_eq!(router.handle(b'h').unwrap(), KeyOutcome::Altitude(0));
        assert!(matches!(router.handle(b'b').unwrap(), KeyOutcome::Battery(_)));
        assert_eq!(router.handle(b'?').unwrap(), KeyOutcome::Unmapped(b'?'));
    }

    #[test]
    fn freeze_without_video_is_refused() {
        let drone = Arc::new(SimulatedDrone::new());
        let router = router(&drone);
        assert!(matches!(router.handle(b'p'), Err(PilotError::NotInitialized)));
    }

    #[test]
    fn consumer_survives_errors_and_keeps_order() {
        let drone = Arc::new(SimulatedDrone::new().with_takeoff_altitude(120));
        drone.fail_next("move", 1);
        let (keys, handle) = router(&drone).spawn().unwrap();

        for key in [b'w', 255, b't', b'w', b'd', b'a'] {
            keys.offer(key);
        }
        std::thread::sleep(Duration::from_millis(200));
        handle.join().unwrap();

        // The first `w` is refused before takeoff, the second fails in transit.
        let moves: Vec<_> = drone
            .commands()
            .into_iter()
            .filter(|command| command.kind() == "move")
            .collect();
        assert_eq!(
            moves,
            vec![
                FlightCommand::Move(Direction::Right, 30),
                FlightCommand::Move(Direction::Left, 30),
            ]
        );
    }

    #[test]
    fn no_key_codes_are_not_queued() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let keys = KeySender { tx };
        assert!(!keys.offer(255));
        assert!(!keys.offer(0));
        assert!(keys.offer(b'h'));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![b'h']);
    }
}
