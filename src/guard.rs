//! Minimum-altitude safety loop.
//!
//! `Running -> Stopped`, terminal. While running, the guard reads the
//! altitude and commands a fixed ascend whenever it is below the floor.
//! Each iteration ends with a bounded idle wait so the host is not spun.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::GuardSettings;
use crate::flight::{Direction, FlightSink};
use crate::{LoopHandle, PilotError, StopSignal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardState {
    Running,
    Stopped,
}

pub struct AltitudeGuard {
    stop: StopSignal,
    handle: Mutex<Option<LoopHandle>>,
    corrections: Arc<AtomicUsize>,
    floor_cm: i32,
}

impl AltitudeGuard {
    pub fn start(sink: Arc<dyn FlightSink>, settings: GuardSettings) -> Result<Self, PilotError> {
        let stop = StopSignal::new();
        let corrections = Arc::new(AtomicUsize::new(0));
        let counter = corrections.clone();
        let floor_cm = settings.floor_cm;

        let handle = LoopHandle::spawn("altitude-guard", stop.clone(), move |stop| {
            log::info!(
                "AltitudeGuard: holding floor {} cm (step {} cm)",
                settings.floor_cm,
                settings.ascend_step_cm
            );
            while !stop.is_triggered() {
                match sink.altitude_cm() {
                    Ok(altitude) if altitude < settings.floor_cm => {
                        if stop.is_triggered() {
                            break;
                        }
                        log::debug!(
                            "AltitudeGuard: {} cm below floor, ascending {} cm",
                            altitude,
                            settings.ascend_step_cm
                        );
                        match sink.move_by(Direction::Up, settings.ascend_step_cm) {
                            Ok(()) => {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => log::warn!("AltitudeGuard: ascend failed: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("AltitudeGuard: altitude read failed: {}", e),
                }
                if stop.wait(settings.idle_wait) {
                    break;
                }
            }
            log::info!("AltitudeGuard: stopped");
        })?;

        Ok(Self {
            stop,
            handle: Mutex::new(Some(handle)),
            corrections,
            floor_cm,
        })
    }

    /// Signal the loop to stop. Repeated calls are no-ops.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Stop and wait for the loop to exit, so no corrective command can
    /// follow this call. Repeated calls are no-ops.
    pub fn halt(&self) {
        self.stop.trigger();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                log::error!("AltitudeGuard: {}", e);
            }
        }
    }

    pub fn state(&self) -> GuardState {
        if self.stop.is_triggered() {
            GuardState::Stopped
        } else {
            GuardState::Running
        }
    }

    /// Number of corrective ascends issued so far.
    pub fn corrections(&self) -> usize {
        self.corrections.load(Ordering::SeqCst)
    }

    pub fn floor_cm(&self) -> i32 {
        self.floor_cm
    }
}

impl Drop for AltitudeGuard {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::SimulatedDrone;
    use std::time::Duration;

    fn settings() -> GuardSettings {
        GuardSettings {
            floor_cm: 100,
            ascend_step_cm: 20,
            idle_wait: Duration::from_millis(5),
        }
    }

    fn airborne_at(altitude_cm: i32) -> Arc<SimulatedDrone> {
        let drone = Arc::new(SimulatedDrone::new().with_takeoff_altitude(altitude_cm));
        drone.takeoff().unwrap();
        drone
    }

    #[test]
    fn climbs_to_the_floor_and_holds() {
        let drone = airborne_at(40);
        let guard = AltitudeGuard::start(drone.clone(), settings()).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        guard.halt();

        // 40 -> 60 -> 80 -> 100, then nothing more.
        assert_eq!(guard.corrections(), 3);
        assert_eq!(drone.altitude(), 100);
        assert_eq!(drone.count("move"), 3);
    }

    #[test]
    fn no_corrections_above_the_floor() {
        let drone = airborne_at(120);
        let guard = AltitudeGuard::start(drone.clone(), settings()).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        guard.halt();
        assert_eq!(guard.corrections(), 0);
        assert!(drone.query_count() >= 1);
    }

    #[test]
    fn halted_guard_issues_nothing_further() {
        let drone = airborne_at(120);
        let guard = AltitudeGuard::start(drone.clone(), settings()).unwrap();
        guard.halt();
        assert_eq!(guard.state(), GuardState::Stopped);

        drone.script_altitudes([10, 10, 10]);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(drone.count("move"), 0);
    }

    #[test]
    fn double_stop_is_a_no_op() {
        let drone = airborne_at(120);
        let guard = AltitudeGuard::start(drone, settings()).unwrap();
        assert_eq!(guard.state(), GuardState::Running);
        guard.stop();
        guard.stop();
        guard.halt();
        guard.halt();
        assert_eq!(guard.state(), GuardState::Stopped);
    }

    #[test]
    fn ascend_failures_do_not_end_the_loop() {
        let drone = airborne_at(40);
        drone.fail_next("move", 1);
        let guard = AltitudeGuard::start(drone.clone(), settings()).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        guard.halt();
        assert_eq!(drone.altitude(), 100);
    }
}
