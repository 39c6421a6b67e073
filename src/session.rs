//! Airborne state and altitude-guard ownership.
//!
//! The airborne flag and the guard handle live under one lock and always
//! change together: there is a guard exactly when the session is airborne.
//!
//! Takeoff, land and emergency are serialised by a separate transition lock.
//! It is held across the drone call, which only ever blocks another
//! transition; readers of the state lock are never held up by the drone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::GuardSettings;
use crate::flight::FlightSink;
use crate::guard::AltitudeGuard;
use crate::PilotError;

#[derive(Default)]
struct SessionState {
    has_taken_off: bool,
    guard: Option<Arc<AltitudeGuard>>,
}

/// Consistent view of the session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub has_taken_off: bool,
    pub guard_active: bool,
}

type GuardStarter = fn(Arc<dyn FlightSink>, GuardSettings) -> Result<AltitudeGuard, PilotError>;

#[derive(Clone, Copy, Debug)]
enum TouchDown {
    Land,
    Emergency,
}

pub struct FlightSession {
    sink: Arc<dyn FlightSink>,
    guard_settings: GuardSettings,
    start_guard: GuardStarter,
    state: Mutex<SessionState>,
    transition: Mutex<()>,
}

impl FlightSession {
    pub fn new(sink: Arc<dyn FlightSink>, guard_settings: GuardSettings) -> Self {
        Self {
            sink,
            guard_settings,
            start_guard: AltitudeGuard::start,
            state: Mutex::new(SessionState::default()),
            transition: Mutex::new(()),
        }
    }

    #[cfg(test)]
    fn with_guard_starter(mut self, start_guard: GuardStarter) -> Self {
        self.start_guard = start_guard;
        self
    }

    pub fn sink(&self) -> &Arc<dyn FlightSink> {
        &self.sink
    }

    pub fn is_airborne(&self) -> bool {
        self.state().has_taken_off
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            has_taken_off: state.has_taken_off,
            guard_active: state.guard.is_some(),
        }
    }

    /// Gate for flight-altering commands.
    pub fn require_airborne(&self) -> Result<(), PilotError> {
        if self.is_airborne() {
            Ok(())
        } else {
            Err(PilotError::NotAirborne)
        }
    }

    /// Take off and start the altitude guard.
    ///
    /// If the guard cannot be started the drone is brought back down and the
    /// session stays grounded.
    pub fn takeoff(&self) -> Result<(), PilotError> {
        let _transition = self.transition();
        if self.is_airborne() {
            return Err(PilotError::AlreadyAirborne);
        }

        self.sink.takeoff()?;
        let guard = match (self.start_guard)(self.sink.clone(), self.guard_settings.clone()) {
            Ok(guard) => Arc::new(guard),
            Err(e) => {
                log::error!("FlightSession: altitude guard failed to start: {}", e);
                self.abort_takeoff();
                return Err(e);
            }
        };

        let mut state = self.state();
        if state.guard.is_some() {
            drop(state);
            guard.halt();
            log::error!("FlightSession: guard handle present while grounded");
            return Err(PilotError::GuardAlreadyRunning);
        }
        state.guard = Some(guard);
        state.has_taken_off = true;
        log::info!("FlightSession: airborne");
        Ok(())
    }

    /// Land, stopping the guard first.
    pub fn land(&self) -> Result<(), PilotError> {
        self.touch_down(TouchDown::Land)
    }

    /// Cut the motors, stopping the guard first.
    pub fn emergency(&self) -> Result<(), PilotError> {
        self.touch_down(TouchDown::Emergency)
    }

    /// Land if airborne. Used when the session ends.
    pub fn shutdown(&self) -> Result<(), PilotError> {
        match self.land() {
            Err(PilotError::NotAirborne) => Ok(()),
            other => other,
        }
    }

    fn touch_down(&self, kind: TouchDown) -> Result<(), PilotError> {
        let _transition = self.transition();
        let guard = {
            let state = self.state();
            if !state.has_taken_off {
                return Err(PilotError::NotAirborne);
            }
            state.guard.clone()
        };

        // The guard must be fully stopped before the drone starts descending,
        // otherwise a correction could fight the landing.
        if let Some(guard) = &guard {
            guard.halt();
        }

        let result = match kind {
            TouchDown::Land => self.sink.land(),
            TouchDown::Emergency => self.sink.emergency(),
        };

        match result {
            Ok(()) => {
                let mut state = self.state();
                state.guard = None;
                state.has_taken_off = false;
                log::info!("FlightSession: {:?} complete", kind);
                Ok(())
            }
            Err(e) => {
                log::warn!("FlightSession: {:?} failed, still airborne: {}", kind, e);
                self.rearm_guard();
                Err(e)
            }
        }
    }

    /// Bring an unguarded drone down: land, or cut the motors if that fails.
    fn abort_takeoff(&self) {
        match self.sink.land() {
            Ok(()) => log::warn!("FlightSession: landed, takeoff aborted"),
            Err(e) => {
                log::error!("FlightSession: abort landing failed: {}", e);
                if let Err(e) = self.sink.emergency() {
                    log::error!("FlightSession: abort emergency stop failed: {}", e);
                }
            }
        }
    }

    fn rearm_guard(&self) {
        match (self.start_guard)(self.sink.clone(), self.guard_settings.clone()) {
            Ok(guard) => self.state().guard = Some(Arc::new(guard)),
            Err(e) => log::error!("FlightSession: could not restart altitude guard: {}", e),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FlightSession {
    fn drop(&mut self) {
        if let Some(guard) = self.state().guard.take() {
            guard.stop();
        }
    }
}
