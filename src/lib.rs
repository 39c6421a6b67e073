//! Tello pilot kernel
//!
//! This crate implements the concurrent command-and-safety pipeline for piloting
//! a Tello quadrotor from a live video feed, a text-recognition pass and the
//! operator's keyboard.
//!
//! # Architecture
//!
//! Independent timelines share one drone:
//!
//! 1. **Video**: a receive loop reassembles datagrams into encoded pictures,
//!    hands them to a decoder and publishes the latest frame (freeze/live).
//! 2. **Keep-alive**: a heartbeat on a fixed interval keeps the control link open.
//! 3. **Altitude guard**: while airborne, corrects altitude below the floor.
//! 4. **Keys**: operator key codes are queued and executed by one consumer.
//! 5. **Detections**: confident text labels trigger mutually exclusive macros.
//!
//! Each shared piece of state (frame pair, airborne flag plus guard handle,
//! macro-in-progress flag) has its own narrow lock. No lock over shared state
//! is held while calling into the decoder, the recognizer or the drone.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames (immutable, shared via `Arc`)
//! - `video`: datagram reassembly, decoder backends, `FrameChannel`
//! - `flight`: `FlightSink` trait, Tello UDP SDK sink, simulated drone
//! - `keepalive`, `guard`, `session`: link heartbeat, altitude floor, takeoff/land
//! - `keys`: key table and key consumer
//! - `recognize`: text recognizer backends
//! - `dispatch`: detection filter, macro book, macro dispatcher
//! - `capture`: photo persistence
//! - `operator`: console trait and the operator loop
//! - `pilot`: session orchestration

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod flight;
pub mod frame;
pub mod guard;
pub mod keepalive;
pub mod keys;
pub mod operator;
pub mod pilot;
pub mod recognize;
pub mod session;
pub mod video;

pub use capture::PhotoWriter;
pub use config::PilotConfig;
pub use dispatch::{
    ActionToken, DetectionDispatcher, DetectionFilter, MacroBook, MacroOutcome, MacroStep,
    SubmitOutcome,
};
pub use flight::{
    open_sink, Direction, FlightCommand, FlightSink, FlipDirection, Query, Rotation,
    SimulatedDrone, TelloSink,
};
pub use frame::{DecodedPicture, Frame, PixelFormat};
pub use guard::{AltitudeGuard, GuardState};
pub use keys::{KeyCommand, KeyOutcome, KeyRouter, KeySender};
pub use operator::{OperatorConsole, OperatorLoop, StdinConsole, Tick};
pub use pilot::PilotSession;
pub use recognize::{BoundingBox, RecognizerRegistry, ScriptedRecognizer, TextRecognizer, TextRegion};
pub use session::{FlightSession, SessionSnapshot};
pub use video::{
    decoder_factory, DecoderFactory, FrameAssembler, FrameChannel, FrameRead, InitStatus,
    ShutdownStatus, StreamDecoder,
};

// -------------------- Errors --------------------

/// Faults and rejections raised by the pilot pipeline.
///
/// Expected outcomes (no frame yet, unmapped key, suppressed token) are
/// reported through status enums instead of this type.
#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    #[error("video channel is not initialized")]
    NotInitialized,
    #[error("take off first")]
    NotAirborne,
    #[error("drone is already airborne")]
    AlreadyAirborne,
    #[error("an altitude guard is already running for this session")]
    GuardAlreadyRunning,
    #[error("transport error during '{command}': {reason}")]
    Transport { command: String, reason: String },
    #[error("no reply to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("drone rejected '{command}': {reply}")]
    Rejected { command: String, reply: String },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("no frame available")]
    NoFrame,
    #[error("interrupted by shutdown")]
    Interrupted,
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PilotError {
    /// Precondition violations are reported to the operator; the caller keeps going.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PilotError::NotInitialized | PilotError::NotAirborne | PilotError::AlreadyAirborne
        )
    }

    /// Errors coming back from the drone link.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PilotError::Transport { .. } | PilotError::Timeout { .. } | PilotError::Rejected { .. }
        )
    }

    pub(crate) fn transport(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PilotError::Transport {
            command: command.into(),
            reason: err.to_string(),
        }
    }
}

// -------------------- Stop Signals --------------------

/// Cooperative stop signal shared between a loop and its owner.
///
/// Triggering is idempotent. `wait` doubles as the bounded idle sleep of a
/// loop, returning early once the signal fires.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for at most `timeout`. Returns true if the signal fired.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            return true;
        }
        let (stopped, _) = cvar
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

// -------------------- Worker Loops --------------------

/// Owner handle for a background loop thread.
///
/// Dropping the handle signals the loop but does not wait for it.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    stop: StopSignal,
    join: Option<JoinHandle<()>>,
}

impl LoopHandle {
    /// Spawn a named loop thread. The body receives the loop's stop signal.
    pub fn spawn<F>(name: &str, stop: StopSignal, body: F) -> Result<Self, PilotError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let signal = stop.clone();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(signal))?;
        Ok(Self {
            name: name.to_string(),
            stop,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to finish its current iteration and exit.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    pub fn join(mut self) -> anyhow::Result<()> {
        self.stop.trigger();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow::anyhow!("{} thread panicked", self.name))?;
        }
        Ok(())
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn stop_signal_wait_returns_early_when_triggered() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let started = Instant::now();
        assert!(stop.wait(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        trigger.join().unwrap();
    }

    #[test]
    fn stop_signal_wait_times_out_when_idle() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(10)));
        assert!(!stop.is_triggered());
    }

    #[test]
    fn loop_handle_join_stops_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let handle = LoopHandle::spawn("test-loop", StopSignal::new(), move |stop| {
            while !stop.wait(Duration::from_millis(5)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.name(), "test-loop");
        handle.join().unwrap();
        let seen = iterations.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(iterations.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn error_taxonomy() {
        assert!(PilotError::NotAirborne.is_precondition());
        assert!(PilotError::NotInitialized.is_precondition());
        assert!(!PilotError::GuardAlreadyRunning.is_precondition());
        assert!(PilotError::transport("takeoff", "unreachable").is_transport());
        assert!(!PilotError::Interrupted.is_transport());
    }
}
