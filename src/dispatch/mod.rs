//! Detection-driven macros.
//!
//! `DetectionFilter` turns confident recognition results into action tokens;
//! `DetectionDispatcher` runs one macro at a time from those tokens.
//!
//! Both sides share the macro gate. The filter checks the gate and enqueues
//! under its lock, and the dispatcher drains the queue and clears the gate
//! under the same lock. So a token is never queued while a macro is active,
//! and detections made during a macro never replay after it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::capture::PhotoWriter;
use crate::config::DetectionSettings;
use crate::frame::Frame;
use crate::recognize::TextRegion;
use crate::session::FlightSession;
use crate::video::FrameChannel;
use crate::{LoopHandle, PilotError, StopSignal};

mod macros;

pub use macros::{MacroBook, MacroStep};
use macros::MacroRunner;

/// A confident detection paired with the frame it was seen in.
#[derive(Clone, Debug)]
pub struct ActionToken {
    pub label: String,
    pub frame: Option<Arc<Frame>>,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    BelowThreshold,
    /// A macro is running; the token was dropped.
    Suppressed,
    /// The dispatcher is gone.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroOutcome {
    Completed,
    Failed,
    /// No macro for the label; logged only.
    Unmapped,
    /// Another macro was already in progress.
    Discarded,
}

#[derive(Debug, Default)]
struct MacroGate {
    in_progress: Mutex<bool>,
}

impl MacroGate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.in_progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer side: threshold check plus gated enqueue. Never blocks on the
/// dispatcher.
#[derive(Clone)]
pub struct DetectionFilter {
    threshold: f32,
    gate: Arc<MacroGate>,
    tx: Sender<ActionToken>,
}

impl DetectionFilter {
    /// Offer every region of one recognition pass.
    pub fn offer(&self, regions: &[TextRegion], frame: &Arc<Frame>) -> Vec<SubmitOutcome> {
        regions
            .iter()
            .map(|region| {
                if !self.accepts(region.confidence) {
                    return SubmitOutcome::BelowThreshold;
                }
                self.submit(ActionToken {
                    label: region.text.trim().to_string(),
                    frame: Some(frame.clone()),
                    confidence: region.confidence,
                })
            })
            .collect()
    }

    /// Enqueue a token unless a macro is in progress.
    pub fn submit(&self, token: ActionToken) -> SubmitOutcome {
        if !self.accepts(token.confidence) {
            return SubmitOutcome::BelowThreshold;
        }
        let in_progress = self.gate.lock();
        if *in_progress {
            log::debug!("DetectionFilter: macro running, dropped '{}'", token.label);
            return SubmitOutcome::Suppressed;
        }
        match self.tx.send(token) {
            Ok(()) => SubmitOutcome::Queued,
            Err(_) => SubmitOutcome::Closed,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// NaN never passes.
    fn accepts(&self, confidence: f32) -> bool {
        confidence >= self.threshold
    }

    pub fn macro_in_progress(&self) -> bool {
        *self.gate.lock()
    }
}

/// Marks the gate busy for the lifetime of one macro. On drop, even during
/// unwinding, drains the queue and clears the gate under the gate lock.
struct BusyGuard<'a> {
    gate: &'a MacroGate,
    rx: &'a Receiver<ActionToken>,
}

impl<'a> BusyGuard<'a> {
    fn enter(gate: &'a MacroGate, rx: &'a Receiver<ActionToken>) -> Option<Self> {
        let mut in_progress = gate.lock();
        if *in_progress {
            return None;
        }
        *in_progress = true;
        Some(Self { gate, rx })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut in_progress = self.gate.lock();
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            log::info!("DetectionDispatcher: discarded {} stale detection(s)", stale);
        }
        *in_progress = false;
    }
}

pub struct DetectionDispatcher {
    book: MacroBook,
    gate: Arc<MacroGate>,
    rx: Receiver<ActionToken>,
    runner: MacroRunner,
    settings: DetectionSettings,
}

impl DetectionDispatcher {
    /// Build a dispatcher and the filter that feeds it.
    pub fn new(
        session: Arc<FlightSession>,
        channel: Option<Arc<FrameChannel>>,
        book: MacroBook,
        settings: DetectionSettings,
    ) -> (DetectionFilter, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let gate = Arc::new(MacroGate::default());
        let filter = DetectionFilter {
            threshold: settings.confidence_threshold,
            gate: gate.clone(),
            tx,
        };
        let dispatcher = Self {
            book,
            gate,
            rx,
            runner: MacroRunner {
                session,
                channel,
                photos: PhotoWriter::new(&settings.photo_dir),
            },
            settings,
        };
        (filter, dispatcher)
    }

    /// Tokens waiting for the consumer.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run the macro for one token.
    pub fn process(&self, token: &ActionToken, stop: &StopSignal) -> MacroOutcome {
        let Some(steps) = self.book.get(&token.label) else {
            log::info!("DetectionDispatcher: no action for '{}'", token.label);
            return MacroOutcome::Unmapped;
        };
        let Some(_busy) = BusyGuard::enter(&self.gate, &self.rx) else {
            log::debug!("DetectionDispatcher: busy, discarded '{}'", token.label);
            return MacroOutcome::Discarded;
        };

        log::info!(
            "DetectionDispatcher: action for '{}' ({}%)",
            token.label,
            (token.confidence * 100.0) as u32
        );
        match self.runner.run(token, steps, stop) {
            Ok(()) => MacroOutcome::Completed,
            Err(e) => {
                log_macro_failure(&token.label, &e);
                MacroOutcome::Failed
            }
        }
    }

    /// Start the consumer thread. The loop ends when stopped or when every
    /// `DetectionFilter` has been dropped.
    pub fn spawn(self) -> Result<LoopHandle, PilotError> {
        LoopHandle::spawn("macro-dispatch", StopSignal::new(), move |stop| {
            self.run(&stop)
        })
    }

    fn run(&self, stop: &StopSignal) {
        log::info!("DetectionDispatcher: started ({} macros)", self.book.labels().len());
        while !stop.is_triggered() {
            match self.rx.recv_timeout(self.settings.poll_timeout) {
                Ok(token) => {
                    self.process(&token, stop);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("DetectionDispatcher: stopped");
    }
}

fn log_macro_failure(label: &str, err: &PilotError) {
    match err {
        e if e.is_precondition() => log::warn!("DetectionDispatcher: '{}' refused: {}", label, e),
        e if e.is_transport() => {
            log::warn!("DetectionDispatcher: drone error during '{}': {}", label, e)
        }
        PilotError::Interrupted => log::info!("DetectionDispatcher: '{}' interrupted", label),
        e => log::error!("DetectionDispatcher: '{}' failed: {}", label, e),
    }
}
