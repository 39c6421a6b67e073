//! Operator-facing loop.
//!
//! Each iteration samples one key, forwards it to the key queue, reads the
//! frame channel and, for a new live frame, runs recognition and offers the
//! results to the detection filter. Nothing here waits on a consumer.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::dispatch::DetectionFilter;
use crate::frame::Frame;
use crate::keys::KeySender;
use crate::recognize::RecognizerRegistry;
use crate::video::{FrameChannel, FrameRead};
use crate::StopSignal;

const QUIT_KEY: u8 = b'q';

/// Source of key codes and sink for the live image.
pub trait OperatorConsole {
    /// Next key pressed since the last call, if any. Must not block.
    fn poll_key(&mut self) -> Option<u8>;

    /// Display a frame. Consoles without a display may ignore it.
    fn show(&mut self, _frame: &Frame) {}
}

/// Console reading keys from stdin, one byte per key. Newlines are ignored.
pub struct StdinConsole {
    keys: Receiver<u8>,
}

impl StdinConsole {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, keys) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("stdin-keys".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut lock = stdin.lock();
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match lock.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            for &byte in line.iter().filter(|b| !b.is_ascii_whitespace()) {
                                if tx.send(byte).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            log::warn!("StdinConsole: read failed: {}", e);
                            break;
                        }
                    }
                }
            })?;
        Ok(Self { keys })
    }
}

impl OperatorConsole for StdinConsole {
    fn poll_key(&mut self) -> Option<u8> {
        match self.keys.try_recv() {
            Ok(key) => Some(key),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(QUIT_KEY),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Quit,
}

pub struct OperatorLoop {
    keys: KeySender,
    channel: Option<Arc<FrameChannel>>,
    recognizers: RecognizerRegistry,
    filter: DetectionFilter,
    idle_wait: Duration,
    announced_frozen: bool,
    last_sequence: Option<u64>,
}

impl OperatorLoop {
    pub fn new(
        keys: KeySender,
        channel: Option<Arc<FrameChannel>>,
        recognizers: RecognizerRegistry,
        filter: DetectionFilter,
        idle_wait: Duration,
    ) -> Self {
        Self {
            keys,
            channel,
            recognizers,
            filter,
            idle_wait,
            announced_frozen: false,
            last_sequence: None,
        }
    }

    /// One iteration of the operator loop.
    pub fn tick(&mut self, console: &mut dyn OperatorConsole) -> Tick {
        if let Some(key) = console.poll_key() {
            self.keys.offer(key);
            if key == QUIT_KEY {
                return Tick::Quit;
            }
        }

        let Some(channel) = &self.channel else {
            return Tick::Continue;
        };
        let frame = match channel.read() {
            Ok(FrameRead::NoFrame) => return Tick::Continue,
            Ok(FrameRead::Frozen(_)) => {
                if !self.announced_frozen {
                    log::info!("Operator: camera is frozen");
                    self.announced_frozen = true;
                }
                return Tick::Continue;
            }
            Ok(FrameRead::Live(frame)) => frame,
            Err(e) => {
                log::warn!("Operator: failed to grab frame: {}", e);
                return Tick::Continue;
            }
        };
        self.announced_frozen = false;

        if self.last_sequence == Some(frame.sequence) {
            return Tick::Continue;
        }
        self.last_sequence = Some(frame.sequence);

        match self.recognizers.recognize(&frame) {
            Ok(regions) => {
                for region in &regions {
                    log::info!(
                        "Operator: detected {}, confidence {}%",
                        region.text,
                        region.confidence_percent()
                    );
                }
                self.filter.offer(&regions, &frame);
            }
            Err(e) => log::debug!("Operator: no recognition this cycle: {}", e),
        }
        console.show(&frame);
        Tick::Continue
    }

    /// Run until the operator quits or `stop` fires.
    pub fn run(&mut self, console: &mut dyn OperatorConsole, stop: &StopSignal) {
        log::info!("Operator: loop started");
        loop {
            if self.tick(console) == Tick::Quit {
                log::info!("Operator: quit requested");
                break;
            }
            if stop.wait(self.idle_wait) {
                log::info!("Operator: stop requested");
                break;
            }
        }
    }
}
