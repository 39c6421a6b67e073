//! Latest-frame channel with freeze support.
//!
//! The receive loop owns the stream socket, the assembler and the decoder.
//! The decoder is built on the loop thread itself. The loop only touches
//! shared state to publish a finished frame, so decoding never happens under
//! the frame lock.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::decoder::{DecoderFactory, StreamDecoder};
use super::reassembly::{Assembly, FrameAssembler};
use crate::config::VideoSettings;
use crate::flight::FlightSink;
use crate::frame::Frame;
use crate::{LoopHandle, PilotError, StopSignal};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of `FrameChannel::read`.
#[derive(Clone, Debug)]
pub enum FrameRead {
    /// Nothing has been decoded yet.
    NoFrame,
    /// The most recently decoded frame.
    Live(Arc<Frame>),
    /// The snapshot taken when the channel was frozen. `None` if no frame
    /// existed at that instant.
    Frozen(Option<Arc<Frame>>),
}

impl FrameRead {
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            FrameRead::NoFrame => None,
            FrameRead::Live(frame) => Some(frame),
            FrameRead::Frozen(snapshot) => snapshot.as_ref(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, FrameRead::Frozen(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    Initialized,
    AlreadyInitialized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStatus {
    Stopped,
    NotInitialized,
}

/// Current/frozen frame pair plus the flags that govern reads.
#[derive(Debug, Default)]
pub(crate) struct FrameSlot {
    current: Option<Arc<Frame>>,
    frozen_snapshot: Option<Arc<Frame>>,
    frozen: bool,
    initialized: bool,
}

impl FrameSlot {
    pub(crate) fn publish(&mut self, frame: Arc<Frame>) {
        self.current = Some(frame);
    }

    pub(crate) fn read(&self) -> Result<FrameRead, PilotError> {
        if !self.initialized {
            return Err(PilotError::NotInitialized);
        }
        if self.frozen {
            return Ok(FrameRead::Frozen(self.frozen_snapshot.clone()));
        }
        Ok(match &self.current {
            Some(frame) => FrameRead::Live(frame.clone()),
            None => FrameRead::NoFrame,
        })
    }

    pub(crate) fn set_freeze(&mut self, frozen: bool) -> Result<(), PilotError> {
        if !self.initialized {
            return Err(PilotError::NotInitialized);
        }
        if frozen {
            self.frozen_snapshot = self.current.clone();
        }
        self.frozen = frozen;
        Ok(())
    }
}

pub struct FrameChannel {
    slot: Arc<Mutex<FrameSlot>>,
    lifecycle: Mutex<()>,
    sink: Arc<dyn FlightSink>,
    receiver: Mutex<Option<LoopHandle>>,
    local_addr: SocketAddr,
    published: Arc<AtomicU64>,
}

impl FrameChannel {
    /// Bind the stream socket and start the receive loop.
    ///
    /// The loop builds its decoder from `decoder` before receiving; a
    /// construction failure is returned from here. Frames are decoded and
    /// published from this point on, but reads stay refused until
    /// `initialize` has turned the stream on.
    pub fn bind(
        settings: &VideoSettings,
        sink: Arc<dyn FlightSink>,
        decoder: DecoderFactory,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(&settings.bind)
            .with_context(|| format!("bind video socket on {}", settings.bind))?;
        socket
            .set_read_timeout(Some(settings.read_timeout))
            .context("set video socket read timeout")?;
        let local_addr = socket.local_addr().context("video socket address")?;

        let slot = Arc::new(Mutex::new(FrameSlot::default()));
        let published = Arc::new(AtomicU64::new(0));
        let receive = ReceiveLoop {
            socket,
            slot: slot.clone(),
            assembler: FrameAssembler::new(settings.max_datagram, settings.max_frame_bytes),
            recv_buffer: settings.recv_buffer,
            published: published.clone(),
        };
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let receiver = LoopHandle::spawn("video-recv", StopSignal::new(), move |stop| {
            let decoder = match decoder() {
                Ok(decoder) => {
                    let _ = ready_tx.send(Ok(()));
                    decoder
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            receive.run(decoder, &stop)
        })?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("video receive loop exited during start")));
        if let Err(e) = ready {
            receiver.join()?;
            return Err(e.context("open stream decoder"));
        }

        Ok(Self {
            slot,
            lifecycle: Mutex::new(()),
            sink,
            receiver: Mutex::new(Some(receiver)),
            local_addr,
            published,
        })
    }

    /// Address the stream socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of frames published since bind.
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Enter SDK mode and turn the stream on. Idempotent.
    pub fn initialize(&self) -> Result<InitStatus, PilotError> {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.slot().initialized {
            return Ok(InitStatus::AlreadyInitialized);
        }
        self.sink.connect()?;
        self.sink.stream_on()?;
        self.slot().initialized = true;
        log::info!("FrameChannel: stream on ({})", self.sink.name());
        Ok(InitStatus::Initialized)
    }

    /// Turn the stream off. Safe to call when not initialized.
    pub fn shutdown(&self) -> Result<ShutdownStatus, PilotError> {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.slot().initialized {
            return Ok(ShutdownStatus::NotInitialized);
        }
        self.sink.stream_off()?;
        let mut slot = self.slot();
        slot.initialized = false;
        slot.frozen = false;
        log::info!("FrameChannel: stream off");
        Ok(ShutdownStatus::Stopped)
    }

    pub fn read(&self) -> Result<FrameRead, PilotError> {
        self.slot().read()
    }

    /// Freeze on the frame current at this instant, or return to live reads.
    pub fn set_freeze(&self, frozen: bool) -> Result<(), PilotError> {
        let result = self.slot().set_freeze(frozen);
        match &result {
            Ok(()) => log::debug!("FrameChannel: frozen={}", frozen),
            Err(e) => log::error!("FrameChannel: set_freeze({}) refused: {}", frozen, e),
        }
        result
    }

    /// Flip the freeze state in one step. Returns the new state.
    pub fn toggle_freeze(&self) -> Result<bool, PilotError> {
        let mut slot = self.slot();
        let frozen = !slot.frozen;
        slot.set_freeze(frozen)?;
        Ok(frozen)
    }

    pub fn is_frozen(&self) -> bool {
        self.slot().frozen
    }

    /// Stop the receive loop and wait for it to exit.
    pub fn close(&self) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            receiver.join()?;
            log::info!("FrameChannel: receive loop stopped");
        }
        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, FrameSlot> {
        lock_slot(&self.slot)
    }
}

fn lock_slot(slot: &Mutex<FrameSlot>) -> MutexGuard<'_, FrameSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ReceiveLoop {
    socket: UdpSocket,
    slot: Arc<Mutex<FrameSlot>>,
    assembler: FrameAssembler,
    recv_buffer: usize,
    published: Arc<AtomicU64>,
}

impl ReceiveLoop {
    fn run(mut self, mut decoder: Box<dyn StreamDecoder>, stop: &StopSignal) {
        log::info!(
            "FrameChannel: receive loop started (decoder={})",
            decoder.name()
        );
        let mut buf = vec![0u8; self.recv_buffer];
        let mut sequence = 0u64;

        while !stop.is_triggered() {
            let len = match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => {
                    log::warn!("FrameChannel: receive error: {}", e);
                    stop.wait(RECEIVE_ERROR_BACKOFF);
                    continue;
                }
            };

            let encoded = match self.assembler.push(&buf[..len]) {
                Assembly::Pending => continue,
                Assembly::Overflow(dropped) => {
                    log::warn!("FrameChannel: dropped oversize picture ({} bytes)", dropped);
                    continue;
                }
                Assembly::Complete(encoded) => encoded,
            };

            let pictures = match decoder.decode(&encoded) {
                Ok(pictures) => pictures,
                Err(e) => {
                    log::debug!("FrameChannel: no frame this cycle: {}", e);
                    continue;
                }
            };

            for picture in &pictures {
                match Frame::from_decoded(picture, sequence) {
                    Ok(frame) => {
                        sequence += 1;
                        lock_slot(&self.slot).publish(Arc::new(frame));
                        self.published.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => log::debug!("FrameChannel: discarded picture: {}", e),
                }
            }
        }
        log::info!("FrameChannel: receive loop exiting");
    }
}
