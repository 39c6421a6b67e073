//! Session orchestration.
//!
//! `PilotSession::start` wires the pipeline together and starts every
//! background loop; `shutdown` takes it down in reverse order.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::PilotConfig;
use crate::dispatch::{DetectionDispatcher, DetectionFilter, MacroBook};
use crate::flight::FlightSink;
use crate::keepalive::spawn_keepalive;
use crate::keys::{KeyRouter, KeySender};
use crate::session::FlightSession;
use crate::video::{DecoderFactory, FrameChannel, InitStatus};
use crate::LoopHandle;

pub struct PilotSession {
    flight: Arc<FlightSession>,
    channel: Option<Arc<FrameChannel>>,
    keys: KeySender,
    filter: DetectionFilter,
    loops: Vec<LoopHandle>,
}

impl PilotSession {
    /// Start a session against `sink`. With `decoder` set, the video channel
    /// is bound and the stream turned on; otherwise the session runs blind.
    pub fn start(
        config: &PilotConfig,
        sink: Arc<dyn FlightSink>,
        decoder: Option<DecoderFactory>,
    ) -> Result<Self> {
        let flight = Arc::new(FlightSession::new(sink.clone(), config.guard.clone()));

        let channel = match decoder {
            Some(decoder) => {
                let channel = FrameChannel::bind(&config.video, sink.clone(), decoder)?;
                match channel.initialize().context("turn video stream on")? {
                    InitStatus::Initialized => {
                        log::info!("PilotSession: video on {}", channel.local_addr())
                    }
                    InitStatus::AlreadyInitialized => {}
                }
                Some(Arc::new(channel))
            }
            None => {
                sink.connect().context("enter SDK mode")?;
                log::info!("PilotSession: video disabled");
                None
            }
        };

        let mut loops = Vec::new();
        loops.push(spawn_keepalive(sink.clone(), config.keepalive_interval)?);

        let (keys, key_loop) =
            KeyRouter::new(flight.clone(), channel.clone(), config.keys.clone()).spawn()?;
        loops.push(key_loop);

        let (filter, dispatcher) = DetectionDispatcher::new(
            flight.clone(),
            channel.clone(),
            MacroBook::standard(config.detection.macro_pause),
            config.detection.clone(),
        );
        loops.push(dispatcher.spawn()?);

        log::info!(
            "PilotSession: started ({}, floor {} cm)",
            sink.name(),
            config.guard.floor_cm
        );
        Ok(Self {
            flight,
            channel,
            keys,
            filter,
            loops,
        })
    }

    pub fn key_sender(&self) -> KeySender {
        self.keys.clone()
    }

    pub fn detection_filter(&self) -> DetectionFilter {
        self.filter.clone()
    }

    pub fn channel(&self) -> Option<&Arc<FrameChannel>> {
        self.channel.as_ref()
    }

    pub fn flight(&self) -> &Arc<FlightSession> {
        &self.flight
    }

    /// Stop every loop, land if airborne, stop the stream.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned once the drone has been told to land.
    pub fn shutdown(self) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;

        for handle in self.loops {
            let name = handle.name().to_string();
            if let Err(e) = handle.join() {
                log::error!("PilotSession: {} loop failed: {}", name, e);
                first_error.get_or_insert(e.context(format!("join {} loop", name)));
            }
        }

        if let Err(e) = self.flight.shutdown() {
            log::warn!("PilotSession: landing on shutdown failed: {}", e);
            first_error.get_or_insert(anyhow::Error::new(e).context("land on shutdown"));
        }

        if let Some(channel) = &self.channel {
            if let Err(e) = channel.shutdown() {
                log::warn!("PilotSession: stream off failed: {}", e);
            }
            if let Err(e) = channel.close() {
                log::error!("PilotSession: video loop failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("PilotSession: shut down");
                Ok(())
            }
        }
    }
}
