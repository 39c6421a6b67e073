//! Control-link heartbeat.

use std::sync::Arc;
use std::time::Duration;

use crate::flight::FlightSink;
use crate::{LoopHandle, PilotError, StopSignal};

/// Send a heartbeat every `interval` until stopped.
///
/// Failures are logged and the next beat is tried on schedule.
pub fn spawn_keepalive(
    sink: Arc<dyn FlightSink>,
    interval: Duration,
) -> Result<LoopHandle, PilotError> {
    LoopHandle::spawn("keepalive", StopSignal::new(), move |stop| {
        log::info!(
            "KeepAlive: heartbeat every {:?} ({})",
            interval,
            sink.name()
        );
        while !stop.wait(interval) {
            if let Err(e) = sink.keep_alive() {
                log::warn!("KeepAlive: heartbeat failed: {}", e);
            }
        }
        log::info!("KeepAlive: stopped");
    })
}
