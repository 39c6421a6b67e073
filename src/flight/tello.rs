//! Tello text SDK over UDP.
//!
//! One request is in flight at a time: the exchange mutex pairs every
//! command with its reply. Replies are `ok`, `error ...`, or a value for
//! queries (`height?` answers in decimetres, e.g. `"10dm"`).

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{FlightCommand, FlightSink, Query};
use crate::PilotError;

const MAX_REPLY_BYTES: usize = 1024;

pub struct TelloSink {
    socket: UdpSocket,
    drone_addr: SocketAddr,
    response_timeout: Duration,
    exchange: Mutex<()>,
}

impl TelloSink {
    pub fn bind(local: &str, drone: &str, response_timeout: Duration) -> Result<Self> {
        let socket =
            UdpSocket::bind(local).with_context(|| format!("bind command socket on {}", local))?;
        socket
            .set_read_timeout(Some(response_timeout))
            .context("set command socket read timeout")?;
        let drone_addr = drone
            .to_socket_addrs()
            .with_context(|| format!("resolve drone address {}", drone))?
            .next()
            .ok_or_else(|| anyhow!("drone address {} did not resolve", drone))?;
        Ok(Self {
            socket,
            drone_addr,
            response_timeout,
            exchange: Mutex::new(()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn request(&self, text: &str) -> Result<String, PilotError> {
        let _exchange = self.exchange.lock().unwrap_or_else(PoisonError::into_inner);
        self.drain_stale_replies();

        self.socket
            .send_to(text.as_bytes(), self.drone_addr)
            .map_err(|e| PilotError::transport(text, e))?;

        let mut buf = [0u8; MAX_REPLY_BYTES];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if peer.ip() != self.drone_addr.ip() {
                        log::debug!("TelloSink: ignoring datagram from {}", peer);
                        continue;
                    }
                    return Ok(String::from_utf8_lossy(&buf[..len]).trim().to_string());
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(PilotError::Timeout {
                        command: text.to_string(),
                        timeout: self.response_timeout,
                    });
                }
                Err(e) => return Err(PilotError::transport(text, e)),
            }
        }
    }

    /// Discard late replies to earlier requests that timed out.
    fn drain_stale_replies(&self) {
        if self.socket.set_nonblocking(true).is_err() {
            return;
        }
        let mut buf = [0u8; MAX_REPLY_BYTES];
        while let Ok((len, _)) = self.socket.recv_from(&mut buf) {
            log::debug!(
                "TelloSink: dropped stale reply '{}'",
                String::from_utf8_lossy(&buf[..len]).trim()
            );
        }
        if let Err(e) = self.socket.set_nonblocking(false) {
            log::warn!("TelloSink: failed to restore blocking mode: {}", e);
        }
    }
}

impl FlightSink for TelloSink {
    fn name(&self) -> &str {
        "tello"
    }

    fn send(&self, command: &FlightCommand) -> Result<(), PilotError> {
        let text = command.sdk_text();
        let reply = self.request(&text)?;
        check_ack(&text, &reply)
    }

    fn query(&self, query: Query) -> Result<i32, PilotError> {
        let text = query.sdk_text();
        let reply = self.request(text)?;
        let value = parse_numeric_reply(text, &reply)?;
        Ok(match query {
            Query::AltitudeCm if reply.ends_with("dm") => value * 10,
            _ => value,
        })
    }
}

fn check_ack(command: &str, reply: &str) -> Result<(), PilotError> {
    if reply.eq_ignore_ascii_case("ok") {
        Ok(())
    } else {
        Err(PilotError::Rejected {
            command: command.to_string(),
            reply: reply.to_string(),
        })
    }
}

fn parse_numeric_reply(command: &str, reply: &str) -> Result<i32, PilotError> {
    let digits: String = reply
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().map_err(|_| PilotError::Rejected {
        command: command.to_string(),
        reply: reply.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::Direction;
    use std::thread;

    fn fake_drone(replies: Vec<&'static str>) -> (UdpSocket, thread::JoinHandle<Vec<String>>) {
        let drone = UdpSocket::bind("127.0.0.1:0").unwrap();
        let responder = drone.try_clone().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            let mut buf = [0u8; 256];
            for reply in replies {
                let (len, peer) = responder.recv_from(&mut buf).unwrap();
                seen.push(String::from_utf8_lossy(&buf[..len]).to_string());
                responder.send_to(reply.as_bytes(), peer).unwrap();
            }
            seen
        });
        (drone, handle)
    }

    #[test]
    fn sends_sdk_text_and_accepts_ok() {
        let (drone, handle) = fake_drone(vec!["ok", "ok"]);
        let addr = drone.local_addr().unwrap().to_string();
        let sink = TelloSink::bind("127.0.0.1:0", &addr, Duration::from_secs(2)).unwrap();

        sink.connect().unwrap();
        sink.move_by(Direction::Forward, 30).unwrap();

        assert_eq!(handle.join().unwrap(), vec!["command", "forward 30"]);
    }

    #[test]
    fn height_reply_is_converted_to_centimetres() {
        let (drone, handle) = fake_drone(vec!["10dm"]);
        let addr = drone.local_addr().unwrap().to_string();
        let sink = TelloSink::bind("127.0.0.1:0", &addr, Duration::from_secs(2)).unwrap();

        assert_eq!(sink.altitude_cm().unwrap(), 100);
        handle.join().unwrap();
    }

    #[test]
    fn error_reply_is_rejected() {
        let (drone, handle) = fake_drone(vec!["error Motor stop"]);
        let addr = drone.local_addr().unwrap().to_string();
        let sink = TelloSink::bind("127.0.0.1:0", &addr, Duration::from_secs(2)).unwrap();

        let err = sink.takeoff().unwrap_err();
        assert!(matches!(err, PilotError::Rejected { .. }));
        assert!(err.is_transport());
        handle.join().unwrap();
    }

    #[test]
    fn silent_drone_times_out() {
        let drone = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = drone.local_addr().unwrap().to_string();
        let sink = TelloSink::bind("127.0.0.1:0", &addr, Duration::from_millis(50)).unwrap();

        assert!(matches!(sink.land(), Err(PilotError::Timeout { .. })));
    }

    #[test]
    fn numeric_reply_parsing() {
        assert_eq!(parse_numeric_reply("battery?", "87").unwrap(), 87);
        assert_eq!(parse_numeric_reply("height?", "3dm").unwrap(), 3);
        assert!(parse_numeric_reply("battery?", "error").is_err());
    }
}
