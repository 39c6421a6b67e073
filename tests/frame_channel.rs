use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tello_pilot::config::VideoSettings;
use tello_pilot::{
    decoder_factory, DecodedPicture, FlightCommand, FrameChannel, FrameRead, InitStatus,
    PilotError, PixelFormat, ShutdownStatus, SimulatedDrone, StreamDecoder,
};

const MAX_DATAGRAM: usize = 8;

/// Passes buffers through as grey pictures and records what it was given.
struct RecordingDecoder {
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
    pictures_per_buffer: usize,
}

impl StreamDecoder for RecordingDecoder {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn decode(&mut self, encoded: &[u8]) -> Result<Vec<DecodedPicture>, PilotError> {
        self.seen.lock().unwrap().push(encoded.to_vec());
        if encoded.first() == Some(&0xff) {
            return Err(PilotError::Decode("corrupt picture".to_string()));
        }
        // Tag each picture of a burst with its index.
        Ok((0..self.pictures_per_buffer)
            .map(|i| {
                let mut data = encoded.to_vec();
                data.push(i as u8);
                DecodedPicture {
                    width: data.len() as u32,
                    height: 1,
                    stride: data.len(),
                    format: PixelFormat::Gray8,
                    data,
                }
            })
            .collect())
    }
}

fn settings() -> VideoSettings {
    VideoSettings {
        enabled: true,
        bind: "127.0.0.1:0".to_string(),
        max_datagram: MAX_DATAGRAM,
        recv_buffer: 64,
        max_frame_bytes: 1024,
        read_timeout: Duration::from_millis(20),
        decoder: "recording".to_string(),
    }
}

struct Harness {
    drone: Arc<SimulatedDrone>,
    channel: FrameChannel,
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
    sender: UdpSocket,
}

impl Harness {
    fn new(pictures_per_buffer: usize) -> Self {
        let drone = Arc::new(SimulatedDrone::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let decoder = RecordingDecoder {
            seen: seen.clone(),
            pictures_per_buffer,
        };
        let channel =
            FrameChannel::bind(&settings(), drone.clone(), decoder_factory(decoder)).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        Self {
            drone,
            channel,
            seen,
            sender,
        }
    }

    fn send(&self, datagram: &[u8]) {
        self.sender
            .send_to(datagram, self.channel.local_addr())
            .unwrap();
    }

    fn wait_for_frames(&self, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.channel.frames_published() < count {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for_decodes(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.seen.lock().unwrap().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for decoder");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn live_pixels(read: FrameRead) -> Vec<u8> {
    match read {
        FrameRead::Live(frame) => frame.pixels().to_vec(),
        other => panic!("expected live frame, got {:?}", other),
    }
}

#[test]
fn reads_require_initialization() {
    let harness = Harness::new(1);
    assert!(matches!(harness.channel.read(), Err(PilotError::NotInitialized)));
    assert!(matches!(
        harness.channel.set_freeze(true),
        Err(PilotError::NotInitialized)
    ));
    assert!(!harness.channel.is_frozen());
    assert!(harness.drone.commands().is_empty());
    harness.channel.close().unwrap();
}

#[test]
fn initialize_and_shutdown_are_idempotent() {
    let harness = Harness::new(1);
    assert_eq!(harness.channel.initialize().unwrap(), InitStatus::Initialized);
    assert_eq!(
        harness.channel.initialize().unwrap(),
        InitStatus::AlreadyInitialized
    );
    assert!(matches!(harness.channel.read().unwrap(), FrameRead::NoFrame));

    assert_eq!(harness.channel.shutdown().unwrap(), ShutdownStatus::Stopped);
    assert_eq!(
        harness.channel.shutdown().unwrap(),
        ShutdownStatus::NotInitialized
    );
    assert_eq!(
        harness.drone.commands(),
        vec![
            FlightCommand::Connect,
            FlightCommand::StreamOn,
            FlightCommand::StreamOff
        ]
    );
    harness.channel.close().unwrap();
}

#[test]
fn failed_stream_on_leaves_channel_uninitialized() {
    let harness = Harness::new(1);
    harness.drone.fail_next("streamon", 1);
    assert!(harness.channel.initialize().unwrap_err().is_transport());
    assert!(matches!(harness.channel.read(), Err(PilotError::NotInitialized)));
    assert_eq!(harness.channel.initialize().unwrap(), InitStatus::Initialized);
    harness.channel.close().unwrap();
}

#[test]
fn decoder_receives_concatenated_datagrams() {
    let harness = Harness::new(1);
    harness.channel.initialize().unwrap();

    harness.send(b"abcdefgh");
    harness.send(b"ijklmnop");
    harness.send(b"qr");
    harness.wait_for_frames(1);

    harness.send(b"st");
    harness.wait_for_frames(2);

    let seen = harness.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![b"abcdefghijklmnopqr".to_vec(), b"st".to_vec()]);
    assert_eq!(live_pixels(harness.channel.read().unwrap()), b"st\0".to_vec());
    harness.channel.close().unwrap();
}

#[test]
fn last_picture_of_a_burst_wins() {
    let harness = Harness::new(3);
    harness.channel.initialize().unwrap();

    harness.send(b"xy");
    harness.wait_for_frames(3);

    match harness.channel.read().unwrap() {
        FrameRead::Live(frame) => {
            assert_eq!(frame.pixels(), b"xy\x02");
            assert_eq!(frame.sequence, 2);
        }
        other => panic!("expected live frame, got {:?}", other),
    }
    harness.channel.close().unwrap();
}

#[test]
fn frozen_reads_hold_the_snapshot() {
    let harness = Harness::new(1);
    harness.channel.initialize().unwrap();

    harness.send(b"one");
    harness.wait_for_frames(1);
    harness.channel.set_freeze(true).unwrap();

    harness.send(b"two");
    harness.wait_for_frames(2);

    match harness.channel.read().unwrap() {
        FrameRead::Frozen(Some(frame)) => assert_eq!(frame.pixels(), b"one\0"),
        other => panic!("expected frozen snapshot, got {:?}", other),
    }

    harness.channel.set_freeze(false).unwrap();
    assert_eq!(live_pixels(harness.channel.read().unwrap()), b"two\0".to_vec());
    harness.channel.close().unwrap();
}

#[test]
fn decode_failures_do_not_stop_the_loop() {
    let harness = Harness::new(1);
    harness.channel.initialize().unwrap();

    harness.send(&[0xff, 1, 2]);
    harness.wait_for_decodes(1);
    assert!(matches!(harness.channel.read().unwrap(), FrameRead::NoFrame));

    harness.send(b"ok");
    harness.wait_for_frames(1);
    assert_eq!(live_pixels(harness.channel.read().unwrap()), b"ok\0".to_vec());
    harness.channel.close().unwrap();
}
