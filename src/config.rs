use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DRONE_ADDR: &str = "stub://tello";
const DEFAULT_COMMAND_BIND: &str = "0.0.0.0:8889";
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 7_000;
const DEFAULT_VIDEO_BIND: &str = "0.0.0.0:11111";
const DEFAULT_MAX_DATAGRAM: usize = 1460;
const DEFAULT_RECV_BUFFER: usize = 2048;
const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_VIDEO_READ_TIMEOUT_MS: u64 = 250;
const DEFAULT_DECODER: &str = "passthrough";
const DEFAULT_KEEPALIVE_SECS: u64 = 5;
const DEFAULT_FLOOR_CM: i32 = 100;
const DEFAULT_ASCEND_STEP_CM: u32 = 20;
const DEFAULT_GUARD_IDLE_MS: u64 = 250;
const DEFAULT_MOVE_CM: u32 = 30;
const DEFAULT_CLIMB_CM: u32 = 20;
const DEFAULT_ROTATE_DEG: u32 = 90;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_CONFIDENCE: f32 = 0.80;
const DEFAULT_PHOTO_DIR: &str = ".";
const DEFAULT_MACRO_PAUSE_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct PilotConfigFile {
    drone: Option<DroneConfigFile>,
    video: Option<VideoConfigFile>,
    keepalive: Option<KeepAliveConfigFile>,
    guard: Option<GuardConfigFile>,
    keys: Option<KeyConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DroneConfigFile {
    addr: Option<String>,
    command_bind: Option<String>,
    response_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    enabled: Option<bool>,
    bind: Option<String>,
    max_datagram: Option<usize>,
    recv_buffer: Option<usize>,
    max_frame_bytes: Option<usize>,
    read_timeout_ms: Option<u64>,
    decoder: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct KeepAliveConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct GuardConfigFile {
    floor_cm: Option<i32>,
    ascend_step_cm: Option<u32>,
    idle_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct KeyConfigFile {
    move_cm: Option<u32>,
    climb_cm: Option<u32>,
    rotate_deg: Option<u32>,
    poll_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    poll_timeout_ms: Option<u64>,
    photo_dir: Option<PathBuf>,
    macro_pause_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub drone: DroneSettings,
    pub video: VideoSettings,
    pub keepalive_interval: Duration,
    pub guard: GuardSettings,
    pub keys: KeySettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone)]
pub struct DroneSettings {
    /// `udp://host:port` for a real drone, `stub://name` for the simulator.
    pub addr: String,
    /// Local address the command socket binds to.
    pub command_bind: String,
    pub response_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub enabled: bool,
    pub bind: String,
    /// Datagrams shorter than this terminate a picture.
    pub max_datagram: usize,
    pub recv_buffer: usize,
    pub max_frame_bytes: usize,
    pub read_timeout: Duration,
    pub decoder: String,
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub floor_cm: i32,
    pub ascend_step_cm: u32,
    pub idle_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct KeySettings {
    pub move_cm: u32,
    pub climb_cm: u32,
    pub rotate_deg: u32,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub poll_timeout: Duration,
    pub photo_dir: PathBuf,
    pub macro_pause: Duration,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self::from_file(PilotConfigFile::default())
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            floor_cm: DEFAULT_FLOOR_CM,
            ascend_step_cm: DEFAULT_ASCEND_STEP_CM,
            idle_wait: Duration::from_millis(DEFAULT_GUARD_IDLE_MS),
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            move_cm: DEFAULT_MOVE_CM,
            climb_cm: DEFAULT_CLIMB_CM,
            rotate_deg: DEFAULT_ROTATE_DEG,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            photo_dir: PathBuf::from(DEFAULT_PHOTO_DIR),
            macro_pause: Duration::from_millis(DEFAULT_MACRO_PAUSE_MS),
        }
    }
}

impl PilotConfig {
    /// Load from `TELLO_PILOT_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TELLO_PILOT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PilotConfigFile) -> Self {
        let drone = file.drone.unwrap_or_default();
        let video = file.video.unwrap_or_default();
        let guard = file.guard.unwrap_or_default();
        let keys = file.keys.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        Self {
            drone: DroneSettings {
                addr: drone
                    .addr
                    .unwrap_or_else(|| DEFAULT_DRONE_ADDR.to_string()),
                command_bind: drone
                    .command_bind
                    .unwrap_or_else(|| DEFAULT_COMMAND_BIND.to_string()),
                response_timeout: Duration::from_millis(
                    drone
                        .response_timeout_ms
                        .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS),
                ),
            },
            video: VideoSettings {
                enabled: video.enabled.unwrap_or(true),
                bind: video
                    .bind
                    .unwrap_or_else(|| DEFAULT_VIDEO_BIND.to_string()),
                max_datagram: video.max_datagram.unwrap_or(DEFAULT_MAX_DATAGRAM),
                recv_buffer: video.recv_buffer.unwrap_or(DEFAULT_RECV_BUFFER),
                max_frame_bytes: video.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES),
                read_timeout: Duration::from_millis(
                    video
                        .read_timeout_ms
                        .unwrap_or(DEFAULT_VIDEO_READ_TIMEOUT_MS),
                ),
                decoder: video
                    .decoder
                    .unwrap_or_else(|| DEFAULT_DECODER.to_string()),
            },
            keepalive_interval: Duration::from_secs(
                file.keepalive
                    .and_then(|keepalive| keepalive.interval_secs)
                    .unwrap_or(DEFAULT_KEEPALIVE_SECS),
            ),
            guard: GuardSettings {
                floor_cm: guard.floor_cm.unwrap_or(DEFAULT_FLOOR_CM),
                ascend_step_cm: guard.ascend_step_cm.unwrap_or(DEFAULT_ASCEND_STEP_CM),
                idle_wait: Duration::from_millis(
                    guard.idle_wait_ms.unwrap_or(DEFAULT_GUARD_IDLE_MS),
                ),
            },
            keys: KeySettings {
                move_cm: keys.move_cm.unwrap_or(DEFAULT_MOVE_CM),
                climb_cm: keys.climb_cm.unwrap_or(DEFAULT_CLIMB_CM),
                rotate_deg: keys.rotate_deg.unwrap_or(DEFAULT_ROTATE_DEG),
                poll_timeout: Duration::from_millis(
                    keys.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
                ),
            },
            detection: DetectionSettings {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                poll_timeout: Duration::from_millis(
                    detection.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
                ),
                photo_dir: detection
                    .photo_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PHOTO_DIR)),
                macro_pause: Duration::from_millis(
                    detection.macro_pause_ms.unwrap_or(DEFAULT_MACRO_PAUSE_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TELLO_PILOT_DRONE_ADDR") {
            if !addr.trim().is_empty() {
                self.drone.addr = addr;
            }
        }
        if let Ok(bind) = std::env::var("TELLO_PILOT_VIDEO_BIND") {
            if !bind.trim().is_empty() {
                self.video.bind = bind;
            }
        }
        if let Ok(floor) = std::env::var("TELLO_PILOT_FLOOR_CM") {
            self.guard.floor_cm = floor
                .parse()
                .map_err(|_| anyhow!("TELLO_PILOT_FLOOR_CM must be an integer number of centimetres"))?;
        }
        if let Ok(confidence) = std::env::var("TELLO_PILOT_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .parse()
                .map_err(|_| anyhow!("TELLO_PILOT_CONFIDENCE must be a number in (0, 1]"))?;
        }
        if let Ok(dir) = std::env::var("TELLO_PILOT_PHOTO_DIR") {
            if !dir.trim().is_empty() {
                self.detection.photo_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.drone.response_timeout.is_zero() {
            return Err(anyhow!("drone response timeout must be greater than zero"));
        }
        if self.video.max_datagram == 0 {
            return Err(anyhow!("video max_datagram must be greater than zero"));
        }
        if self.video.max_datagram > self.video.recv_buffer {
            return Err(anyhow!(
                "video max_datagram ({}) exceeds recv_buffer ({})",
                self.video.max_datagram,
                self.video.recv_buffer
            ));
        }
        if self.video.read_timeout.is_zero() {
            return Err(anyhow!("video read timeout must be greater than zero"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(anyhow!("keepalive interval must be greater than zero"));
        }
        if self.guard.floor_cm <= 0 {
            return Err(anyhow!("altitude floor must be greater than zero"));
        }
        if self.guard.ascend_step_cm == 0 || self.guard.idle_wait.is_zero() {
            return Err(anyhow!("guard ascend step and idle wait must be greater than zero"));
        }
        if self.keys.poll_timeout.is_zero() || self.detection.poll_timeout.is_zero() {
            return Err(anyhow!("queue poll timeouts must be greater than zero"));
        }
        let threshold = self.detection.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!(
                "confidence threshold {} must be in (0, 1]",
                threshold
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PilotConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PilotConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.drone.addr, "stub://tello");
        assert_eq!(cfg.video.max_datagram, 1460);
        assert_eq!(cfg.video.recv_buffer, 2048);
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(5));
        assert_eq!(cfg.guard.floor_cm, 100);
        assert_eq!(cfg.guard.ascend_step_cm, 20);
        assert_eq!(cfg.keys.move_cm, 30);
        assert!((cfg.detection.confidence_threshold - 0.80).abs() < f32::EPSILON);
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = PilotConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.detection.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_datagram_larger_than_buffer() {
        let mut cfg = PilotConfig::default();
        cfg.video.max_datagram = 4096;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file: PilotConfigFile =
            serde_json::from_str(r#"{ "guard": { "floor_cm": 150 } }"#).unwrap();
        let cfg = PilotConfig::from_file(file);
        assert_eq!(cfg.guard.floor_cm, 150);
        assert_eq!(cfg.guard.ascend_step_cm, 20);
        assert_eq!(cfg.video.bind, "0.0.0.0:11111");
    }
}
