use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use tello_pilot::config::PilotConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TELLO_PILOT_CONFIG",
        "TELLO_PILOT_DRONE_ADDR",
        "TELLO_PILOT_VIDEO_BIND",
        "TELLO_PILOT_FLOOR_CM",
        "TELLO_PILOT_CONFIDENCE",
        "TELLO_PILOT_PHOTO_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "drone": {
                "addr": "udp://192.168.10.1:8889",
                "response_timeout_ms": 3000
            },
            "video": {
                "bind": "0.0.0.0:11112",
                "decoder": "h264"
            },
            "keepalive": { "interval_secs": 3 },
            "guard": { "floor_cm": 120, "idle_wait_ms": 100 },
            "keys": { "move_cm": 50 },
            "detection": {
                "confidence_threshold": 0.9,
                "photo_dir": "/tmp/photos"
            }
        }"#,
    );

    std::env::set_var("TELLO_PILOT_CONFIG", file.path());
    std::env::set_var("TELLO_PILOT_FLOOR_CM", "150");
    std::env::set_var("TELLO_PILOT_PHOTO_DIR", "/var/lib/tello");

    let cfg = PilotConfig::load().expect("load config");
    assert_eq!(cfg.drone.addr, "udp://192.168.10.1:8889");
    assert_eq!(cfg.drone.response_timeout, Duration::from_millis(3000));
    assert_eq!(cfg.video.bind, "0.0.0.0:11112");
    assert_eq!(cfg.video.decoder, "h264");
    assert_eq!(cfg.video.max_datagram, 1460);
    assert_eq!(cfg.keepalive_interval, Duration::from_secs(3));
    assert_eq!(cfg.guard.floor_cm, 150);
    assert_eq!(cfg.guard.idle_wait, Duration::from_millis(100));
    assert_eq!(cfg.guard.ascend_step_cm, 20);
    assert_eq!(cfg.keys.move_cm, 50);
    assert_eq!(cfg.keys.climb_cm, 20);
    assert!((cfg.detection.confidence_threshold - 0.9).abs() < f32::EPSILON);
    assert_eq!(cfg.detection.photo_dir, PathBuf::from("/var/lib/tello"));

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PilotConfig::load().expect("load defaults");
    assert_eq!(cfg.drone.addr, "stub://tello");
    assert_eq!(cfg.video.bind, "0.0.0.0:11111");
    assert!(cfg.video.enabled);
    assert_eq!(cfg.keepalive_interval, Duration::from_secs(5));
    assert_eq!(cfg.detection.macro_pause, Duration::from_secs(5));
}

#[test]
fn rejects_invalid_env_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TELLO_PILOT_CONFIDENCE", "1.5");
    assert!(PilotConfig::load().is_err());

    std::env::set_var("TELLO_PILOT_CONFIDENCE", "high");
    assert!(PilotConfig::load().is_err());

    clear_env();
    std::env::set_var("TELLO_PILOT_FLOOR_CM", "0");
    assert!(PilotConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "guard": { "floor_cm": "high" } }"#);
    let err = PilotConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    let file = write_config(r#"{ "video": { "max_datagram": 4096 } }"#);
    assert!(PilotConfig::load_from(Some(file.path())).is_err());
}
