use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use log::LevelFilter;
use tempfile::{Builder, NamedTempFile};

use cam_relay::config::{LogFileMode, RelayConfig};
use cam_relay::FourCc;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAM_RELAY_CONFIG",
        "CAM_RELAY_CAMERAS",
        "CAM_RELAY_QUEUE_SIZE",
        "CAM_RELAY_SHOW_FRAMES",
        "CAM_RELAY_SHOW_FOLDER",
        "CAM_RELAY_WRITE_FRAMES",
        "CAM_RELAY_WRITE_FOLDER",
        "CAM_RELAY_MONITOR",
        "CAM_RELAY_RECONNECT_DELAY_MS",
        "CAM_RELAY_LOG_LEVEL",
        "CAM_RELAY_LOG_FILE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelayConfig::load().expect("load defaults");
    assert_eq!(cfg, RelayConfig::default());
    assert_eq!(cfg.camera_info_file.to_str(), Some("data/cameras_info.csv"));
    assert!(cfg.write_frames);
    assert!(!cfg.show_frames);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera_info_file": "site/cameras.csv",
        "camera_frames_que_size": 4,
        "show_frames": true,
        "write_frames_folder": "/srv/videos/",
        "write_frames_fps": 5.0,
        "write_frames_four_cc": "RGB3",
        "write_frames_suffix": ".rgb",
        "cam_monitor_frame_div": 25,
        "read_timeout_ms": 500,
        "log_file": "relay.log",
        "log_file_mode": "w"
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CAM_RELAY_CONFIG", file.path());
    std::env::set_var("CAM_RELAY_QUEUE_SIZE", "2");
    std::env::set_var("CAM_RELAY_MONITOR", "off");
    std::env::set_var("CAM_RELAY_LOG_LEVEL", "debug");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.camera_info_file.to_str(), Some("site/cameras.csv"));
    assert_eq!(cfg.camera_frames_que_size, 2);
    assert!(cfg.show_frames);
    assert!(!cfg.cam_monitor);
    assert_eq!(cfg.write_frames_folder, "/srv/videos/");
    assert_eq!(cfg.write_frames_fps, 5.0);
    assert_eq!(cfg.write_frames_four_cc, FourCc::RGB3);
    assert_eq!(cfg.write_frames_suffix, ".rgb");
    assert_eq!(cfg.cam_monitor_frame_div, 25);
    assert_eq!(cfg.read_timeout, Duration::from_millis(500));
    assert_eq!(cfg.log.level, LevelFilter::Debug);
    assert_eq!(cfg.log.mode, LogFileMode::Truncate);
    assert_eq!(
        cfg.log.file.as_deref().and_then(|p| p.to_str()),
        Some("relay.log")
    );

    clear_env();
}

#[test]
fn toml_extension_selects_toml_parser() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(b"camera_frames_que_size = 3\nwrite_frames = false\nshutdown_poll_ms = 50\n")
        .expect("write config");

    let cfg = RelayConfig::from_path(file.path()).expect("load toml");
    assert_eq!(cfg.camera_frames_que_size, 3);
    assert!(!cfg.write_frames);
    assert_eq!(cfg.shutdown_poll, Duration::from_millis(50));
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{"camera_frames_que_size": 0}"#,
        r#"{"cam_monitor_frame_div": 0}"#,
        r#"{"write_frames_fps": -1.0}"#,
        r#"{"write_frames_four_cc": "H264"}"#,
        r#"{"write_frames_suffix": ""}"#,
        r#"{"log_file_mode": "rw"}"#,
        r#"{"log_level": "chatty"}"#,
        r#"{"camera_frames_que_size": "ten"}"#,
    ] {
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(json.as_bytes()).expect("write config");
        assert!(
            RelayConfig::from_path(file.path()).is_err(),
            "{json} should be rejected"
        );
    }

    std::env::set_var("CAM_RELAY_QUEUE_SIZE", "many");
    assert!(RelayConfig::load().is_err());
    std::env::set_var("CAM_RELAY_QUEUE_SIZE", "0");
    assert!(RelayConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    std::env::set_var("CAM_RELAY_CONFIG", dir.path().join("absent.json"));
    let err = RelayConfig::load().unwrap_err();
    assert!(err.to_string().contains("absent.json"));
    clear_env();
}
