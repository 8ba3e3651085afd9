//! Relay configuration.
//!
//! Values are layered: built-in defaults, then the optional config file
//! (JSON, or TOML when the path ends in `.toml`), then `CAM_RELAY_*`
//! environment overrides. `validate()` runs last and rejects the result as a
//! whole.

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::sink::{DefaultWriterFactory, FourCc};

const DEFAULT_CAMERA_INFO_FILE: &str = "data/cameras_info.csv";
const DEFAULT_QUEUE_SIZE: usize = 10;
const DEFAULT_SHOW_FOLDER: &str = "preview/";
const DEFAULT_WRITE_FOLDER: &str = "videos/";
const DEFAULT_WRITE_FPS: f64 = 3.0;
const DEFAULT_WRITE_SUFFIX: &str = ".mjpg";
const DEFAULT_MONITOR_FRAME_DIV: u64 = 100;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;
const DEFAULT_QUEUE_POLL_MS: u64 = 20;
const DEFAULT_SHUTDOWN_POLL_MS: u64 = 1000;

pub const CONFIG_ENV: &str = "CAM_RELAY_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    camera_info_file: Option<PathBuf>,
    camera_frames_que_size: Option<usize>,
    show_frames: Option<bool>,
    show_frames_folder: Option<String>,
    write_frames: Option<bool>,
    write_frames_folder: Option<String>,
    write_frames_fps: Option<f64>,
    write_frames_four_cc: Option<String>,
    write_frames_suffix: Option<String>,
    cam_monitor: Option<bool>,
    cam_monitor_frame_div: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    queue_poll_ms: Option<u64>,
    shutdown_poll_ms: Option<u64>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    log_file_mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFileMode {
    #[default]
    Append,
    Truncate,
}

impl FromStr for LogFileMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "a" => Ok(LogFileMode::Append),
            "w" => Ok(LogFileMode::Truncate),
            other => Err(anyhow!("log_file_mode must be \"a\" or \"w\", got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
    pub mode: LogFileMode,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file: None,
            mode: LogFileMode::Append,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub camera_info_file: PathBuf,
    /// Frame queue capacity (K).
    pub camera_frames_que_size: usize,
    pub show_frames: bool,
    pub show_frames_folder: String,
    pub write_frames: bool,
    pub write_frames_folder: String,
    pub write_frames_fps: f64,
    pub write_frames_four_cc: FourCc,
    pub write_frames_suffix: String,
    pub cam_monitor: bool,
    pub cam_monitor_frame_div: u64,
    pub reconnect_delay: Duration,
    pub read_timeout: Duration,
    pub queue_poll: Duration,
    pub shutdown_poll: Duration,
    pub log: LogSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            camera_info_file: PathBuf::from(DEFAULT_CAMERA_INFO_FILE),
            camera_frames_que_size: DEFAULT_QUEUE_SIZE,
            show_frames: false,
            show_frames_folder: DEFAULT_SHOW_FOLDER.to_string(),
            write_frames: true,
            write_frames_folder: DEFAULT_WRITE_FOLDER.to_string(),
            write_frames_fps: DEFAULT_WRITE_FPS,
            write_frames_four_cc: FourCc::MJPG,
            write_frames_suffix: DEFAULT_WRITE_SUFFIX.to_string(),
            cam_monitor: true,
            cam_monitor_frame_div: DEFAULT_MONITOR_FRAME_DIV,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            queue_poll: Duration::from_millis(DEFAULT_QUEUE_POLL_MS),
            shutdown_poll: Duration::from_millis(DEFAULT_SHUTDOWN_POLL_MS),
            log: LogSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then the file named by `CAM_RELAY_CONFIG` (if set), then
    /// `CAM_RELAY_*` overrides.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_path(Path::new(&path)),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env()?;
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Load a specific file; env overrides still apply.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = read_config_file(path)?;
        let mut cfg = Self::from_file(file)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let write_frames_four_cc = match file.write_frames_four_cc {
            Some(code) => code.parse()?,
            None => defaults.write_frames_four_cc,
        };
        let level = match file.log_level {
            Some(level) => parse_level(&level)?,
            None => defaults.log.level,
        };
        let mode = match file.log_file_mode {
            Some(mode) => mode.parse()?,
            None => defaults.log.mode,
        };
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        Ok(Self {
            camera_info_file: file.camera_info_file.unwrap_or(defaults.camera_info_file),
            camera_frames_que_size: file
                .camera_frames_que_size
                .unwrap_or(defaults.camera_frames_que_size),
            show_frames: file.show_frames.unwrap_or(defaults.show_frames),
            show_frames_folder: file
                .show_frames_folder
                .unwrap_or(defaults.show_frames_folder),
            write_frames: file.write_frames.unwrap_or(defaults.write_frames),
            write_frames_folder: file
                .write_frames_folder
                .unwrap_or(defaults.write_frames_folder),
            write_frames_fps: file.write_frames_fps.unwrap_or(defaults.write_frames_fps),
            write_frames_four_cc,
            write_frames_suffix: file
                .write_frames_suffix
                .unwrap_or(defaults.write_frames_suffix),
            cam_monitor: file.cam_monitor.unwrap_or(defaults.cam_monitor),
            cam_monitor_frame_div: file
                .cam_monitor_frame_div
                .unwrap_or(defaults.cam_monitor_frame_div),
            reconnect_delay: millis(file.reconnect_delay_ms, defaults.reconnect_delay),
            read_timeout: millis(file.read_timeout_ms, defaults.read_timeout),
            queue_poll: millis(file.queue_poll_ms, defaults.queue_poll),
            shutdown_poll: millis(file.shutdown_poll_ms, defaults.shutdown_poll),
            log: LogSettings {
                level,
                file: file.log_file,
                mode,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("CAM_RELAY_CAMERAS") {
            self.camera_info_file = PathBuf::from(path);
        }
        if let Some(size) = env_value("CAM_RELAY_QUEUE_SIZE") {
            self.camera_frames_que_size = size
                .parse()
                .map_err(|_| anyhow!("CAM_RELAY_QUEUE_SIZE must be a positive integer"))?;
        }
        if let Some(flag) = env_value("CAM_RELAY_SHOW_FRAMES") {
            self.show_frames = parse_flag("CAM_RELAY_SHOW_FRAMES", &flag)?;
        }
        if let Some(folder) = env_value("CAM_RELAY_SHOW_FOLDER") {
            self.show_frames_folder = folder;
        }
        if let Some(flag) = env_value("CAM_RELAY_WRITE_FRAMES") {
            self.write_frames = parse_flag("CAM_RELAY_WRITE_FRAMES", &flag)?;
        }
        if let Some(folder) = env_value("CAM_RELAY_WRITE_FOLDER") {
            self.write_frames_folder = folder;
        }
        if let Some(flag) = env_value("CAM_RELAY_MONITOR") {
            self.cam_monitor = parse_flag("CAM_RELAY_MONITOR", &flag)?;
        }
        if let Some(delay) = env_value("CAM_RELAY_RECONNECT_DELAY_MS") {
            let ms: u64 = delay.parse().map_err(|_| {
                anyhow!("CAM_RELAY_RECONNECT_DELAY_MS must be an integer number of milliseconds")
            })?;
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(level) = env_value("CAM_RELAY_LOG_LEVEL") {
            self.log.level = parse_level(&level)?;
        }
        if let Some(path) = env_value("CAM_RELAY_LOG_FILE") {
            self.log.file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_frames_que_size == 0 {
            return Err(anyhow!("camera_frames_que_size must be at least 1"));
        }
        if self.cam_monitor_frame_div == 0 {
            return Err(anyhow!("cam_monitor_frame_div must be at least 1"));
        }
        if !self.write_frames_fps.is_finite() || self.write_frames_fps <= 0.0 {
            return Err(anyhow!(
                "write_frames_fps must be a positive number, got {}",
                self.write_frames_fps
            ));
        }
        if !DefaultWriterFactory::supports(self.write_frames_four_cc) {
            return Err(anyhow!(
                "write_frames_four_cc {} is not supported (use MJPG or RGB3)",
                self.write_frames_four_cc
            ));
        }
        if self.write_frames_suffix.is_empty() {
            return Err(anyhow!("write_frames_suffix must not be empty"));
        }
        if self.read_timeout.is_zero() {
            return Err(anyhow!("read_timeout_ms must be greater than zero"));
        }
        if self.queue_poll.is_zero() || self.shutdown_poll.is_zero() {
            return Err(anyhow!(
                "queue_poll_ms and shutdown_poll_ms must be greater than zero"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got {:?}", key, value)),
    }
}

fn parse_level(value: &str) -> Result<LevelFilter> {
    value.trim().parse().map_err(|_| {
        anyhow!(
            "log_level must be one of off/error/warn/info/debug/trace, got {:?}",
            value
        )
    })
}
