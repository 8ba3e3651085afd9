//! Synthetic frame source (`stub://` descriptors).
//!
//! Descriptor form: `stub://<label>?width=W&height=H&fps=F&drop=P`
//!
//! - `width`/`height`: frame size (default 640x480)
//! - `fps`: pacing; `0` produces frames as fast as they are read (default 10)
//! - `drop`: probability in `0..=1` that a read fails, to emulate a flaky
//!   camera (default 0)

use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::{Duration, Instant};

use super::{FrameSource, RawImage, SourceError};

pub const SCHEME: &str = "stub://";

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub drop_probability: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            label: "synthetic".to_string(),
            width: 640,
            height: 480,
            fps: 10,
            drop_probability: 0.0,
        }
    }
}

impl SyntheticConfig {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let rest = descriptor
            .strip_prefix(SCHEME)
            .ok_or_else(|| anyhow!("not a {} descriptor: {}", SCHEME, descriptor))?;
        let (label, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut cfg = Self {
            label: label.to_string(),
            ..Self::default()
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("{}: expected key=value, got {:?}", descriptor, pair))?;
            let bad = |_| anyhow!("{}: invalid value for {}: {:?}", descriptor, key, value);
            match key {
                "width" => cfg.width = value.parse().map_err(bad)?,
                "height" => cfg.height = value.parse().map_err(bad)?,
                "fps" => cfg.fps = value.parse().map_err(bad)?,
                "drop" => {
                    cfg.drop_probability = value.parse().map_err(|_| {
                        anyhow!("{}: invalid drop probability {:?}", descriptor, value)
                    })?
                }
                other => return Err(anyhow!("{}: unknown option {:?}", descriptor, other)),
            }
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(anyhow!("{}: frame size must be non-zero", descriptor));
        }
        if !(0.0..=1.0).contains(&cfg.drop_probability) {
            return Err(anyhow!("{}: drop probability must be within 0..=1", descriptor));
        }
        Ok(cfg)
    }
}

/// Generates a moving gradient. Always connects.
pub struct SyntheticSource {
    config: SyntheticConfig,
    open: bool,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            open: false,
            frame_count: 0,
            next_due: None,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_count
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.config.fps > 0).then(|| Duration::from_secs(1) / self.config.fps)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        let shift = self.frame_count;
        (0..pixel_count)
            .map(|i| ((i as u64 + shift) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), SourceError> {
        self.open = true;
        self.next_due = None;
        log::info!("SyntheticSource: connected to {}", self.config.label);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<RawImage, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }

        if let Some(interval) = self.frame_interval() {
            let now = Instant::now();
            let due = self.next_due.unwrap_or(now);
            let wait = due.saturating_duration_since(now);
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(SourceError::Stalled(timeout));
            }
            std::thread::sleep(wait);
            self.next_due = Some(due.max(now) + interval);
        }

        if self.config.drop_probability > 0.0
            && rand::thread_rng().gen_bool(self.config.drop_probability)
        {
            return Err(SourceError::Read(format!(
                "{}: synthetic read failure",
                self.config.label
            )));
        }

        self.frame_count += 1;
        Ok(RawImage {
            data: self.generate_pixels(),
            width: self.config.width,
            height: self.config.height,
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}
