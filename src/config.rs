//! Configuration for the ToonBooth kiosk.
//!
//! Tunables live here as constants; per-install choices come from a JSON
//! settings file (`TOONBOOTH_SETTINGS`, default `settings.json`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::api::SheetOptions;
use crate::state::TriggerMode;

/// Default backend URL when neither the settings file nor the environment set one
pub const DEFAULT_API_BASE: &str = "http://localhost:5000";

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "TOONBOOTH_SETTINGS";

/// Environment variable overriding the backend URL
pub const API_BASE_ENV: &str = "TOONBOOTH_API_BASE";

/// Consecutive well-placed frames required before auto-capture fires
pub const STABLE_FRAMES: u32 = 8;

/// Allowed distance of the face centre from the overlay centre, as a fraction
/// of overlay width (horizontal) and height (vertical)
pub const CENTER_TOLERANCE: f64 = 0.18;

/// Minimum face height as a fraction of overlay height
pub const MIN_FACE_RATIO: f64 = 0.18;

/// Countdown bounds and default, in seconds
pub const COUNTDOWN_MIN_SECS: u32 = 3;
pub const COUNTDOWN_MAX_SECS: u32 = 10;
pub const COUNTDOWN_DEFAULT_SECS: u32 = 5;

/// Detection loop period (roughly one pass per display refresh at 30 Hz)
pub const DETECTION_INTERVAL_MS: u64 = 33;

/// Request timeouts
pub const STYLIZE_TIMEOUT: Duration = Duration::from_secs(120);
pub const SHEET_TIMEOUT: Duration = Duration::from_secs(60);
pub const INFO_TIMEOUT: Duration = Duration::from_secs(8);
pub const LOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Base pitch of the countdown cue in Hz; each tick drops it by `CUE_STEP_HZ`
pub const CUE_BASE_HZ: u32 = 880;
pub const CUE_STEP_HZ: u32 = 40;
pub const CUE_DURATION_MS: u64 = 90;

/// File names for artifacts written to the output directory
pub const SHEET_FILE_NAME: &str = "sticker_sheet_a4.png";
pub const DOCUMENT_FILE_NAME: &str = "sticker_sheet_a4.pdf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid API base URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Per-install kiosk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskSettings {
    pub api_base: String,
    pub timer_seconds: u32,
    pub countdown_sound: bool,
    pub trigger_mode: TriggerMode,
    pub auto_face: bool,
    /// GStreamer device path (e.g. `/dev/video0`); `None` picks the default camera
    pub camera_device: Option<String>,
    /// Requested capture resolution as `WIDTHxHEIGHT`; `None` or `"auto"` keeps native caps
    pub resolution: Option<String>,
    pub mirror_preview: bool,
    /// Size of the alignment overlay the face box is evaluated against
    pub overlay_width: u32,
    pub overlay_height: u32,
    pub output_dir: PathBuf,
    /// Program invoked with the sheet path as its last argument (e.g. `lp`)
    pub print_command: Option<String>,
    pub detector_model: Option<PathBuf>,
    pub layout: SheetOptions,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timer_seconds: COUNTDOWN_DEFAULT_SECS,
            countdown_sound: true,
            trigger_mode: TriggerMode::Auto,
            auto_face: true,
            camera_device: None,
            resolution: None,
            mirror_preview: true,
            overlay_width: 1280,
            overlay_height: 720,
            output_dir: PathBuf::from("output"),
            print_command: Some("lp".to_string()),
            detector_model: None,
            layout: SheetOptions::default(),
        }
    }
}

impl KioskSettings {
    /// Load settings from `TOONBOOTH_SETTINGS` (or `settings.json`), then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(SETTINGS_ENV).unwrap_or_else(|_| "settings.json".to_string());
        let mut settings = Self::from_path(Path::new(&path))?;

        if let Ok(base) = std::env::var(API_BASE_ENV) {
            settings.api_base = base;
        }
        settings.api_base_url()?;
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("Loading settings from {}", path.display());
                Ok(serde_json::from_str(&text)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Countdown length clamped to the allowed range
    pub fn countdown_seconds(&self) -> u32 {
        clamp_countdown(self.timer_seconds)
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.api_base)?)
    }

    /// Parsed `WIDTHxHEIGHT` resolution, if one was requested
    pub fn capture_resolution(&self) -> Option<(u32, u32)> {
        let res = self.resolution.as_deref()?;
        if res == "auto" {
            return None;
        }
        let (w, h) = res.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

/// Clamp a countdown request to [`COUNTDOWN_MIN_SECS`, `COUNTDOWN_MAX_SECS`];
/// zero is treated as "unset" and maps to the default.
pub fn clamp_countdown(secs: u32) -> u32 {
    if secs == 0 {
        return COUNTDOWN_DEFAULT_SECS;
    }
    secs.clamp(COUNTDOWN_MIN_SECS, COUNTDOWN_MAX_SECS)
}

/// Cue pitch for a countdown tick with `remaining` seconds left
pub fn cue_frequency(total: u32, remaining: u32) -> u32 {
    CUE_BASE_HZ.saturating_sub(total.saturating_sub(remaining) * CUE_STEP_HZ)
}

/// Build an endpoint URL under the API base
pub fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    base.join(path)
}

pub fn cartoonize_url(base: &Url) -> Result<Url, url::ParseError> {
    endpoint(base, "/api/cartoonize")
}

pub fn print_sheet_url(base: &Url) -> Result<Url, url::ParseError> {
    endpoint(base, "/api/print-sheet")
}

pub fn print_sheet_pdf_url(base: &Url) -> Result<Url, url::ParseError> {
    endpoint(base, "/api/print-sheet-pdf")
}

pub fn info_url(base: &Url) -> Result<Url, url::ParseError> {
    endpoint(base, "/api/info")
}

pub fn log_url(base: &Url) -> Result<Url, url::ParseError> {
    endpoint(base, "/api/log")
}
