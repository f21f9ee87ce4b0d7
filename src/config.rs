//! Process configuration.
//!
//! Loads settings from config.json at startup. Provides the data directory,
//! tesseract options, capture timing, camera list, alert dead-band,
//! retention limits and the downstream feed/mail endpoints.
//!
//! Per-display recognition settings are NOT part of this file; they live in
//! the configuration store and are re-read every cycle.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::{default_data_dir, get_exe_dir, DataPaths};

/// Options passed to the tesseract executable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Explicit path to the tesseract executable (PATH lookup when absent)
    pub executable: Option<PathBuf>,
    /// Explicit tessdata directory (tesseract's own default when absent)
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    /// Page segmentation mode; 10 = single character
    pub psm: u32,
    /// OCR engine mode; 1 = LSTM only
    pub oem: u32,
    pub char_whitelist: String,
    pub dpi: u32,
    /// A tesseract run taking longer is killed and counts as an engine error
    pub timeout_ms: u64,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            psm: 10,
            oem: 1,
            char_whitelist: "-0123456789".to_string(),
            dpi: 300,
            timeout_ms: 15_000,
        }
    }
}

/// Burst capture timing and the external grabber command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Number of frames taken per burst
    pub samples_per_burst: u32,
    /// Delay between frames inside one burst (milliseconds)
    pub sample_interval_ms: u64,
    /// Delay between the end of one burst and the start of the next (seconds)
    pub burst_interval_sec: u64,
    /// Grabber command; `{device}` and `{output}` are substituted per frame
    pub command: Vec<String>,
    /// A grabber run taking longer is killed and the sample is missed
    pub frame_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            samples_per_burst: 10,
            sample_interval_ms: 1000,
            burst_interval_sec: 60,
            command: [
                "ffmpeg", "-loglevel", "error", "-f", "v4l2", "-i", "{device}", "-frames:v", "1",
                "-y", "{output}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            frame_timeout_ms: 10_000,
        }
    }
}

/// One physical camera.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Port identifier display settings refer to
    pub port: String,
    /// Human readable name used in alert mails
    pub name: String,
    /// Device passed to the grabber command, e.g. /dev/video0
    pub device: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Oldest records are removed while disk usage is above this percentage
    pub max_disk_usage_percent: f64,
    pub sweep_interval_sec: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_disk_usage_percent: 90.0,
            sweep_interval_sec: 5,
        }
    }
}

/// HTTP endpoint receiving live-feed messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// HTTP mail relay used for alert mails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MailConfig {
    pub relay_endpoint: String,
    pub sender: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_subject() -> String {
    "Segment monitor alert".to_string()
}

fn default_database_file() -> String {
    "monitor.sqlite3".to_string()
}

fn default_dead_band_sec() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

/// Complete process configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for logs, images, region images and the database
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub tesseract: TesseractConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    /// Minimum continuous dwell in a tier before it becomes stable (seconds)
    #[serde(default = "default_dead_band_sec")]
    pub alert_dead_band_sec: f64,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub feed: Option<FeedConfig>,
    #[serde(default)]
    pub mail: Option<MailConfig>,
    /// Save the perspective-corrected crop of the winning sample
    #[serde(default = "default_true")]
    pub save_region_images: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: default_database_file(),
            tesseract: TesseractConfig::default(),
            capture: CaptureConfig::default(),
            cameras: Vec::new(),
            alert_dead_band_sec: default_dead_band_sec(),
            retention: RetentionConfig::default(),
            feed: None,
            mail: None,
            save_region_images: true,
        }
    }
}

impl AppConfig {
    pub fn data_paths(&self) -> DataPaths {
        let root = self.data_dir.clone().unwrap_or_else(default_data_dir);
        DataPaths::new(root, &self.database_file)
    }

    pub fn camera(&self, port: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.port == port)
    }
}

/// Default config location: config.json next to the executable.
pub fn default_config_path() -> PathBuf {
    get_exe_dir().join("config.json")
}

/// Configuration plus the reason it fell back to defaults, if it did.
///
/// Loading happens before the logger exists (the log directory is part of
/// the config), so the caller logs `warning` once logging is up.
pub struct LoadedConfig {
    pub config: AppConfig,
    pub warning: Option<String>,
}

impl LoadedConfig {
    fn defaults(warning: Option<String>) -> Self {
        Self {
            config: AppConfig::default(),
            warning,
        }
    }
}

/// Loads configuration from `path` or returns defaults.
///
/// A missing file silently gives defaults; an unreadable or unparsable one
/// gives defaults plus a warning.
pub fn load_config(path: &Path) -> LoadedConfig {
    if !path.exists() {
        return LoadedConfig::defaults(None);
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => LoadedConfig {
                config,
                warning: None,
            },
            Err(e) => LoadedConfig::defaults(Some(format!(
                "Failed to parse {}: {}. Using defaults.",
                path.display(),
                e
            ))),
        },
        Err(e) => LoadedConfig::defaults(Some(format!(
            "Failed to read {}: {}. Using defaults.",
            path.display(),
            e
        ))),
    }
}
