use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDateTime;

use crate::capture::BURST_TIMESTAMP_FORMAT;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the default data directory: `<local data dir>/segment-monitor/`
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| get_exe_dir().clone())
        .join("segment-monitor")
}

/// Directory layout under the configured data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
    database_file: String,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>, database_file: &str) -> Self {
        Self {
            root: root.into(),
            database_file: database_file.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<data_dir>/logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `<data_dir>/images/` - raw capture bursts
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// `<data_dir>/region_images/` - perspective-corrected crops
    pub fn region_images_dir(&self) -> PathBuf {
        self.root.join("region_images")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(&self.database_file)
    }

    /// `<data_dir>/images/PORT_<port>/<timestamp>/`
    pub fn burst_dir(&self, camera_port: &str, captured_at: NaiveDateTime) -> PathBuf {
        self.images_dir()
            .join(format!("PORT_{}", camera_port))
            .join(captured_at.format(BURST_TIMESTAMP_FORMAT).to_string())
    }

    /// `<data_dir>/region_images/<setting>_<timestamp>.png`
    pub fn region_image_path(&self, setting_id: &str, captured_at: NaiveDateTime) -> PathBuf {
        self.region_images_dir().join(format!(
            "{}_{}.png",
            setting_id,
            captured_at.format(BURST_TIMESTAMP_FORMAT)
        ))
    }

    /// Ensures all output directories exist. Call at startup.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.region_images_dir())?;
        Ok(())
    }
}
