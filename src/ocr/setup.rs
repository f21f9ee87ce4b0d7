use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::TesseractConfig;

/// Installation paths common on Linux distributions and Homebrew.
const COMMON_EXECUTABLE_PATHS: [&str; 3] = [
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` lets tesseract use its compiled-in data directory
    pub tessdata: Option<PathBuf>,
}

/// Resolves the tesseract installation and checks that the configured
/// language data is present.
pub fn ensure_tesseract(config: &TesseractConfig) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(config)?;
    let tessdata = find_tessdata_dir(config);

    match &tessdata {
        Some(dir) => {
            let traineddata = dir.join(format!("{}.traineddata", config.language));
            if !traineddata.exists() {
                return Err(anyhow!(
                    "{} not found. Install the tesseract language data or fix tesseract.tessdata_dir",
                    traineddata.display()
                ));
            }
            info!(
                "Tesseract at {} with tessdata {}",
                executable.display(),
                dir.display()
            );
        }
        None => info!("Tesseract at {} with its default tessdata", executable.display()),
    }

    Ok(TesseractPaths { executable, tessdata })
}

fn responds_to_version(exe: &Path) -> bool {
    Command::new(exe)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Finds the tesseract executable: configured path first, then PATH, then
/// the common install locations.
pub fn find_tesseract_executable(config: &TesseractConfig) -> Result<PathBuf> {
    if let Some(exe) = &config.executable {
        if exe.exists() {
            return Ok(exe.clone());
        }
        warn!(
            "Configured tesseract executable {} does not exist, searching PATH",
            exe.display()
        );
    }

    let on_path = PathBuf::from("tesseract");
    if responds_to_version(&on_path) {
        return Ok(on_path);
    }

    for path in &COMMON_EXECUTABLE_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!("Tesseract not found. Please install tesseract-ocr."))
}

/// Finds the tessdata directory: configured path, then `TESSDATA_PREFIX`.
pub fn find_tessdata_dir(config: &TesseractConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.tessdata_dir {
        return Some(dir.clone());
    }

    let prefix = PathBuf::from(std::env::var_os("TESSDATA_PREFIX")?);
    let traineddata = format!("{}.traineddata", config.language);
    [prefix.clone(), prefix.join("tessdata")]
        .into_iter()
        .find(|p| p.join(&traineddata).exists())
}
