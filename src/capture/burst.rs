use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use log::{info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::OnceLock;
use std::time::Duration;

use super::{Camera, BURST_TIMESTAMP_FORMAT};
use crate::config::CaptureConfig;
use crate::monitor::queue::BurstWorkItem;
use crate::monitor::state::StopSignal;
use crate::paths::DataPaths;

const FRAME_PATTERN: &str = r"^(\d+)\.(?:jpg|jpeg|png)$";
const PORT_DIR_PATTERN: &str = r"^PORT_(.+)$";

type PatternCell = OnceLock<Result<Regex, regex::Error>>;

static FRAME: PatternCell = OnceLock::new();
static PORT_DIR: PatternCell = OnceLock::new();

/// Compiles `pattern` into `cell` on first use.
fn compiled(cell: &'static PatternCell, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| anyhow!("invalid pattern {}: {}", pattern, e))
}

/// Takes one burst of frames into `burst_dir` as `0.jpg`, `1.jpg`, ...
///
/// Missed samples are logged and skipped. Returns the number of frames
/// actually written.
pub fn capture_burst(
    camera: &dyn Camera,
    burst_dir: &Path,
    config: &CaptureConfig,
    stop: &StopSignal,
) -> Result<usize> {
    std::fs::create_dir_all(burst_dir)
        .with_context(|| format!("Failed to create burst directory {}", burst_dir.display()))?;

    let interval = Duration::from_millis(config.sample_interval_ms);
    let mut captured = 0;
    for i in 0..config.samples_per_burst {
        let output = burst_dir.join(format!("{}.jpg", i));
        match camera.capture_frame(&output) {
            Ok(true) => captured += 1,
            Ok(false) => warn!("Camera {}: no frame for sample {}", camera.port(), i),
            Err(e) => warn!("Camera {}: sample {} failed: {:#}", camera.port(), i, e),
        }

        if i + 1 < config.samples_per_burst && stop.wait_timeout(interval) {
            break;
        }
    }
    Ok(captured)
}

/// Current local time truncated to whole seconds.
fn burst_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Capture loop of one camera.
///
/// Sends one work item per burst, including bursts in which every sample
/// was missed. Exits when `stop` is signalled or the pipeline side of the
/// queue is gone.
pub fn run_capture_loop(
    camera: &dyn Camera,
    paths: &DataPaths,
    config: &CaptureConfig,
    sender: Sender<BurstWorkItem>,
    stop: &StopSignal,
) {
    info!("Capture loop for camera {} started", camera.port());
    let pause = Duration::from_secs(config.burst_interval_sec);

    while !stop.is_stopped() {
        let captured_at = burst_timestamp();
        let burst_dir = paths.burst_dir(camera.port(), captured_at);

        match capture_burst(camera, &burst_dir, config, stop) {
            Ok(n) => {
                info!(
                    "Camera {}: burst {} captured {}/{} frames",
                    camera.port(),
                    captured_at.format(BURST_TIMESTAMP_FORMAT),
                    n,
                    config.samples_per_burst
                );
                let item = BurstWorkItem::new(camera.port(), burst_dir, captured_at);
                if sender.send(item).is_err() {
                    warn!("Camera {}: pipeline queue closed, stopping", camera.port());
                    break;
                }
            }
            Err(e) => warn!("Camera {}: burst failed: {:#}", camera.port(), e),
        }

        if stop.wait_timeout(pause) {
            break;
        }
    }
    info!("Capture loop for camera {} finished", camera.port());
}

/// Frames of a burst directory, ordered by sample index.
pub fn load_burst(burst_dir: &Path) -> Result<Vec<PathBuf>> {
    let frame = compiled(&FRAME, FRAME_PATTERN)?;
    let entries = std::fs::read_dir(burst_dir)
        .with_context(|| format!("Failed to read burst directory {}", burst_dir.display()))?;

    let mut frames: Vec<(u32, PathBuf)> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = frame
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        else {
            continue;
        };
        frames.push((index, path));
    }

    frames.sort_by_key(|(index, _)| *index);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

/// Camera port and capture time encoded in `.../PORT_<port>/<timestamp>`.
pub fn parse_burst_dir(burst_dir: &Path) -> Result<(String, NaiveDateTime)> {
    let name = burst_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no directory name", burst_dir.display()))?;
    let captured_at = NaiveDateTime::parse_from_str(name, BURST_TIMESTAMP_FORMAT)
        .with_context(|| format!("{} is not a burst timestamp", name))?;

    let port_dir = compiled(&PORT_DIR, PORT_DIR_PATTERN)?;
    let port = burst_dir
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|n| port_dir.captures(n))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow!("{} is not inside a PORT_<port> directory", burst_dir.display()))?;

    Ok((port, captured_at))
}
