//! Camera capture: burst acquisition into the image directory.
//!
//! This module provides:
//! - The camera collaborator (`Camera`, `CommandCamera`)
//! - Burst capture and the per-camera capture loop
//! - Burst directory parsing for replays

pub mod burst;
pub mod camera;

pub use burst::{load_burst, parse_burst_dir, run_capture_loop};
pub use camera::{Camera, CommandCamera};

/// Name format of burst directories and region images.
pub const BURST_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
