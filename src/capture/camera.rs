use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::CameraConfig;
use crate::process::output_with_timeout;

/// Source of single frames.
pub trait Camera: Send + Sync {
    /// Port identifier display settings refer to.
    fn port(&self) -> &str;

    /// Writes one frame to `output`.
    ///
    /// `Ok(false)` means no frame was available, which callers treat as a
    /// missed sample rather than an error.
    fn capture_frame(&self, output: &Path) -> Result<bool>;
}

/// Grabs frames by running an external command such as ffmpeg.
///
/// `{device}` and `{output}` in the command template are replaced per frame.
/// A run exceeding `timeout` is killed.
pub struct CommandCamera {
    port: String,
    device: String,
    template: Vec<String>,
    timeout: Duration,
}

impl CommandCamera {
    pub fn new(camera: &CameraConfig, template: &[String], timeout: Duration) -> Result<Self> {
        if template.is_empty() {
            bail!("capture command for camera {} is empty", camera.port);
        }
        Ok(Self {
            port: camera.port.clone(),
            device: camera.device.clone(),
            template: template.to_vec(),
            timeout,
        })
    }

    fn command(&self, output: &Path) -> Command {
        let output = output.to_string_lossy();
        let mut args = self
            .template
            .iter()
            .map(|a| a.replace("{device}", &self.device).replace("{output}", &output));

        // Template is non-empty (checked in `new`)
        let mut cmd = Command::new(args.next().unwrap_or_default());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Camera for CommandCamera {
    fn port(&self) -> &str {
        &self.port
    }

    fn capture_frame(&self, output: &Path) -> Result<bool> {
        let Some(result) = output_with_timeout(&mut self.command(output), self.timeout)
            .with_context(|| format!("Failed to run capture command for camera {}", self.port))?
        else {
            warn!(
                "Camera {}: capture command killed after {:?}",
                self.port, self.timeout
            );
            return Ok(false);
        };

        if !result.status.success() {
            debug!(
                "Camera {}: capture command exited with {}: {}",
                self.port,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
            return Ok(false);
        }
        Ok(output.is_file())
    }
}
