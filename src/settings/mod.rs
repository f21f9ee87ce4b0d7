//! Per-display recognition and threshold settings.
//!
//! These records are owned by the configuration store. The recognition
//! pipeline only reads them, once per cycle.

pub mod calibration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A point in raw-frame coordinates (sub-pixel allowed).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub x: f64,
    pub y: f64,
}

/// A pixel position in a perspective-corrected image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

impl Pixel {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Reference intensity triple of a segment state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn channel_sum(&self) -> u32 {
        self.r as u32 + self.g as u32 + self.b as u32
    }

    pub fn inverted(&self) -> Self {
        Self::new(255 - self.r, 255 - self.g, 255 - self.b)
    }
}

/// Bounding rectangle of one digit, in corrected-image pixels.
/// `right` and `bottom` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl DigitRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// A pixel that lights up when the decimal point sits at `exponent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalCandidate {
    pub x: u32,
    pub y: u32,
    /// Number of fractional digits when this point is lit
    pub exponent: u32,
}

/// Seven sampling points of one digit, relative to its region origin.
///
/// Order: top, middle, bottom, upper-left, lower-left, upper-right, lower-right.
pub type SegmentPoints = [Pixel; 7];

/// Configuration of one physical 7-segment display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySetting {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Port of the camera that films this display
    pub camera_port: String,
    /// Perspective quadrilateral: top-left, top-right, bottom-right, bottom-left
    pub corners: [Corner; 4],
    pub on_color: Color,
    pub off_color: Color,
    /// Digit rectangles ordered left to right
    pub digit_regions: Vec<DigitRegion>,
    /// One entry per digit region; required when `segment_detection` is set
    #[serde(default)]
    pub segment_points: Vec<SegmentPoints>,
    #[serde(default)]
    pub decimal_points: Vec<DecimalCandidate>,
    /// Enable the geometric segment-state recognizer
    #[serde(default)]
    pub segment_detection: bool,
    /// Subtract the background reference color before normalizing
    #[serde(default = "default_true")]
    pub subtract_off_color: bool,
    #[serde(default)]
    pub disabled: bool,
}

fn default_true() -> bool {
    true
}

impl DisplaySetting {
    /// Checks per-digit cardinalities and that every sampling point lies
    /// inside its digit region.
    pub fn validate(&self) -> Result<()> {
        if self.digit_regions.is_empty() {
            bail!("display {} has no digit regions", self.id);
        }

        for (i, region) in self.digit_regions.iter().enumerate() {
            if region.width() == 0 || region.height() == 0 {
                bail!("display {}: digit region {} is empty: {:?}", self.id, i, region);
            }
        }

        if self.segment_detection {
            if self.segment_points.len() != self.digit_regions.len() {
                bail!(
                    "display {}: {} digit regions but {} segment point sets",
                    self.id,
                    self.digit_regions.len(),
                    self.segment_points.len()
                );
            }
            for (i, (points, region)) in self
                .segment_points
                .iter()
                .zip(&self.digit_regions)
                .enumerate()
            {
                if let Some(p) = points
                    .iter()
                    .find(|p| p.x >= region.width() || p.y >= region.height())
                {
                    bail!(
                        "display {}: segment point ({}, {}) of digit {} lies outside its {}x{} region",
                        self.id,
                        p.x,
                        p.y,
                        i,
                        region.width(),
                        region.height()
                    );
                }
            }
        }

        let digits = self.digit_regions.len() as u32;
        if let Some(c) = self.decimal_points.iter().find(|c| c.exponent > digits) {
            bail!(
                "display {}: decimal exponent {} exceeds digit count {}",
                self.id,
                c.exponent,
                digits
            );
        }

        Ok(())
    }

    /// True when the display shows lit segments darker than unlit ones.
    pub fn is_dark_on_bright(&self) -> bool {
        self.off_color.channel_sum() > self.on_color.channel_sum()
    }
}

/// Alert bounds of one display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSetting {
    pub setting_id: String,
    pub is_alert: bool,
    pub abnormal_low_th: f64,
    pub alert_low_th: f64,
    pub alert_high_th: f64,
    pub abnormal_high_th: f64,
}

impl ThresholdSetting {
    pub fn with_defaults(setting_id: &str) -> Self {
        Self {
            setting_id: setting_id.to_string(),
            is_alert: true,
            abnormal_low_th: -100.0,
            alert_low_th: -50.0,
            alert_high_th: 50.0,
            abnormal_high_th: 100.0,
        }
    }

    /// Requires the alert band to be nested inside the abnormal band.
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            self.abnormal_low_th,
            self.alert_low_th,
            self.alert_high_th,
            self.abnormal_high_th,
        ];
        if bounds.iter().any(|b| !b.is_finite()) {
            bail!("thresholds of {} must be finite: {:?}", self.setting_id, bounds);
        }
        if !bounds.windows(2).all(|w| w[0] <= w[1]) {
            bail!(
                "thresholds of {} must satisfy abnormal_low <= alert_low <= alert_high <= abnormal_high, got {:?}",
                self.setting_id,
                bounds
            );
        }
        Ok(())
    }
}
