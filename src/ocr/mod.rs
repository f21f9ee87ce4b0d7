pub mod decimal;
pub mod engine;
pub mod merge;
pub mod perspective;
pub mod preprocess;
pub mod segments;
pub mod setup;

pub use engine::{CharacterEngine, TesseractEngine};
pub use perspective::TransformError;

use anyhow::{Context, Result};
use image::RgbImage;
use log::debug;
use serde::{Serialize, Serializer};

use crate::settings::DisplaySetting;
use engine::CharacterRecognizer;
use merge::{merge_engines, to_reading, Glyph};
use preprocess::{crop_region, normalize_display, Binarized};
use segments::SegmentRecognizer;

/// A numeric display reading, or the unreadable sentinel.
///
/// `Value` always holds a finite number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    Value(f64),
    Unreadable,
}

impl Reading {
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            Self::Value(v)
        } else {
            Self::Unreadable
        }
    }

    /// Parses the stored string form; anything non-numeric is unreadable.
    pub fn parse(s: &str) -> Self {
        s.trim()
            .parse::<f64>()
            .map(Self::from_f64)
            .unwrap_or(Self::Unreadable)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Unreadable => None,
        }
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable)
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Unreadable => write!(f, "NaN"),
        }
    }
}

/// Numbers serialize as JSON numbers, the sentinel as the string "NaN".
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_f64(*v),
            Self::Unreadable => serializer.serialize_str("NaN"),
        }
    }
}

/// Reads one configured display from raw frames.
///
/// The segment recognizer exists only when the display enables segment
/// detection; otherwise the character engine alone decides each digit.
pub struct DisplayReader<'a> {
    setting: &'a DisplaySetting,
    character: CharacterRecognizer<'a>,
    segments: Option<SegmentRecognizer<'a>>,
}

impl<'a> DisplayReader<'a> {
    pub fn new(setting: &'a DisplaySetting, engine: &'a dyn CharacterEngine) -> Self {
        let segments = setting
            .segment_detection
            .then(|| SegmentRecognizer::new(&setting.segment_points));
        Self {
            setting,
            character: CharacterRecognizer::new(engine),
            segments,
        }
    }

    /// Perspective-corrected crop of the display.
    pub fn correct(&self, frame: &RgbImage) -> Result<RgbImage> {
        perspective::warp_perspective(frame, &self.setting.corners)
            .with_context(|| format!("display {}", self.setting.id))
    }

    fn read_digit(&self, index: usize, crop: &image::GrayImage) -> Glyph {
        let character = self.character.recognize_digit(crop);
        match &self.segments {
            Some(segments) => merge_engines(character, segments.recognize_digit(index, crop)),
            None => character,
        }
    }

    /// Reads the number shown on an already corrected crop.
    ///
    /// Errors only on configuration problems (a digit region outside the
    /// crop); recognition failures produce [`Reading::Unreadable`].
    pub fn read_corrected(&self, corrected: &RgbImage) -> Result<Reading> {
        let gray = normalize_display(corrected, self.setting);

        let mut glyphs = Vec::with_capacity(self.setting.digit_regions.len());
        for (i, region) in self.setting.digit_regions.iter().enumerate() {
            let crop = crop_region(&gray, region)
                .with_context(|| format!("display {} digit {}", self.setting.id, i))?;
            glyphs.push(self.read_digit(i, &crop));
        }

        let exponent = decimal::locate_decimal(&Binarized::of(&gray), &self.setting.decimal_points);
        let reading = to_reading(&glyphs, exponent);
        debug!(
            "display {}: glyphs {:?}, exponent {:?} -> {}",
            self.setting.id, glyphs, exponent, reading
        );
        Ok(reading)
    }

    /// Corrects and reads a raw frame. Returns the corrected crop as well.
    pub fn read_frame(&self, frame: &RgbImage) -> Result<(Reading, RgbImage)> {
        let corrected = self.correct(frame)?;
        let reading = self.read_corrected(&corrected)?;
        Ok((reading, corrected))
    }
}
