//! Derives sampling geometry from operator-picked digit corners.
//!
//! The operator clicks the four corners of each digit on the corrected
//! image; the seven segment sampling points and the decimal exponents are
//! computed from those clicks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::{DecimalCandidate, DigitRegion, DisplaySetting, Pixel, SegmentPoints};

/// Four corners of one digit in corrected-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DigitCorners {
    pub upper_left: Pixel,
    pub upper_right: Pixel,
    pub lower_right: Pixel,
    pub lower_left: Pixel,
}

fn midpoint(a: (i64, i64), b: (i64, i64)) -> (i64, i64) {
    ((a.0 + b.0) / 2, (a.1 + b.1) / 2)
}

/// Point at `num/4` of the way from `from` to `to`.
fn quarter(from: (i64, i64), to: (i64, i64), num: i64) -> (i64, i64) {
    (
        from.0 + num * (to.0 - from.0) / 4,
        from.1 + num * (to.1 - from.1) / 4,
    )
}

fn to_pixel(p: (i64, i64)) -> Pixel {
    Pixel::new(p.0.max(0) as u32, p.1.max(0) as u32)
}

/// Absolute sampling points of one digit, in segment order
/// (top, middle, bottom, upper-left, lower-left, upper-right, lower-right).
pub fn segment_points_from_corners(c: &DigitCorners) -> SegmentPoints {
    let ul = (c.upper_left.x as i64, c.upper_left.y as i64);
    let ur = (c.upper_right.x as i64, c.upper_right.y as i64);
    let lr = (c.lower_right.x as i64, c.lower_right.y as i64);
    let ll = (c.lower_left.x as i64, c.lower_left.y as i64);

    let top = midpoint(ul, ur);
    let bottom = midpoint(ll, lr);
    let middle = midpoint(top, bottom);

    [
        to_pixel(top),
        to_pixel(middle),
        to_pixel(bottom),
        to_pixel(quarter(ll, ul, 3)),
        to_pixel(quarter(ll, ul, 1)),
        to_pixel(quarter(lr, ur, 3)),
        to_pixel(quarter(lr, ur, 1)),
    ]
}

/// Sampling points for every digit, sorted left to right by the top point.
pub fn recognition_points(digits: &[DigitCorners]) -> Vec<SegmentPoints> {
    let mut points: Vec<SegmentPoints> = digits.iter().map(segment_points_from_corners).collect();
    points.sort_by_key(|p| p[0].x);
    points
}

/// Shifts absolute sampling points into region-local coordinates.
pub fn relative_to_region(points: &SegmentPoints, region: &DigitRegion) -> SegmentPoints {
    points.map(|p| {
        Pixel::new(
            p.x.saturating_sub(region.left),
            p.y.saturating_sub(region.top),
        )
    })
}

/// Exponent implied by a decimal point at `decimal_x`.
///
/// A point left of digit `i`'s middle sample leaves `digits - i` digits to
/// its right; a point right of every digit means no fractional part.
pub fn decimal_exponent(decimal_x: u32, sorted_points: &[SegmentPoints]) -> u32 {
    sorted_points
        .iter()
        .position(|p| decimal_x < p[1].x)
        .map(|i| (sorted_points.len() - i) as u32)
        .unwrap_or(0)
}

/// Builds decimal candidates from clicked positions.
pub fn decimal_candidates(clicked: &[Pixel], sorted_points: &[SegmentPoints]) -> Vec<DecimalCandidate> {
    clicked
        .iter()
        .map(|p| DecimalCandidate {
            x: p.x,
            y: p.y,
            exponent: decimal_exponent(p.x, sorted_points),
        })
        .collect()
}

/// Operator clicks for one display, as found in a settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayCalibration {
    pub setting_id: String,
    /// One entry per digit, in any order
    pub digit_corners: Vec<DigitCorners>,
    #[serde(default)]
    pub decimal_clicks: Vec<Pixel>,
}

impl DisplayCalibration {
    /// Replaces the segment points and decimal candidates of `setting`.
    pub fn apply(&self, setting: &mut DisplaySetting) -> Result<()> {
        if self.digit_corners.len() != setting.digit_regions.len() {
            bail!(
                "calibration of {}: {} digits clicked but {} digit regions configured",
                setting.id,
                self.digit_corners.len(),
                setting.digit_regions.len()
            );
        }

        let absolute = recognition_points(&self.digit_corners);
        setting.segment_points = absolute
            .iter()
            .zip(&setting.digit_regions)
            .map(|(points, region)| relative_to_region(points, region))
            .collect();
        setting.decimal_points = decimal_candidates(&self.decimal_clicks, &absolute);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners(left: u32, top: u32, w: u32, h: u32) -> DigitCorners {
        DigitCorners {
            upper_left: Pixel::new(left, top),
            upper_right: Pixel::new(left + w, top),
            lower_right: Pixel::new(left + w, top + h),
            lower_left: Pixel::new(left, top + h),
        }
    }

    #[test]
    fn test_points_of_upright_digit() {
        let points = segment_points_from_corners(&corners(10, 20, 20, 40));

        assert_eq!(points[0], Pixel::new(20, 20)); // top
        assert_eq!(points[1], Pixel::new(20, 40)); // middle
        assert_eq!(points[2], Pixel::new(20, 60)); // bottom
        assert_eq!(points[3], Pixel::new(10, 30)); // upper-left
        assert_eq!(points[4], Pixel::new(10, 50)); // lower-left
        assert_eq!(points[5], Pixel::new(30, 30)); // upper-right
        assert_eq!(points[6], Pixel::new(30, 50)); // lower-right
    }

    #[test]
    fn test_slanted_digit_truncates_toward_zero() {
        // Italic digit: top edge shifted 6 px to the right
        let c = DigitCorners {
            upper_left: Pixel::new(16, 0),
            upper_right: Pixel::new(36, 0),
            lower_right: Pixel::new(30, 40),
            lower_left: Pixel::new(10, 40),
        };
        let points = segment_points_from_corners(&c);
        // 10 + 3 * 6 / 4 = 14 (18/4 truncated)
        assert_eq!(points[3], Pixel::new(14, 10));
        assert_eq!(points[4], Pixel::new(11, 30));
    }

    #[test]
    fn test_recognition_points_sorted() {
        let digits = [corners(60, 0, 20, 40), corners(0, 0, 20, 40), corners(30, 0, 20, 40)];
        let points = recognition_points(&digits);
        let xs: Vec<u32> = points.iter().map(|p| p[0].x).collect();
        assert_eq!(xs, vec![10, 40, 70]);
    }

    #[test]
    fn test_relative_to_region() {
        let points = segment_points_from_corners(&corners(10, 20, 20, 40));
        let region = DigitRegion { left: 8, top: 18, right: 34, bottom: 64 };
        let local = relative_to_region(&points, &region);
        assert_eq!(local[0], Pixel::new(12, 2));
        assert_eq!(local[6], Pixel::new(22, 32));
    }

    #[test]
    fn test_decimal_exponent_from_position() {
        let points = recognition_points(&[
            corners(0, 0, 20, 40),
            corners(30, 0, 20, 40),
            corners(60, 0, 20, 40),
        ]);
        // Middle x values are 10, 40, 70
        assert_eq!(decimal_exponent(25, &points), 2);
        assert_eq!(decimal_exponent(55, &points), 1);
        assert_eq!(decimal_exponent(85, &points), 0);

        let candidates = decimal_candidates(&[Pixel::new(25, 41), Pixel::new(55, 41)], &points);
        assert_eq!(candidates[0].exponent, 2);
        assert_eq!(candidates[1].exponent, 1);
    }

    #[test]
    fn test_calibration_fills_display_setting() {
        let mut setting = crate::settings::tests::sample_setting();
        setting.segment_points.clear();
        setting.decimal_points.clear();

        let calibration = DisplayCalibration {
            setting_id: setting.id.clone(),
            digit_corners: vec![corners(69, 5, 29, 46), corners(5, 5, 29, 46), corners(37, 5, 29, 46)],
            decimal_clicks: vec![Pixel::new(68, 54)],
        };
        calibration.apply(&mut setting).unwrap();

        assert_eq!(setting.segment_points.len(), 3);
        for points in &setting.segment_points {
            assert_eq!(points[0], Pixel::new(14, 0));
            assert_eq!(points[2], Pixel::new(14, 46));
            assert_eq!(points[3], Pixel::new(0, 12));
        }
        // Middle points at x = 19, 51, 83
        assert_eq!(setting.decimal_points[0].exponent, 1);
        setting.validate().unwrap();
    }

    #[test]
    fn test_calibration_digit_count_must_match() {
        let mut setting = crate::settings::tests::sample_setting();
        let calibration = DisplayCalibration {
            setting_id: setting.id.clone(),
            digit_corners: vec![corners(5, 5, 30, 46)],
            decimal_clicks: Vec::new(),
        };
        assert!(calibration.apply(&mut setting).is_err());
    }
}
