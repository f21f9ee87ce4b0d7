//! Geometric 7-segment recognizer.
//!
//! Samples the seven configured points of each digit on a binarized crop
//! and looks the resulting on/off string up in a fixed pattern table.

use image::GrayImage;

use super::merge::{select_proper, Glyph};
use super::preprocess::{segment_blur, Binarized};
use crate::settings::SegmentPoints;

/// Bit order: top, middle, bottom, upper-left, lower-left, upper-right, lower-right.
const SEGMENT_PATTERNS: [(&str, Glyph); 13] = [
    ("0000000", Glyph::Blank),
    ("1011111", Glyph::Digit(0)),
    ("0000011", Glyph::Digit(1)),
    ("1110110", Glyph::Digit(2)),
    ("1110011", Glyph::Digit(3)),
    ("0101011", Glyph::Digit(4)),
    ("1111001", Glyph::Digit(5)),
    ("1111101", Glyph::Digit(6)),
    ("1000011", Glyph::Digit(7)),
    ("1111111", Glyph::Digit(8)),
    ("1101011", Glyph::Digit(9)),
    ("1111011", Glyph::Digit(9)),
    ("0100000", Glyph::Minus),
];

pub fn glyph_for_pattern(bits: &str) -> Glyph {
    SEGMENT_PATTERNS
        .iter()
        .find(|(pattern, _)| *pattern == bits)
        .map(|(_, glyph)| *glyph)
        .unwrap_or(Glyph::Unreadable)
}

/// Encodes the seven sample points as '1' (lit) / '0'.
/// A point outside the image reads as unlit.
pub fn sample_segments(bin: &GrayImage, points: &SegmentPoints) -> String {
    points
        .iter()
        .map(|p| match bin.get_pixel_checked(p.x, p.y) {
            Some(px) if px[0] > 0 => '1',
            _ => '0',
        })
        .collect()
}

/// Segment recognizer for one display; holds the per-digit sample points.
pub struct SegmentRecognizer<'a> {
    points: &'a [SegmentPoints],
}

impl<'a> SegmentRecognizer<'a> {
    pub fn new(points: &'a [SegmentPoints]) -> Self {
        Self { points }
    }

    /// Reads digit `index` from its crop of the normalized gray image.
    pub fn recognize_digit(&self, index: usize, crop: &GrayImage) -> Glyph {
        let Some(points) = self.points.get(index) else {
            return Glyph::Unreadable;
        };
        let bin = Binarized::of(&segment_blur(crop));
        let adaptive = glyph_for_pattern(&sample_segments(&bin.adaptive, points));
        let otsu = glyph_for_pattern(&sample_segments(&bin.otsu, points));
        select_proper(adaptive, otsu)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::Pixel;
    use image::Luma;

    /// Points of a 30x50 digit cell (see `settings::tests::sample_setting`).
    pub(crate) fn cell_points() -> SegmentPoints {
        [
            Pixel::new(15, 3),
            Pixel::new(15, 25),
            Pixel::new(15, 46),
            Pixel::new(3, 12),
            Pixel::new(3, 37),
            Pixel::new(26, 12),
            Pixel::new(26, 37),
        ]
    }

    /// Draws a 30x50 digit cell with the segments lit per `bits`.
    pub(crate) fn draw_cell(bits: &str) -> GrayImage {
        let lit: Vec<bool> = bits.chars().map(|c| c == '1').collect();
        GrayImage::from_fn(30, 50, |x, y| {
            let on = (lit[0] && y < 7 && (4..26).contains(&x))
                || (lit[1] && (22..29).contains(&y) && (4..26).contains(&x))
                || (lit[2] && y >= 43 && (4..26).contains(&x))
                || (lit[3] && x < 7 && (4..24).contains(&y))
                || (lit[4] && x < 7 && (27..46).contains(&y))
                || (lit[5] && x >= 23 && (4..24).contains(&y))
                || (lit[6] && x >= 23 && (27..46).contains(&y));
            if on {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_every_pattern_maps_to_its_glyph() {
        for (bits, glyph) in SEGMENT_PATTERNS {
            assert_eq!(glyph_for_pattern(bits), glyph, "{}", bits);
        }
        assert_eq!(glyph_for_pattern("1111011"), Glyph::Digit(9));
        assert_eq!(glyph_for_pattern("0100000"), Glyph::Minus);
    }

    #[test]
    fn test_unknown_patterns_are_unreadable() {
        let known: Vec<&str> = SEGMENT_PATTERNS.iter().map(|(p, _)| *p).collect();
        let mut unknown = 0;
        for n in 0u32..128 {
            let bits = format!("{:07b}", n);
            if !known.contains(&bits.as_str()) {
                assert_eq!(glyph_for_pattern(&bits), Glyph::Unreadable, "{}", bits);
                unknown += 1;
            }
        }
        assert_eq!(unknown, 128 - 13);
        // Looks like a 7 with an extra upper-left bar
        assert_eq!(glyph_for_pattern("1001011"), Glyph::Unreadable);
    }

    #[test]
    fn test_sample_segments_out_of_bounds_is_unlit() {
        let bin = GrayImage::from_pixel(30, 50, Luma([255]));
        assert_eq!(sample_segments(&bin, &cell_points()), "1111111");

        let mut points = cell_points();
        points[6] = Pixel::new(40, 40);
        assert_eq!(sample_segments(&bin, &points), "1111110");
    }

    #[test]
    fn test_recognize_drawn_digits() {
        let points = [cell_points()];
        let recognizer = SegmentRecognizer::new(&points);
        for (bits, expected) in [
            ("1110011", Glyph::Digit(3)),
            ("0000011", Glyph::Digit(1)),
            ("1111101", Glyph::Digit(6)),
            ("0100000", Glyph::Minus),
        ] {
            let crop = draw_cell(bits);
            assert_eq!(recognizer.recognize_digit(0, &crop), expected, "{}", bits);
        }
    }

    #[test]
    fn test_missing_points_are_unreadable() {
        let recognizer = SegmentRecognizer::new(&[]);
        assert_eq!(recognizer.recognize_digit(0, &draw_cell("1111111")), Glyph::Unreadable);
    }
}
