//! Planar perspective correction of a raw frame into the display crop.
//!
//! The four configured corners are mapped onto an axis-aligned rectangle
//! whose width and height are the longer of each pair of opposing edges.

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::settings::Corner;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Three or more corners are collinear, or an output side is empty.
    Degenerate(String),
    /// The homography system has no unique solution.
    Singular,
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Degenerate(msg) => write!(f, "degenerate perspective quadrilateral: {}", msg),
            Self::Singular => write!(f, "perspective transform matrix is singular"),
        }
    }
}

impl std::error::Error for TransformError {}

// ── Geometry ─────────────────────────────────────────────────────────────

fn distance(a: &Corner, b: &Corner) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Output size of the corrected crop: the longer of the top/bottom edges and
/// the longer of the left/right edges, rounded down.
pub fn output_size(corners: &[Corner; 4]) -> (u32, u32) {
    let [tl, tr, br, bl] = corners;
    let width = distance(tl, tr).max(distance(bl, br));
    let height = distance(tr, br).max(distance(tl, bl));
    (width.floor() as u32, height.floor() as u32)
}

/// Twice the signed area of triangle abc.
fn cross(a: &Corner, b: &Corner, c: &Corner) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn check_not_collinear(corners: &[Corner; 4]) -> Result<(), TransformError> {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [1, 2, 3], [2, 3, 0], [3, 0, 1]];
    for [a, b, c] in TRIPLES {
        if cross(&corners[a], &corners[b], &corners[c]).abs() < 1e-6 {
            return Err(TransformError::Degenerate(format!(
                "corners {}, {} and {} are collinear",
                a, b, c
            )));
        }
    }
    Ok(())
}

/// Solves the 8-unknown system for the homography mapping `src[i]` onto `dst[i]`.
pub fn perspective_matrix(
    src: &[[f64; 2]; 4],
    dst: &[[f64; 2]; 4],
) -> Result<Matrix3<f64>, TransformError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let [x, y] = src[i];
        let [u, v] = dst[i];

        // u = (h0 x + h1 y + h2) / (h6 x + h7 y + 1)
        a[(2 * i, 0)] = x;
        a[(2 * i, 1)] = y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -x * u;
        a[(2 * i, 7)] = -y * u;
        b[2 * i] = u;

        // v = (h3 x + h4 y + h5) / (h6 x + h7 y + 1)
        a[(2 * i + 1, 3)] = x;
        a[(2 * i + 1, 4)] = y;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -x * v;
        a[(2 * i + 1, 7)] = -y * v;
        b[2 * i + 1] = v;
    }

    let h = a.lu().solve(&b).ok_or(TransformError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::Singular);
    }

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Project a 2D point through a 3×3 homography.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some([p[0] / p[2], p[1] / p[2]])
}

/// Bilinear sample with a black border outside the image.
fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |xi: f64, yi: f64| -> [f64; 3] {
        if xi < 0.0 || yi < 0.0 || xi >= w as f64 || yi >= h as f64 {
            return [0.0; 3];
        }
        let p = img.get_pixel(xi as u32, yi as u32);
        [p[0] as f64, p[1] as f64, p[2] as f64]
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1.0, y0);
    let p01 = fetch(x0, y0 + 1.0);
    let p11 = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Resamples the quadrilateral `corners` of `img` into an axis-aligned crop.
pub fn warp_perspective(img: &RgbImage, corners: &[Corner; 4]) -> Result<RgbImage, TransformError> {
    check_not_collinear(corners)?;

    let (width, height) = output_size(corners);
    if width == 0 || height == 0 {
        return Err(TransformError::Degenerate(format!(
            "output size {}x{}",
            width, height
        )));
    }

    let src = corners.map(|c| [c.x, c.y]);
    let (w, h) = (width as f64, height as f64);
    let dst = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]];

    let forward = perspective_matrix(&src, &dst)?;
    let inverse = forward.try_inverse().ok_or(TransformError::Singular)?;

    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if let Some([sx, sy]) = project(&inverse, x as f64, y as f64) {
            *pixel = sample_bilinear(img, sx, sy);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Corner {
        Corner { x, y }
    }

    #[test]
    fn test_output_size_takes_longer_edges() {
        let corners = [c(0.0, 0.0), c(100.0, 10.0), c(95.0, 90.0), c(5.0, 80.0)];
        // Top edge ~100.5, bottom ~90.6; both sides ~80.2
        assert_eq!(output_size(&corners), (100, 80));
    }

    #[test]
    fn test_matrix_maps_corners() {
        let src = [[3.0, 4.0], [103.0, 12.0], [96.0, 88.0], [1.0, 79.0]];
        let dst = [[0.0, 0.0], [100.0, 0.0], [100.0, 80.0], [0.0, 80.0]];
        let h = perspective_matrix(&src, &dst).unwrap();

        for (s, d) in src.iter().zip(&dst) {
            let p = project(&h, s[0], s[1]).unwrap();
            assert!((p[0] - d[0]).abs() < 1e-6, "{:?} -> {:?}", s, p);
            assert!((p[1] - d[1]).abs() < 1e-6, "{:?} -> {:?}", s, p);
        }
    }

    #[test]
    fn test_axis_aligned_warp_is_a_crop() {
        let img = RgbImage::from_fn(200, 100, |x, y| Rgb([x as u8, y as u8, 7]));
        let corners = [c(10.0, 20.0), c(110.0, 20.0), c(110.0, 80.0), c(10.0, 80.0)];

        let out = warp_perspective(&img, &corners).unwrap();
        assert_eq!(out.dimensions(), (100, 60));
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 20, 7]));
        assert_eq!(out.get_pixel(57, 33), &Rgb([67, 53, 7]));
    }

    #[test]
    fn test_collinear_corners_rejected() {
        let img = RgbImage::new(50, 50);
        let corners = [c(0.0, 0.0), c(10.0, 10.0), c(20.0, 20.0), c(0.0, 30.0)];
        assert!(matches!(
            warp_perspective(&img, &corners),
            Err(TransformError::Degenerate(_))
        ));
    }

    #[test]
    fn test_coincident_corners_rejected() {
        let img = RgbImage::new(50, 50);
        let corners = [c(5.0, 5.0); 4];
        assert!(warp_perspective(&img, &corners).is_err());
    }
}
