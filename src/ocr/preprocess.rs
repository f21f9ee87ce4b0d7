use anyhow::{bail, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::settings::{Color, DigitRegion, DisplaySetting};

/// Kernel of the box blur applied to a digit crop before segment sampling.
const SEGMENT_BOX_BLUR_RADIUS: u32 = 4;

/// Picks the color subtracted from the crop so that only lit segments stay bright.
///
/// When the unlit color is the brighter one (dark digits on a bright
/// background) its inverse is subtracted instead.
pub fn difference_color(on: Color, off: Color) -> Color {
    if off.channel_sum() > on.channel_sum() {
        off.inverted()
    } else {
        off
    }
}

/// Per-pixel `pixel - color`, clamped at zero.
pub fn subtract_color(img: &RgbImage, color: Color) -> RgbImage {
    let sub = [color.r, color.g, color.b];
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            p[0].saturating_sub(sub[0]),
            p[1].saturating_sub(sub[1]),
            p[2].saturating_sub(sub[2]),
        ])
    })
}

/// Stretches each channel independently to the full 0-255 range.
/// A flat channel becomes 0.
pub fn normalize_channels(img: &RgbImage) -> RgbImage {
    let mut lo = [u8::MAX; 3];
    let mut hi = [u8::MIN; 3];
    for p in img.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(p[c]);
            hi[c] = hi[c].max(p[c]);
        }
    }

    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let mut out = [0u8; 3];
        for c in 0..3 {
            let range = hi[c] as f32 - lo[c] as f32;
            if range > 0.0 {
                out[c] = ((p[c] as f32 - lo[c] as f32) * 255.0 / range).round() as u8;
            }
        }
        Rgb(out)
    })
}

/// Candidate channel weights on a 0.1 grid, summing to one.
fn decolor_weights() -> Vec<[f32; 3]> {
    let mut weights = Vec::with_capacity(66);
    for r in 0..=10u32 {
        for g in 0..=(10 - r) {
            let b = 10 - r - g;
            weights.push([r as f32 / 10.0, g as f32 / 10.0, b as f32 / 10.0]);
        }
    }
    weights
}

/// Contrast-preserving color to gray conversion.
///
/// Chooses the channel weighting whose gray gradients best match the color
/// gradients between neighboring pixels, so that segments that differ only
/// in hue do not collapse into the background. A color gradient counts as
/// the RMS of its channel differences, so a step in one channel alone maps
/// to about 0.58 of its size (0.6 on the weight grid). All-zero input falls back to
/// the standard luma conversion.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    if img.pixels().all(|p| p.0 == [0, 0, 0]) {
        return image::imageops::grayscale(img);
    }

    let (w, h) = img.dimensions();
    // Horizontal and vertical neighbor pairs, subsampled on large crops
    let step = if (w as u64) * (h as u64) > 40_000 { 2 } else { 1 };
    let mut pairs: Vec<([f32; 3], f32)> = Vec::new();
    for y in (0..h).step_by(step) {
        for x in (0..w).step_by(step) {
            let p = img.get_pixel(x, y);
            for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                if nx >= w || ny >= h {
                    continue;
                }
                let q = img.get_pixel(nx, ny);
                let d = [
                    p[0] as f32 - q[0] as f32,
                    p[1] as f32 - q[1] as f32,
                    p[2] as f32 - q[2] as f32,
                ];
                let contrast = ((d[0] * d[0] + d[1] * d[1] + d[2] * d[2]) / 3.0).sqrt();
                pairs.push((d, contrast));
            }
        }
    }

    let mut best = [0.299, 0.587, 0.114];
    let mut best_energy = f32::INFINITY;
    for wts in decolor_weights() {
        let energy: f32 = pairs
            .iter()
            .map(|(d, contrast)| {
                let dg = (wts[0] * d[0] + wts[1] * d[1] + wts[2] * d[2]).abs();
                (dg - contrast).powi(2)
            })
            .sum();
        if energy < best_energy {
            best_energy = energy;
            best = wts;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let p = img.get_pixel(x, y);
        let g = best[0] * p[0] as f32 + best[1] * p[1] as f32 + best[2] * p[2] as f32;
        Luma([g.round().clamp(0.0, 255.0) as u8])
    })
}

/// Odd kernel of roughly a tenth of the shorter side.
pub fn median_kernel_size(width: u32, height: u32) -> u32 {
    let k = width.min(height) / 10;
    if k % 2 == 0 {
        k + 1
    } else {
        k
    }
}

/// Median blur to suppress sensor and compression noise.
pub fn blur(gray: &GrayImage) -> GrayImage {
    let k = median_kernel_size(gray.width(), gray.height());
    if k <= 1 {
        return gray.clone();
    }
    imageproc::filter::median_filter(gray, k / 2, k / 2)
}

/// Maps the actual min..max of `gray` onto 0..255 (truncating).
/// A flat image becomes all zero.
pub fn stretch_gray(gray: &GrayImage) -> GrayImage {
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return GrayImage::new(gray.width(), gray.height());
    }
    let range = (hi - lo) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Luma([(255.0 * (v - lo) as f32 / range) as u8])
    })
}

/// Odd block size equal to the shorter side (at least 3).
pub fn adaptive_block_size(width: u32, height: u32) -> u32 {
    let k = width.min(height).max(3);
    if k % 2 == 0 {
        k + 1
    } else {
        k
    }
}

/// Local Gaussian-weighted mean threshold; a pixel is lit when it is
/// strictly brighter than its neighborhood mean.
pub fn binarize_adaptive(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let block = adaptive_block_size(w, h) as f32;
    let sigma = 0.3 * ((block - 1.0) * 0.5 - 1.0) + 0.8;

    let f = image::ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(w, h, |x, y| {
        Luma([gray.get_pixel(x, y)[0] as f32])
    });
    let mean = imageproc::filter::gaussian_blur_f32(&f, sigma);

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as f32;
        if v > mean.get_pixel(x, y)[0] {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Global Otsu threshold.
pub fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// The two binarizations of one gray image.
#[derive(Debug, Clone)]
pub struct Binarized {
    pub adaptive: GrayImage,
    pub otsu: GrayImage,
}

impl Binarized {
    pub fn of(gray: &GrayImage) -> Self {
        Self {
            adaptive: binarize_adaptive(gray),
            otsu: binarize_otsu(gray),
        }
    }
}

/// Box blur used before segment sampling.
pub fn segment_blur(gray: &GrayImage) -> GrayImage {
    imageproc::filter::box_filter(gray, SEGMENT_BOX_BLUR_RADIUS, SEGMENT_BOX_BLUR_RADIUS)
}

/// Crops a digit region, clamped to the image bounds.
///
/// Fails when nothing of the region lies inside the image.
pub fn crop_region(img: &GrayImage, region: &DigitRegion) -> Result<GrayImage> {
    let (w, h) = img.dimensions();

    let x0 = region.left.min(w);
    let y0 = region.top.min(h);
    let rw = region.right.min(w).saturating_sub(x0);
    let rh = region.bottom.min(h).saturating_sub(y0);

    if rw == 0 || rh == 0 {
        bail!(
            "digit region {:?} lies outside the {}x{} corrected image",
            region,
            w,
            h
        );
    }

    Ok(image::imageops::crop_imm(img, x0, y0, rw, rh).to_image())
}

/// Color crop → stretched, blurred gray image ready for binarization.
pub fn normalize_display(crop: &RgbImage, setting: &DisplaySetting) -> GrayImage {
    let diffed = if setting.subtract_off_color {
        subtract_color(crop, difference_color(setting.on_color, setting.off_color))
    } else {
        crop.clone()
    };

    let mut normalized = normalize_channels(&diffed);
    if setting.is_dark_on_bright() {
        image::imageops::invert(&mut normalized);
    }

    let gray = to_gray(&normalized);
    stretch_gray(&blur(&gray))
}
