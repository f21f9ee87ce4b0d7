use image::GrayImage;

use super::preprocess::Binarized;
use crate::settings::DecimalCandidate;

/// Decimal exponent shown by one binarized image.
///
/// No lit candidate means an integer display (exponent 0); more than one
/// lit candidate is ambiguous and yields `None`. Candidates outside the
/// image read as unlit.
pub fn locate(bin: &GrayImage, candidates: &[DecimalCandidate]) -> Option<u32> {
    let mut lit = candidates
        .iter()
        .filter(|c| matches!(bin.get_pixel_checked(c.x, c.y), Some(p) if p[0] > 0));

    match (lit.next(), lit.next()) {
        (None, _) => Some(0),
        (Some(c), None) => Some(c.exponent),
        (Some(_), Some(_)) => None,
    }
}

/// Decimal exponent of a whole display, preferring the adaptive binarization.
pub fn locate_decimal(bin: &Binarized, candidates: &[DecimalCandidate]) -> Option<u32> {
    locate(&bin.adaptive, candidates).or_else(|| locate(&bin.otsu, candidates))
}
