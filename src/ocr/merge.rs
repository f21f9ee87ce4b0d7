//! Per-digit tie-breaks and assembly of the final number.

use regex::Regex;
use std::sync::OnceLock;

use super::Reading;

/// One recognized digit slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Glyph {
    /// All segments dark
    Blank,
    Digit(u8),
    Minus,
    Unreadable,
    /// The engine itself failed; treated like `Unreadable`
    EngineError,
}

impl Glyph {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '-' => Some(Self::Minus),
            '0'..='9' => c.to_digit(10).map(|d| Self::Digit(d as u8)),
            _ => None,
        }
    }

    /// Number of lit segments of a recognized glyph.
    pub fn strokes(&self) -> Option<u32> {
        match self {
            Self::Blank => Some(0),
            Self::Minus => Some(1),
            Self::Digit(d) => Some(match d {
                1 => 2,
                4 | 7 => 4,
                2 | 3 | 5 | 6 => 5,
                0 | 9 => 6,
                _ => 7,
            }),
            Self::Unreadable | Self::EngineError => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.strokes().is_some()
    }

    fn push_to(&self, out: &mut String) {
        match self {
            Self::Blank => {}
            Self::Digit(d) => out.push(char::from(b'0' + d)),
            Self::Minus => out.push('-'),
            Self::Unreadable | Self::EngineError => out.push_str("NaN"),
        }
    }
}

/// Chooses between the adaptive and Otsu readings of one digit.
///
/// A recognized glyph beats an unrecognized one; between two recognized
/// glyphs the one with fewer lit segments wins, the adaptive reading on a tie.
pub fn select_proper(adaptive: Glyph, otsu: Glyph) -> Glyph {
    match (adaptive.strokes(), otsu.strokes()) {
        (None, None) => Glyph::Unreadable,
        (Some(_), None) => adaptive,
        (None, Some(_)) => otsu,
        (Some(a), Some(o)) => {
            if a > o {
                otsu
            } else {
                adaptive
            }
        }
    }
}

/// Combines the character engine's and the segment engine's reading of one digit.
pub fn merge_engines(character: Glyph, segment: Glyph) -> Glyph {
    match (character.is_recognized(), segment.is_recognized()) {
        (_, true) => segment,
        (true, false) => character,
        (false, false) => Glyph::Unreadable,
    }
}

const INTEGER_PATTERN: &str = r"^-?\d+$";

static INTEGER: OnceLock<Option<Regex>> = OnceLock::new();

fn integer_pattern() -> Option<&'static Regex> {
    INTEGER.get_or_init(|| Regex::new(INTEGER_PATTERN).ok()).as_ref()
}

/// Joins the digit slots left to right and parses the result.
///
/// Returns `None` unless the joined text is an optionally negative integer.
pub fn join_glyphs(glyphs: &[Glyph]) -> Option<i64> {
    let mut text = String::with_capacity(glyphs.len());
    for g in glyphs {
        g.push_to(&mut text);
    }
    if !integer_pattern()?.is_match(&text) {
        return None;
    }
    text.parse().ok()
}

/// Scales the joined integer by the decimal exponent.
pub fn to_reading(glyphs: &[Glyph], exponent: Option<u32>) -> Reading {
    let (Some(int), Some(exp)) = (join_glyphs(glyphs), exponent) else {
        return Reading::Unreadable;
    };
    let Ok(exp) = i32::try_from(exp) else {
        return Reading::Unreadable;
    };
    Reading::from_f64(int as f64 / 10f64.powi(exp))
}
