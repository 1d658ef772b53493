//! Parameter types for codec operations.
//!
//! These structs describe *what* to decode or encode, not *how*. They are the
//! interface between the candidate generator (which decides what to produce)
//! and the [`codec`](super::codec) (which does the pixel work).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`TargetFormat`]: Output encoding: JPEG (`DCTDecode`) or lossless Flate.
//! - [`DecodeHint`]: Geometry and sample layout from the image dictionary.
//! - [`Predictor`]: `/DecodeParms` of a Flate stream.

use crate::types::ColorSpace;
use serde::Serialize;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpeg,
    Flate,
}

/// Flate predictor parameters (`/Predictor`, `/Colors`, `/BitsPerComponent`, `/Columns`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predictor {
    pub predictor: u8,
    pub colors: u8,
    pub bits_per_component: u8,
    pub columns: u32,
}

impl Predictor {
    /// Bytes per complete pixel, at least one.
    pub fn bytes_per_pixel(&self) -> usize {
        (usize::from(self.colors) * usize::from(self.bits_per_component)).div_ceil(8).max(1)
    }

    pub fn row_bytes(&self) -> usize {
        (self.columns as usize * usize::from(self.colors) * usize::from(self.bits_per_component))
            .div_ceil(8)
    }
}

/// What the image dictionary says about the samples inside a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeHint {
    pub width: u32,
    pub height: u32,
    pub colorspace: ColorSpace,
    pub bits_per_component: u8,
    pub predictor: Option<Predictor>,
    /// `/Decode` array, one `[min, max]` pair per component.
    pub decode: Option<Vec<f64>>,
}

impl DecodeHint {
    pub fn new(width: u32, height: u32, colorspace: ColorSpace, bits_per_component: u8) -> Self {
        Self {
            width,
            height,
            colorspace,
            bits_per_component,
            predictor: None,
            decode: None,
        }
    }

    pub fn with_predictor(mut self, predictor: Option<Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_decode(mut self, decode: Option<Vec<f64>>) -> Self {
        self.decode = decode;
        self
    }

    /// The `/Decode` pairs when they differ from the default `[0 1]` mapping.
    pub fn decode_ranges(&self) -> Option<Vec<(f64, f64)>> {
        let decode = self.decode.as_ref()?;
        let pairs: Vec<(f64, f64)> = decode.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        if pairs.iter().all(|&(lo, hi)| lo == 0.0 && hi == 1.0) {
            None
        } else {
            Some(pairs)
        }
    }
}
