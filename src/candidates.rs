//! Candidate generation.
//!
//! A strategy expands into a ladder of [`CandidatePlan`]s ordered from most
//! to least aggressive. Plans are cheap descriptions; [`realize`] turns one
//! into encoded bytes through the [`RasterCodec`], and [`decoded_raster`]
//! decodes those bytes back so the assessor sees what a reader will see.
//!
//! | Strategy | Ladder |
//! |---|---|
//! | background | one plan at `background.scale`, `background.quality` |
//! | foreground-opaque | quality ladder at the DPI-capped size, then full size at the top quality if the cap shrank it |
//! | foreground-transparent | quality ladder at full size, soft mask stored lossless |

use crate::classify::Strategy;
use crate::config::OptimizeConfig;
use crate::imaging::{
    CodecError, DecodeHint, Encoded, Pixels, Quality, RasterCodec, TargetFormat, dpi_capped_size,
    scaled_size,
};
use crate::quality::Raster;
use crate::types::{ColorSpace, StreamFilter};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::borrow::Cow;

/// Highest quality a ladder step may reach unless the target itself is higher.
pub const MAX_LADDER_QUALITY: u32 = 95;

/// Qualities tried in order: `target`, `target + step`, ... capped and de-duplicated.
pub fn quality_ladder(target: u32, step: u32, max_candidates: usize) -> Vec<Quality> {
    let target = target.clamp(1, 100);
    let cap = MAX_LADDER_QUALITY.max(target);
    let mut ladder: Vec<Quality> = Vec::new();
    for i in 0..max_candidates.max(1) {
        let q = Quality::new(target.saturating_add(step.saturating_mul(i as u32)).min(cap));
        if ladder.last() == Some(&q) {
            break;
        }
        ladder.push(q);
    }
    ladder
}

/// One rung of a ladder, before any pixel work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePlan {
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
    pub format: TargetFormat,
    /// Rough fidelity in `[0, 1]`: quality times linear scale. Non-decreasing
    /// along a ladder.
    pub expected_fidelity: f64,
}

impl CandidatePlan {
    fn new(size: (u32, u32), source: (u32, u32), quality: Quality) -> Self {
        let linear = f64::from(size.0) / f64::from(source.0.max(1));
        Self {
            width: size.0,
            height: size.1,
            quality,
            format: TargetFormat::Jpeg,
            expected_fidelity: (f64::from(quality.value()) / 100.0 * linear).clamp(0.0, 1.0),
        }
    }
}

/// Ladder for `strategy` on an image of `source` pixels.
///
/// `dpi` is the lowest effective resolution over the image's placements;
/// `None` means it was never measured and no DPI cap applies.
pub fn plan_candidates(
    strategy: Strategy,
    source: (u32, u32),
    dpi: Option<f64>,
    config: &OptimizeConfig,
) -> Vec<CandidatePlan> {
    let ladder = quality_ladder(
        config.target_quality,
        config.gate.quality_step,
        config.gate.max_candidates,
    );
    match strategy {
        Strategy::Background => {
            let size = scaled_size(source, config.background.scale);
            vec![CandidatePlan::new(
                size,
                source,
                Quality::new(config.background.quality),
            )]
        }
        Strategy::ForegroundTransparent => ladder
            .iter()
            .map(|&q| CandidatePlan::new(source, source, q))
            .collect(),
        Strategy::ForegroundOpaque => {
            let capped = dpi
                .map(|d| dpi_capped_size(source, d, config.max_dpi, config.dpi_tolerance))
                .unwrap_or(source);
            let mut plans: Vec<CandidatePlan> = ladder
                .iter()
                .map(|&q| CandidatePlan::new(capped, source, q))
                .collect();
            if capped != source {
                if let Some(&top) = ladder.last() {
                    plans.push(CandidatePlan::new(source, source, top));
                }
            }
            plans
        }
    }
}

/// Decoded colour data and optional alpha, both at the same size.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub color: DynamicImage,
    pub alpha: Option<GrayImage>,
}

impl SourceImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.color.width(), self.color.height())
    }

    /// Luma-only copy for grayscale output; the alpha is kept as it is.
    pub fn into_grayscale(self) -> Self {
        Self {
            color: DynamicImage::ImageLuma8(self.color.to_luma8()),
            alpha: self.alpha,
        }
    }

    /// The original as the assessor compares it.
    pub fn raster(&self) -> Raster {
        Raster {
            rgb: self.color.to_rgb8(),
            alpha: self.alpha.clone(),
        }
    }
}

/// Replacement soft-mask bytes, always 8-bit DeviceGray.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftMaskCandidate {
    pub bytes: Vec<u8>,
    pub filter: StreamFilter,
    pub width: u32,
    pub height: u32,
}

/// A fully encoded proposal. Nothing in the document has changed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationCandidate {
    /// Position in the ladder, 0 = most aggressive.
    pub index: usize,
    pub plan: CandidatePlan,
    pub encoded: Encoded,
    pub soft_mask: Option<SoftMaskCandidate>,
}

impl OptimizationCandidate {
    pub fn colorspace(&self) -> &ColorSpace {
        &self.encoded.colorspace
    }

    /// Image bytes plus any replacement soft-mask bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded.bytes.len() + self.soft_mask.as_ref().map_or(0, |m| m.bytes.len())
    }
}

/// Resample and encode one plan. A source with alpha always yields a new
/// soft mask at the candidate's size.
pub fn realize(
    index: usize,
    plan: &CandidatePlan,
    source: &SourceImage,
    codec: &impl RasterCodec,
) -> Result<OptimizationCandidate, CodecError> {
    let (w, h) = (plan.width, plan.height);
    let color: Cow<'_, DynamicImage> = if source.dimensions() == (w, h) {
        Cow::Borrowed(&source.color)
    } else {
        Cow::Owned(source.color.resize_exact(w, h, FilterType::Lanczos3))
    };
    let encoded = codec.encode(&color, plan.format, plan.quality)?;

    let soft_mask = match &source.alpha {
        Some(alpha) => {
            let alpha = if alpha.dimensions() == (w, h) {
                alpha.clone()
            } else {
                imageops::resize(alpha, w, h, FilterType::Triangle)
            };
            let mask = codec.encode(
                &DynamicImage::ImageLuma8(alpha),
                TargetFormat::Flate,
                Quality::default(),
            )?;
            Some(SoftMaskCandidate {
                bytes: mask.bytes,
                filter: mask.filter,
                width: w,
                height: h,
            })
        }
        None => None,
    };

    Ok(OptimizationCandidate {
        index,
        plan: *plan,
        encoded,
        soft_mask,
    })
}

/// Decode a candidate's bytes back to pixels for assessment.
pub fn decoded_raster(
    candidate: &OptimizationCandidate,
    codec: &impl RasterCodec,
) -> Result<Raster, CodecError> {
    let enc = &candidate.encoded;
    let hint = DecodeHint::new(enc.width, enc.height, enc.colorspace.clone(), 8);
    let rgb = match codec.decode(&enc.bytes, Some(&enc.filter), &hint)? {
        Pixels::Image(img) => img.to_rgb8(),
        Pixels::Cmyk { .. } => {
            return Err(CodecError::UnsupportedColorSpace("DeviceCMYK".into()));
        }
    };

    let alpha = match &candidate.soft_mask {
        Some(mask) => {
            let hint = DecodeHint::new(mask.width, mask.height, ColorSpace::Gray, 8);
            match codec.decode(&mask.bytes, Some(&mask.filter), &hint)? {
                Pixels::Image(img) => Some(img.to_luma8()),
                Pixels::Cmyk { .. } => {
                    return Err(CodecError::UnsupportedColorSpace("DeviceCMYK".into()));
                }
            }
        }
        None => None,
    };
    Ok(Raster { rgb, alpha })
}
