//! Quality assessment of a re-encoded candidate against its source.
//!
//! Both rasters are brought to a common resolution (the candidate is
//! upsampled to the original's size when it was downscaled), composited over
//! white through their own soft masks, and compared:
//!
//! | Metric | Definition |
//! |---|---|
//! | `similarity` | mean SSIM over 8×8 windows (stride 4), averaged across R, G, B, clamped to `[0, 1]` |
//! | `psnr` | `10·log10(255² / MSE)` over composited RGB, capped at 100 dB |
//! | `black_pixel_ratio` | share of pixels opaque and black (luma < 10) in the candidate but not in the original |

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::Serialize;
use thiserror::Error;

const WINDOW: usize = 8;
const STRIDE: usize = 4;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
const PSNR_CAP: f64 = 100.0;
/// Luma below this counts as black.
const BLACK_LUMA: f64 = 10.0;
/// Alpha at or above this counts as fully opaque.
pub const OPAQUE_ALPHA: u8 = 250;
/// Largest relative aspect drift still treated as the same picture.
const ASPECT_TOLERANCE: f64 = 0.02;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssessmentError {
    #[error("cannot assess an empty raster")]
    Empty,
    #[error("candidate {candidate:?} cannot be aligned with original {original:?}")]
    Misaligned {
        original: (u32, u32),
        candidate: (u32, u32),
    },
    #[error("soft mask is {mask:?} but colour data is {color:?}")]
    MaskMismatch { color: (u32, u32), mask: (u32, u32) },
}

/// Decoded colour data with its optional soft mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub rgb: RgbImage,
    pub alpha: Option<GrayImage>,
}

impl Raster {
    pub fn opaque(rgb: RgbImage) -> Self {
        Self { rgb, alpha: None }
    }

    pub fn with_alpha(rgb: RgbImage, alpha: GrayImage) -> Self {
        Self {
            rgb,
            alpha: Some(alpha),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    pub similarity: f64,
    pub psnr: f64,
    pub black_pixel_ratio: f64,
}

/// Compare `candidate` against `original` at the original's resolution.
pub fn assess(original: &Raster, candidate: &Raster) -> Result<QualityReport, AssessmentError> {
    let (ow, oh) = original.dimensions();
    let (cw, ch) = candidate.dimensions();
    if ow == 0 || oh == 0 || cw == 0 || ch == 0 {
        return Err(AssessmentError::Empty);
    }
    check_mask(original)?;
    check_mask(candidate)?;

    if !same_aspect((ow, oh), (cw, ch)) {
        return Err(AssessmentError::Misaligned {
            original: (ow, oh),
            candidate: (cw, ch),
        });
    }

    let aligned;
    let candidate = if (cw, ch) == (ow, oh) {
        candidate
    } else {
        aligned = Raster {
            rgb: imageops::resize(&candidate.rgb, ow, oh, FilterType::Triangle),
            alpha: candidate
                .alpha
                .as_ref()
                .map(|a| imageops::resize(a, ow, oh, FilterType::Triangle)),
        };
        &aligned
    };

    let a = composite(original);
    let b = composite(candidate);
    let (w, h) = (ow as usize, oh as usize);

    let similarity = (0..3)
        .map(|c| ssim_channel(&a[c], &b[c], w, h))
        .sum::<f64>()
        / 3.0;

    Ok(QualityReport {
        similarity: similarity.clamp(0.0, 1.0),
        psnr: psnr(&a, &b),
        black_pixel_ratio: black_pixel_ratio(original, candidate),
    })
}

/// Each candidate side may be off by half a pixel from an exact uniform
/// scale, so the implied width drifts by up to `0.5 · ow / oh` from the
/// height alone. Either axis landing inside its bound is enough.
fn same_aspect((ow, oh): (u32, u32), (cw, ch): (u32, u32)) -> bool {
    let (ow, oh, cw, ch) = (f64::from(ow), f64::from(oh), f64::from(cw), f64::from(ch));
    let implied_width = ow * ch / oh;
    let implied_height = oh * cw / ow;
    let width_slack = 0.5 + 0.5 * ow / oh + ASPECT_TOLERANCE * cw;
    let height_slack = 0.5 + 0.5 * oh / ow + ASPECT_TOLERANCE * ch;
    (cw - implied_width).abs() <= width_slack || (ch - implied_height).abs() <= height_slack
}

fn check_mask(raster: &Raster) -> Result<(), AssessmentError> {
    match &raster.alpha {
        Some(mask) if mask.dimensions() != raster.rgb.dimensions() => {
            Err(AssessmentError::MaskMismatch {
                color: raster.rgb.dimensions(),
                mask: mask.dimensions(),
            })
        }
        _ => Ok(()),
    }
}

/// R, G, B planes composited over white.
fn composite(raster: &Raster) -> [Vec<f64>; 3] {
    let n = raster.rgb.as_raw().len() / 3;
    let mut planes = [
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
    ];
    for (i, px) in raster.rgb.pixels().enumerate() {
        let alpha = raster
            .alpha
            .as_ref()
            .map_or(1.0, |m| f64::from(m.as_raw()[i]) / 255.0);
        for (c, plane) in planes.iter_mut().enumerate() {
            plane.push(f64::from(px[c]) * alpha + 255.0 * (1.0 - alpha));
        }
    }
    planes
}

fn ssim_channel(a: &[f64], b: &[f64], width: usize, height: usize) -> f64 {
    let win_w = WINDOW.min(width);
    let win_h = WINDOW.min(height);
    let mut total = 0.0;
    let mut count = 0usize;

    let mut y = 0;
    loop {
        let mut x = 0;
        loop {
            total += window_ssim(a, b, width, x, y, win_w, win_h);
            count += 1;
            if x + win_w >= width {
                break;
            }
            x = (x + STRIDE).min(width - win_w);
        }
        if y + win_h >= height {
            break;
        }
        y = (y + STRIDE).min(height - win_h);
    }
    total / count as f64
}

fn window_ssim(a: &[f64], b: &[f64], width: usize, x0: usize, y0: usize, w: usize, h: usize) -> f64 {
    let n = (w * h) as f64;
    let (mut sa, mut sb) = (0.0, 0.0);
    for y in y0..y0 + h {
        let row = y * width;
        for x in x0..x0 + w {
            sa += a[row + x];
            sb += b[row + x];
        }
    }
    let (ma, mb) = (sa / n, sb / n);

    let (mut va, mut vb, mut cov) = (0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        let row = y * width;
        for x in x0..x0 + w {
            let da = a[row + x] - ma;
            let db = b[row + x] - mb;
            va += da * da;
            vb += db * db;
            cov += da * db;
        }
    }
    let (va, vb, cov) = (va / n, vb / n, cov / n);

    ((2.0 * ma * mb + C1) * (2.0 * cov + C2)) / ((ma * ma + mb * mb + C1) * (va + vb + C2))
}

fn psnr(a: &[Vec<f64>; 3], b: &[Vec<f64>; 3]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for c in 0..3 {
        for (x, y) in a[c].iter().zip(&b[c]) {
            sum += (x - y) * (x - y);
            n += 1;
        }
    }
    let mse = sum / n as f64;
    if mse == 0.0 {
        return PSNR_CAP;
    }
    (10.0 * (255.0 * 255.0 / mse).log10()).min(PSNR_CAP)
}

fn luma(px: &image::Rgb<u8>) -> f64 {
    0.299 * f64::from(px[0]) + 0.587 * f64::from(px[1]) + 0.114 * f64::from(px[2])
}

fn opaque_black(raster: &Raster, i: usize, px: &image::Rgb<u8>) -> bool {
    let opaque = raster
        .alpha
        .as_ref()
        .is_none_or(|m| m.as_raw()[i] >= OPAQUE_ALPHA);
    opaque && luma(px) < BLACK_LUMA
}

/// Fraction of pixels that became opaque black. Both rasters share dimensions.
fn black_pixel_ratio(original: &Raster, candidate: &Raster) -> f64 {
    let total = original.rgb.as_raw().len() / 3;
    let regressions = original
        .rgb
        .pixels()
        .zip(candidate.rgb.pixels())
        .enumerate()
        .filter(|(i, (o, c))| opaque_black(candidate, *i, c) && !opaque_black(original, *i, o))
        .count();
    regressions as f64 / total as f64
}
