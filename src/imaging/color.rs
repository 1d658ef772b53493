//! CMYK to RGB conversion.
//!
//! [`DefaultCmykTransform`] applies the naive subtractive formula. That is
//! the fixed default profile: adequate, not colorimetrically exact. An
//! embedded ICC profile is only checked for a CMYK header; one that declares
//! another data colour space is rejected so the caller can fall back.

use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("ICC profile is too short ({0} bytes)")]
    TruncatedProfile(usize),
    #[error("ICC profile data colour space is {0:?}, not CMYK")]
    NotCmyk(String),
    #[error("expected {expected} CMYK samples, found {found}")]
    SampleCount { expected: usize, found: usize },
}

pub trait ColorTransform: Sync {
    /// Convert interleaved 8-bit CMYK samples to RGB, using `profile` if given.
    fn to_rgb(
        &self,
        width: u32,
        height: u32,
        cmyk: &[u8],
        profile: Option<&[u8]>,
    ) -> Result<RgbImage, ColorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCmykTransform;

/// Data colour space signature at offset 16 of an ICC header.
fn profile_colorspace(profile: &[u8]) -> Result<&[u8], ColorError> {
    profile
        .get(16..20)
        .ok_or(ColorError::TruncatedProfile(profile.len()))
}

pub fn validate_cmyk_profile(profile: &[u8]) -> Result<(), ColorError> {
    let signature = profile_colorspace(profile)?;
    if signature == b"CMYK" {
        Ok(())
    } else {
        Err(ColorError::NotCmyk(
            String::from_utf8_lossy(signature).trim().to_string(),
        ))
    }
}

/// Naive conversion: `channel = 255 * (1 - c) * (1 - k)`.
pub fn naive_cmyk_to_rgb(width: u32, height: u32, cmyk: &[u8]) -> Result<RgbImage, ColorError> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .unwrap_or(usize::MAX);
    if cmyk.len() < expected {
        return Err(ColorError::SampleCount {
            expected,
            found: cmyk.len(),
        });
    }
    let mut out = RgbImage::new(width, height);
    for (pixel, px) in out.pixels_mut().zip(cmyk.chunks_exact(4)) {
        let k = 255 - u16::from(px[3]);
        let channel = |v: u8| ((255 - u16::from(v)) * k / 255) as u8;
        *pixel = Rgb([channel(px[0]), channel(px[1]), channel(px[2])]);
    }
    Ok(out)
}

impl ColorTransform for DefaultCmykTransform {
    fn to_rgb(
        &self,
        width: u32,
        height: u32,
        cmyk: &[u8],
        profile: Option<&[u8]>,
    ) -> Result<RgbImage, ColorError> {
        if let Some(profile) = profile {
            validate_cmyk_profile(profile)?;
        }
        naive_cmyk_to_rgb(width, height, cmyk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(signature: &[u8; 4]) -> Vec<u8> {
        let mut profile = vec![0u8; 128];
        profile[16..20].copy_from_slice(signature);
        profile
    }

    #[test]
    fn pure_black_and_white() {
        let rgb = naive_cmyk_to_rgb(2, 1, &[0, 0, 0, 0, 0, 0, 0, 255]).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn cyan_removes_red() {
        let rgb = naive_cmyk_to_rgb(1, 1, &[255, 0, 0, 0]).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 255, 255]));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let err = naive_cmyk_to_rgb(2, 2, &[0; 8]).unwrap_err();
        assert_eq!(
            err,
            ColorError::SampleCount {
                expected: 16,
                found: 8
            }
        );
    }

    #[test]
    fn overflowing_dimensions_are_a_sample_count_error() {
        let err = naive_cmyk_to_rgb(u32::MAX, u32::MAX, &[0; 8]).unwrap_err();
        assert_eq!(
            err,
            ColorError::SampleCount {
                expected: usize::MAX,
                found: 8
            }
        );
    }

    #[test]
    fn cmyk_profile_is_accepted() {
        let t = DefaultCmykTransform;
        let rgb = t.to_rgb(1, 1, &[0, 0, 0, 0], Some(&header(b"CMYK"))).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn rgb_profile_is_rejected() {
        let t = DefaultCmykTransform;
        let err = t.to_rgb(1, 1, &[0, 0, 0, 0], Some(&header(b"RGB "))).unwrap_err();
        assert_eq!(err, ColorError::NotCmyk("RGB".into()));
    }

    #[test]
    fn truncated_profile_is_rejected() {
        assert_eq!(
            validate_cmyk_profile(&[0; 10]),
            Err(ColorError::TruncatedProfile(10))
        );
    }
}
