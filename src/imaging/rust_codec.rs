//! Pure Rust codec: `image` for JPEG, `flate2` for Flate streams.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode `DCTDecode` | `image::load_from_memory_with_format` (JPEG; CMYK JPEGs come out RGB) |
//! | Decode `FlateDecode` | `flate2::read::ZlibDecoder` + PNG/TIFF predictor undo |
//! | Decode raw samples | direct `ImageBuffer::from_raw` (1/3/4 components, 8 or 16 bit) |
//! | Encode JPEG | `image::codecs::jpeg::JpegEncoder::new_with_quality` |
//! | Encode Flate | `flate2::write::ZlibEncoder` at best compression |

use super::codec::{CodecError, Encoded, Pixels, RasterCodec};
use super::params::{DecodeHint, Predictor, Quality, TargetFormat};
use crate::types::{ColorSpace, StreamFilter};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ExtendedColorType, GrayImage, ImageEncoder, ImageFormat, RgbImage};
use log::warn;
use std::io::{Read, Write};

/// Pure Rust codec used in production.
#[derive(Debug, Default)]
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Corrupt(format!("Flate stream: {e}")))?;
    Ok(out)
}

/// Undo PNG row filters (`/Predictor` 10-15).
fn unpredict_png(data: &[u8], p: &Predictor) -> Result<Vec<u8>, CodecError> {
    let row = p.row_bytes();
    let bpp = p.bytes_per_pixel();
    let stride = row + 1;
    if row == 0 {
        return Err(CodecError::Corrupt("predictor with zero columns".into()));
    }
    if stride > data.len() {
        return Err(CodecError::Corrupt(format!(
            "predictor row of {row} bytes exceeds the {}-byte stream",
            data.len()
        )));
    }
    let rows = data.len() / stride;
    let mut out = vec![0u8; rows * row];
    let mut prev = vec![0u8; row];

    for (r, chunk) in data.chunks_exact(stride).enumerate() {
        let filter = chunk[0];
        let line = &chunk[1..];
        let cur = &mut out[r * row..(r + 1) * row];
        for i in 0..row {
            let left = if i >= bpp { cur[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let raw = line[i];
            cur[i] = match filter {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(CodecError::Corrupt(format!("unknown PNG row filter {other}")));
                }
            };
        }
        prev.copy_from_slice(cur);
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Undo TIFF horizontal differencing (`/Predictor 2`), 8-bit samples only.
fn unpredict_tiff(mut data: Vec<u8>, p: &Predictor) -> Result<Vec<u8>, CodecError> {
    if p.bits_per_component != 8 {
        return Err(CodecError::UnsupportedBitDepth(p.bits_per_component));
    }
    let row = p.row_bytes();
    let colors = usize::from(p.colors);
    if row == 0 {
        return Err(CodecError::Corrupt("predictor with zero columns".into()));
    }
    for line in data.chunks_mut(row) {
        for i in colors..line.len() {
            line[i] = line[i].wrapping_add(line[i - colors]);
        }
    }
    Ok(data)
}

fn samples_to_pixels(data: Vec<u8>, hint: &DecodeHint) -> Result<Pixels, CodecError> {
    let components = match hint.colorspace.components() {
        Some(n @ (1 | 3 | 4)) => usize::from(n),
        _ => return Err(CodecError::UnsupportedColorSpace(hint.colorspace.to_string())),
    };
    let samples = match hint.bits_per_component {
        8 => data,
        // keep the high byte of each big-endian sample
        16 => data.chunks_exact(2).map(|c| c[0]).collect(),
        other => return Err(CodecError::UnsupportedBitDepth(other)),
    };

    let (w, h) = (hint.width, hint.height);
    let expected = (w as usize)
        .checked_mul(h as usize)
        .and_then(|n| n.checked_mul(components))
        .ok_or_else(|| CodecError::Corrupt(format!("{w}x{h} image is too large")))?;
    if expected == 0 {
        return Err(CodecError::Corrupt("zero-sized image".into()));
    }
    if samples.len() < expected {
        return Err(CodecError::Corrupt(format!(
            "expected {expected} samples, found {}",
            samples.len()
        )));
    }
    let mut samples = samples;
    samples.truncate(expected);
    apply_decode(&mut samples, components, hint)?;

    let short = || CodecError::Corrupt("sample buffer does not match dimensions".into());
    Ok(match components {
        1 => Pixels::Image(DynamicImage::ImageLuma8(
            GrayImage::from_raw(w, h, samples).ok_or_else(short)?,
        )),
        3 => Pixels::Image(DynamicImage::ImageRgb8(
            RgbImage::from_raw(w, h, samples).ok_or_else(short)?,
        )),
        _ => Pixels::Cmyk {
            width: w,
            height: h,
            data: samples,
        },
    })
}

/// Map 8-bit samples through the `/Decode` ranges, interleaved by component.
fn apply_decode(samples: &mut [u8], components: usize, hint: &DecodeHint) -> Result<(), CodecError> {
    let Some(ranges) = hint.decode_ranges() else {
        return Ok(());
    };
    if ranges.len() < components {
        return Err(CodecError::Corrupt(format!(
            "/Decode has {} ranges for {components} components",
            ranges.len()
        )));
    }
    let tables: Vec<[u8; 256]> = ranges[..components]
        .iter()
        .map(|&(lo, hi)| {
            let mut table = [0u8; 256];
            for (v, slot) in table.iter_mut().enumerate() {
                let mapped = lo + (v as f64 / 255.0) * (hi - lo);
                *slot = (mapped * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            table
        })
        .collect();
    for pixel in samples.chunks_exact_mut(components) {
        for (sample, table) in pixel.iter_mut().zip(&tables) {
            *sample = table[usize::from(*sample)];
        }
    }
    Ok(())
}

fn decode_jpeg(bytes: &[u8], hint: &DecodeHint) -> Result<Pixels, CodecError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| CodecError::Corrupt(format!("JPEG: {e}")))?;
    let img = if hint.decode_ranges().is_none() {
        img
    } else {
        // the decoder already folded CMYK into RGB, so per-component ranges no longer line up
        match hint.colorspace.components() {
            Some(1) => {
                let mut gray = img.to_luma8();
                apply_decode(&mut gray, 1, hint)?;
                DynamicImage::ImageLuma8(gray)
            }
            Some(3) => {
                let mut rgb = img.to_rgb8();
                apply_decode(&mut rgb, 3, hint)?;
                DynamicImage::ImageRgb8(rgb)
            }
            _ => {
                return Err(CodecError::UnsupportedColorSpace(format!(
                    "{} JPEG with /Decode",
                    hint.colorspace
                )));
            }
        }
    };
    if (img.width(), img.height()) != (hint.width, hint.height) {
        warn!(
            "JPEG is {}x{} but the image dictionary says {}x{}",
            img.width(),
            img.height(),
            hint.width,
            hint.height
        );
    }
    Ok(Pixels::Image(img))
}

fn is_gray(img: &DynamicImage) -> bool {
    matches!(
        img.color(),
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
    )
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(raw)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| CodecError::Encode(e.to_string()))
}

impl RasterCodec for RustCodec {
    fn supports(&self, filter: Option<&StreamFilter>) -> bool {
        matches!(filter, None | Some(StreamFilter::Dct) | Some(StreamFilter::Flate))
    }

    fn decode(
        &self,
        bytes: &[u8],
        filter: Option<&StreamFilter>,
        hint: &DecodeHint,
    ) -> Result<Pixels, CodecError> {
        match filter {
            Some(StreamFilter::Dct) => decode_jpeg(bytes, hint),
            Some(StreamFilter::Flate) => {
                let raw = inflate(bytes)?;
                let raw = match hint.predictor {
                    Some(p) if p.predictor >= 10 => unpredict_png(&raw, &p)?,
                    Some(p) if p.predictor == 2 => unpredict_tiff(raw, &p)?,
                    _ => raw,
                };
                samples_to_pixels(raw, hint)
            }
            None => samples_to_pixels(bytes.to_vec(), hint),
            Some(other) => Err(CodecError::UnsupportedFilter(other.to_string())),
        }
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: TargetFormat,
        quality: Quality,
    ) -> Result<Encoded, CodecError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(CodecError::Encode("zero-sized image".into()));
        }
        let gray = is_gray(image);
        let (raw, color) = if gray {
            (image.to_luma8().into_raw(), ExtendedColorType::L8)
        } else {
            (image.to_rgb8().into_raw(), ExtendedColorType::Rgb8)
        };
        let colorspace = if gray { ColorSpace::Gray } else { ColorSpace::Rgb };

        let (bytes, filter) = match format {
            TargetFormat::Jpeg => {
                let mut bytes = Vec::new();
                let q = u8::try_from(quality.value()).unwrap_or(100);
                JpegEncoder::new_with_quality(&mut bytes, q)
                    .write_image(&raw, width, height, color)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
                (bytes, StreamFilter::Dct)
            }
            TargetFormat::Flate => (deflate(&raw)?, StreamFilter::Flate),
        };

        Ok(Encoded {
            bytes,
            filter,
            colorspace,
            width,
            height,
        })
    }
}
