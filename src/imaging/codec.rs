//! Raster codec gateway: trait and shared types.
//!
//! The [`RasterCodec`] trait is the only way the optimizer turns stream bytes
//! into pixels and back. The production implementation is
//! [`RustCodec`](super::rust_codec::RustCodec); tests wrap it in a recording
//! mock to inject encode failures.

use super::params::{DecodeHint, Quality, TargetFormat};
use crate::types::{ColorSpace, StreamFilter};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("unsupported filter {0}")]
    UnsupportedFilter(String),
    #[error("unsupported colour space {0}")]
    UnsupportedColorSpace(String),
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
    #[error("corrupt image data: {0}")]
    Corrupt(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

impl CodecError {
    /// The input is valid but outside what the codec handles.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFilter(_) | Self::UnsupportedColorSpace(_) | Self::UnsupportedBitDepth(_)
        )
    }
}

/// Decoded samples. CMYK is kept apart until the colour transform runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    Image(DynamicImage),
    Cmyk {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

impl Pixels {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Image(img) => (img.width(), img.height()),
            Self::Cmyk { width, height, .. } => (*width, *height),
        }
    }

    pub fn is_cmyk(&self) -> bool {
        matches!(self, Self::Cmyk { .. })
    }
}

/// Encoded output ready to be written into an image stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub filter: StreamFilter,
    pub colorspace: ColorSpace,
    pub width: u32,
    pub height: u32,
}

/// Decode and encode image stream payloads.
pub trait RasterCodec: Sync {
    /// Whether `decode` can handle this filter (`None` = unfiltered samples).
    fn supports(&self, filter: Option<&StreamFilter>) -> bool;

    fn decode(
        &self,
        bytes: &[u8],
        filter: Option<&StreamFilter>,
        hint: &DecodeHint,
    ) -> Result<Pixels, CodecError>;

    /// Encode 8-bit gray or RGB pixels. `quality` is ignored for lossless formats.
    fn encode(
        &self,
        image: &DynamicImage,
        format: TargetFormat,
        quality: Quality,
    ) -> Result<Encoded, CodecError>;
}
