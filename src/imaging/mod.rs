//! Image processing with pure Rust codecs and pixel maths.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode JPEG** | `image::load_from_memory_with_format` |
//! | **Decode Flate** | `flate2` + PNG/TIFF predictor undo |
//! | **Encode** | `JpegEncoder::new_with_quality`, `flate2` for lossless masks |
//! | **CMYK → RGB** | naive subtractive conversion ([`DefaultCmykTransform`]) |
//! | **Resample** | `image::imageops::resize` (in candidate generation) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for DPI and dimension math (unit testable)
//! - **Parameters**: Data structures describing codec operations
//! - **Codec**: [`RasterCodec`] trait + [`RustCodec`]
//! - **Color**: [`ColorTransform`] trait + [`DefaultCmykTransform`]

mod calculations;
pub mod codec;
pub mod color;
mod params;
pub mod rust_codec;

pub use calculations::{MIN_RESIZED_SIDE, coverage_ratio, dpi_capped_size, effective_dpi, scaled_size};
pub use codec::{CodecError, Encoded, Pixels, RasterCodec};
pub use color::{ColorError, ColorTransform, DefaultCmykTransform};
pub use params::{DecodeHint, Predictor, Quality, TargetFormat};
pub use rust_codec::RustCodec;
