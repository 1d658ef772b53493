//! Shared data model used by every stage of the optimizer.
//!
//! These types describe the document as the core sees it: indirect object
//! references, image objects with their encoding metadata, pages, and the
//! resource bindings that tie a page's content stream to an image. They are
//! independent of the underlying PDF library; [`crate::graph::LopdfGraph`]
//! translates to and from lopdf's own object model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an indirect object: `(object number, generation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef(pub u32, pub u16);

impl ObjectRef {
    pub fn number(self) -> u32 {
        self.0
    }

    pub fn generation(self) -> u16 {
        self.1
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.0, self.1)
    }
}

impl From<(u32, u16)> for ObjectRef {
    fn from((number, generation): (u32, u16)) -> Self {
        Self(number, generation)
    }
}

impl From<ObjectRef> for (u32, u16) {
    fn from(r: ObjectRef) -> Self {
        (r.0, r.1)
    }
}

/// A dictionary value as read or written through the object graph adapter.
///
/// `Null` carries PDF null semantics: writing it removes the key, and reading
/// an absent key yields `None` rather than `Some(Null)`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(String),
    Reference(ObjectRef),
    Array(Vec<KeyValue>),
    Dictionary(Vec<(String, KeyValue)>),
    /// Literal or hex string bytes.
    String(Vec<u8>),
    /// A value that cannot be written back, such as an inline stream.
    Opaque(String),
}

impl KeyValue {
    pub fn name(name: &str) -> Self {
        Self::Name(name.to_string())
    }

    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Self::Reference(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Real(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Real(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Stream filter applied to an image's encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFilter {
    Dct,
    Flate,
    Jpx,
    Jbig2,
    CcittFax,
    RunLength,
    Lzw,
    /// A filter this crate has no name for, or a multi-filter chain.
    Other(String),
}

impl StreamFilter {
    /// Parse a single PDF filter name (without the leading slash).
    pub fn from_name(name: &str) -> Self {
        match name {
            "DCTDecode" | "DCT" => Self::Dct,
            "FlateDecode" | "Fl" => Self::Flate,
            "JPXDecode" => Self::Jpx,
            "JBIG2Decode" => Self::Jbig2,
            "CCITTFaxDecode" | "CCF" => Self::CcittFax,
            "RunLengthDecode" | "RL" => Self::RunLength,
            "LZWDecode" | "LZW" => Self::Lzw,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn pdf_name(&self) -> &str {
        match self {
            Self::Dct => "DCTDecode",
            Self::Flate => "FlateDecode",
            Self::Jpx => "JPXDecode",
            Self::Jbig2 => "JBIG2Decode",
            Self::CcittFax => "CCITTFaxDecode",
            Self::RunLength => "RunLengthDecode",
            Self::Lzw => "LZWDecode",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pdf_name())
    }
}

/// Image colour space, reduced to what the codec gateway can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    /// `[/ICCBased stream]` with the stream's `/N` component count.
    Icc { components: u8, profile: ObjectRef },
    Other(String),
}

impl ColorSpace {
    /// Number of colour components per sample, if known.
    pub fn components(&self) -> Option<u8> {
        match self {
            Self::Gray => Some(1),
            Self::Rgb => Some(3),
            Self::Cmyk => Some(4),
            Self::Icc { components, .. } => Some(*components),
            Self::Other(_) => None,
        }
    }

    pub fn is_cmyk(&self) -> bool {
        self.components() == Some(4)
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gray => f.write_str("DeviceGray"),
            Self::Rgb => f.write_str("DeviceRGB"),
            Self::Cmyk => f.write_str("DeviceCMYK"),
            Self::Icc { components, .. } => write!(f, "ICCBased({components})"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// One embedded raster image, as read from its image XObject dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObject {
    pub id: ObjectRef,
    pub width: u32,
    pub height: u32,
    pub colorspace: ColorSpace,
    pub bits_per_component: u8,
    pub filter: Option<StreamFilter>,
    /// `/SMask` reference to the alpha image, if any.
    pub soft_mask: Option<ObjectRef>,
    /// `/ImageMask true` stencil images carry no colour data of their own.
    pub is_stencil: bool,
    /// Length of the encoded stream in bytes.
    pub encoded_len: usize,
}

impl ImageObject {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A page of the document with its visible box size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    /// 1-based page number.
    pub number: u32,
    pub id: ObjectRef,
    pub width: f64,
    pub height: f64,
}

impl PageInfo {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Affine transform `[a b c d e f]` mapping the image unit square to page space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// `self` applied first, then `other` (PDF `cm` concatenation order).
    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Displayed width and height in points.
    pub fn displayed_size(&self) -> (f64, f64) {
        (
            (self.a * self.a + self.b * self.b).sqrt(),
            (self.c * self.c + self.d * self.d).sqrt(),
        )
    }

    /// Area of the transformed unit square in square points.
    pub fn displayed_area(&self) -> f64 {
        (self.a * self.d - self.b * self.c).abs()
    }

    /// True when every coefficient is finite and the square does not collapse.
    pub fn is_well_formed(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .all(|v| v.is_finite())
            && self.displayed_area() > f64::EPSILON
    }
}

/// A name in a page's resources bound to an image object.
///
/// Several bindings (on one page or many) may point at the same
/// [`ObjectRef`]; the image is still a single object and is rewritten once.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResourceBinding {
    pub page: u32,
    /// Resource name, `Form/Image` when reached through a Form XObject.
    pub name: String,
    pub image: ObjectRef,
    /// Largest placement found in the page's content, `None` if never painted.
    pub placement: Option<Transform>,
}
