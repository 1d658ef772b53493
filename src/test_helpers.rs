//! Shared test utilities: synthetic PDF documents built with lopdf.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let mut b = PdfBuilder::new();
//! let page = b.page(612.0, 792.0);
//! let img = b.rgb_image(64, 64, |x, y| [x as u8, y as u8, 0]);
//! b.place(page, "Im0", img, [612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);
//! let graph = b.into_graph();
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::graph::LopdfGraph;
use crate::types::ObjectRef;

// =========================================================================
// Builder
// =========================================================================

struct PageState {
    id: ObjectId,
    width: f64,
    height: f64,
    xobjects: Dictionary,
    content: String,
    inherit_resources: bool,
}

pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<PageState>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    /// Reserve a page of the given size in points.
    pub fn page(&mut self, width: f64, height: f64) -> ObjectId {
        let id = self.doc.new_object_id();
        self.pages.push(PageState {
            id,
            width,
            height,
            xobjects: Dictionary::new(),
            content: String::new(),
            inherit_resources: false,
        });
        id
    }

    /// Uncompressed 8-bit DeviceRGB image.
    pub fn rgb_image(&mut self, width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> ObjectId {
        let data = rgb_bytes(width, height, pixel);
        self.image_stream(width, height, "DeviceRGB", None, data)
    }

    /// Flate-compressed 8-bit DeviceRGB image.
    pub fn flate_rgb_image(
        &mut self,
        width: u32,
        height: u32,
        pixel: impl Fn(u32, u32) -> [u8; 3],
    ) -> ObjectId {
        let data = zlib(&rgb_bytes(width, height, pixel));
        self.image_stream(width, height, "DeviceRGB", Some("FlateDecode"), data)
    }

    /// Flate-compressed DeviceRGB image with PNG Up rows (`/Predictor 12`).
    pub fn predicted_rgb_image(
        &mut self,
        width: u32,
        height: u32,
        pixel: impl Fn(u32, u32) -> [u8; 3],
    ) -> ObjectId {
        let raw = rgb_bytes(width, height, pixel);
        let row = width as usize * 3;
        let mut filtered = Vec::with_capacity(raw.len() + height as usize);
        let mut prev = vec![0u8; row];
        for line in raw.chunks_exact(row) {
            filtered.push(2);
            filtered.extend(line.iter().zip(&prev).map(|(b, p)| b.wrapping_sub(*p)));
            prev.copy_from_slice(line);
        }
        let id = self.image_stream(width, height, "DeviceRGB", Some("FlateDecode"), zlib(&filtered));
        self.set_key(
            id,
            "DecodeParms",
            Object::Dictionary(dictionary! {
                "Predictor" => 12i64,
                "Colors" => 3i64,
                "Columns" => i64::from(width),
            }),
        );
        id
    }

    /// DCT-encoded DeviceRGB image at the given JPEG quality.
    pub fn jpeg_image(
        &mut self,
        width: u32,
        height: u32,
        quality: u8,
        pixel: impl Fn(u32, u32) -> [u8; 3],
    ) -> ObjectId {
        let raw = rgb_bytes(width, height, pixel);
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .write_image(&raw, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        self.image_stream(width, height, "DeviceRGB", Some("DCTDecode"), jpeg)
    }

    /// Uncompressed 8-bit DeviceCMYK image.
    pub fn cmyk_image(&mut self, width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 4]) -> ObjectId {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&pixel(x, y));
            }
        }
        self.image_stream(width, height, "DeviceCMYK", None, data)
    }

    /// Attach a Flate-compressed DeviceGray soft mask to `image`.
    pub fn soft_mask(
        &mut self,
        image: ObjectId,
        width: u32,
        height: u32,
        alpha: impl Fn(u32, u32) -> u8,
    ) -> ObjectId {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(alpha(x, y));
            }
        }
        let mask = self.image_stream(width, height, "DeviceGray", Some("FlateDecode"), zlib(&data));
        self.set_key(image, "SMask", Object::Reference(mask));
        mask
    }

    /// 1-bit stencil mask image.
    pub fn stencil(&mut self, width: u32, height: u32) -> ObjectId {
        let row = width.div_ceil(8) as usize;
        let data = vec![0xAAu8; row * height as usize];
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ImageMask" => true,
                "BitsPerComponent" => 1i64,
            },
            data,
        );
        self.doc.add_object(Object::Stream(stream))
    }

    pub fn set_key(&mut self, id: ObjectId, key: &str, value: Object) {
        if let Ok(Object::Stream(stream)) = self.doc.get_object_mut(id) {
            stream.dict.set(key, value);
        }
    }

    /// Bind `xobject` under `name` without painting it.
    pub fn bind(&mut self, page: ObjectId, name: &str, xobject: ObjectId) {
        let state = self.state(page);
        state.xobjects.set(name, Object::Reference(xobject));
    }

    /// Bind and paint `xobject` with the given `cm` matrix.
    pub fn place(&mut self, page: ObjectId, name: &str, xobject: ObjectId, m: [f64; 6]) {
        let state = self.state(page);
        state.xobjects.set(name, Object::Reference(xobject));
        state.content.push_str(&format!(
            "q {} {} {} {} {} {} cm /{} Do Q\n",
            m[0], m[1], m[2], m[3], m[4], m[5], name
        ));
    }

    /// A Form XObject with its own resources binding `image` under `name`.
    pub fn form_with_image(&mut self, name: &str, image: ObjectId, matrix: [f64; 6], content: &[u8]) -> ObjectId {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 1000.into(), 1000.into()],
                "Matrix" => matrix.iter().map(|v| Object::Real(*v as _)).collect::<Vec<_>>(),
                "Resources" => dictionary! {
                    "XObject" => dictionary! { name => Object::Reference(image) },
                },
            },
            content.to_vec(),
        );
        self.doc.add_object(Object::Stream(stream))
    }

    /// Put this page's resources on the page tree node instead of the page.
    pub fn move_resources_to_parent(&mut self, page: ObjectId) {
        self.state(page).inherit_resources = true;
    }

    pub fn finish(mut self) -> (Document, Vec<ObjectId>) {
        let mut kids = Vec::new();
        let mut inherited = Dictionary::new();
        let pages = std::mem::take(&mut self.pages);
        for state in &pages {
            let content_id = self
                .doc
                .add_object(Stream::new(Dictionary::new(), state.content.clone().into_bytes()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => self.pages_id,
                "MediaBox" => vec![
                    0.into(),
                    0.into(),
                    Object::Real(state.width as _),
                    Object::Real(state.height as _),
                ],
                "Contents" => content_id,
            };
            let resources = dictionary! { "XObject" => state.xobjects.clone() };
            if state.inherit_resources {
                for (k, v) in state.xobjects.iter() {
                    inherited.set(k.clone(), v.clone());
                }
            } else {
                page.set("Resources", resources);
            }
            self.doc.objects.insert(state.id, Object::Dictionary(page));
            kids.push(Object::Reference(state.id));
        }

        let mut tree = dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        };
        if pages.iter().any(|p| p.inherit_resources) {
            tree.set("Resources", dictionary! { "XObject" => inherited });
        }
        self.doc.objects.insert(self.pages_id, Object::Dictionary(tree));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let ids = pages.iter().map(|p| p.id).collect();
        (self.doc, ids)
    }

    pub fn into_graph(self) -> LopdfGraph {
        let (doc, _) = self.finish();
        LopdfGraph::from_document(doc)
    }

    fn state(&mut self, page: ObjectId) -> &mut PageState {
        self.pages
            .iter_mut()
            .find(|p| p.id == page)
            .expect("page created by this builder")
    }

    fn image_stream(
        &mut self,
        width: u32,
        height: u32,
        colorspace: &str,
        filter: Option<&str>,
        data: Vec<u8>,
    ) -> ObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => colorspace,
            "BitsPerComponent" => 8i64,
        };
        if let Some(filter) = filter {
            dict.set("Filter", filter);
        }
        self.doc.add_object(Object::Stream(Stream::new(dict, data)))
    }
}

// =========================================================================
// Pixel helpers
// =========================================================================

pub fn rgb_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&pixel(x, y));
        }
    }
    data
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Smooth photo-like gradient that JPEG reproduces well.
pub fn gradient(x: u32, y: u32) -> [u8; 3] {
    [
        (60 + (x * 3) % 160) as u8,
        (80 + (y * 2) % 140) as u8,
        (100 + ((x + y) % 120)) as u8,
    ]
}

/// Slow linear ramp that survives heavy downscaling and low JPEG quality.
pub fn ramp(width: u32, height: u32) -> impl Fn(u32, u32) -> [u8; 3] {
    move |x, y| {
        [
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ]
    }
}

/// Per-pixel hash noise that no lossy candidate reproduces closely.
pub fn noise(x: u32, y: u32) -> [u8; 3] {
    let h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    let h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    [h as u8, (h >> 8) as u8, (h >> 16) as u8]
}

pub fn oref(id: ObjectId) -> ObjectRef {
    ObjectRef::from(id)
}
