//! Synthetic documents for the integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use pdfslim::graph::{LopdfGraph, ObjectGraph, ObjectGraphError};
use pdfslim::types::{
    ImageObject, KeyValue, ObjectRef, PageInfo, PageResourceBinding, StreamFilter,
};
use std::collections::HashSet;
use std::io::Write;

pub const LETTER: (f64, f64) = (612.0, 792.0);
pub const FULL_PAGE: [f64; 6] = [612.0, 0.0, 0.0, 792.0, 0.0, 0.0];
/// 200x200 pt box near the bottom left corner.
pub const SMALL_BOX: [f64; 6] = [200.0, 0.0, 0.0, 200.0, 72.0, 72.0];

struct Page {
    id: ObjectId,
    xobjects: Dictionary,
    content: String,
}

pub struct DocBuilder {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<Page>,
}

impl DocBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    /// Add a US Letter page and return its index.
    pub fn page(&mut self) -> usize {
        let id = self.doc.new_object_id();
        self.pages.push(Page {
            id,
            xobjects: Dictionary::new(),
            content: String::new(),
        });
        self.pages.len() - 1
    }

    /// Uncompressed 8-bit DeviceRGB image.
    pub fn rgb_image(&mut self, width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> ObjectId {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&pixel(x, y));
            }
        }
        self.image(width, height, "DeviceRGB", None, data)
    }

    /// Attach a Flate-compressed DeviceGray soft mask to `image`.
    pub fn soft_mask(&mut self, image: ObjectId, width: u32, height: u32, alpha: impl Fn(u32, u32) -> u8) -> ObjectId {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(alpha(x, y));
            }
        }
        let mask = self.image(width, height, "DeviceGray", Some("FlateDecode"), zlib(&data));
        if let Ok(Object::Stream(stream)) = self.doc.get_object_mut(image) {
            stream.dict.set("SMask", Object::Reference(mask));
        }
        mask
    }

    pub fn place(&mut self, page: usize, name: &str, xobject: ObjectId, m: [f64; 6]) {
        let page = &mut self.pages[page];
        page.xobjects.set(name, Object::Reference(xobject));
        page.content.push_str(&format!(
            "q {} {} {} {} {} {} cm /{} Do Q\n",
            m[0], m[1], m[2], m[3], m[4], m[5], name
        ));
    }

    pub fn finish(mut self) -> Document {
        let mut kids = Vec::new();
        for page in std::mem::take(&mut self.pages) {
            let content = self
                .doc
                .add_object(Stream::new(Dictionary::new(), page.content.into_bytes()));
            self.doc.objects.insert(
                page.id,
                Object::Dictionary(dictionary! {
                    "Type" => "Page",
                    "Parent" => self.pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Resources" => dictionary! { "XObject" => page.xobjects },
                    "Contents" => content,
                }),
            );
            kids.push(Object::Reference(page.id));
        }
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
            }),
        );
        let catalog = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog);
        self.doc
    }

    pub fn into_graph(self) -> LopdfGraph {
        LopdfGraph::from_document(self.finish())
    }

    fn image(&mut self, width: u32, height: u32, colorspace: &str, filter: Option<&str>, data: Vec<u8>) -> ObjectId {
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

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Slow linear ramp that survives downscaling and lossy encoding.
pub fn ramp(width: u32, height: u32) -> impl Fn(u32, u32) -> [u8; 3] {
    move |x, y| [(x * 255 / width) as u8, (y * 255 / height) as u8, 128]
}

/// Per-pixel hash noise.
pub fn noise(x: u32, y: u32) -> [u8; 3] {
    let h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    let h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    [h as u8, (h >> 8) as u8, (h >> 16) as u8]
}

pub fn oref(id: ObjectId) -> ObjectRef {
    ObjectRef::from(id)
}

/// Delegates to a [`LopdfGraph`] but rejects the first `propagate` of chosen images.
pub struct RejectingGraph {
    pub inner: LopdfGraph,
    pub reject: HashSet<ObjectRef>,
}

impl ObjectGraph for RejectingGraph {
    fn pages(&self) -> Result<Vec<PageInfo>, ObjectGraphError> {
        self.inner.pages()
    }

    fn image_bindings(&self, page: &PageInfo) -> Result<Vec<PageResourceBinding>, ObjectGraphError> {
        self.inner.image_bindings(page)
    }

    fn image_object(&self, id: ObjectRef) -> Result<ImageObject, ObjectGraphError> {
        self.inner.image_object(id)
    }

    fn read_stream(&self, id: ObjectRef) -> Result<Vec<u8>, ObjectGraphError> {
        self.inner.read_stream(id)
    }

    fn read_stream_decoded(&self, id: ObjectRef) -> Result<Vec<u8>, ObjectGraphError> {
        self.inner.read_stream_decoded(id)
    }

    fn read_key(&self, id: ObjectRef, key: &str) -> Result<Option<KeyValue>, ObjectGraphError> {
        self.inner.read_key(id, key)
    }

    fn write_key(&mut self, id: ObjectRef, key: &str, value: KeyValue) -> Result<(), ObjectGraphError> {
        self.inner.write_key(id, key, value)
    }

    fn replace_stream(
        &mut self,
        id: ObjectRef,
        bytes: Vec<u8>,
        filter: Option<&StreamFilter>,
    ) -> Result<(), ObjectGraphError> {
        self.inner.replace_stream(id, bytes, filter)
    }

    fn create_object(
        &mut self,
        dict: Vec<(String, KeyValue)>,
        stream: Vec<u8>,
    ) -> Result<ObjectRef, ObjectGraphError> {
        self.inner.create_object(dict, stream)
    }

    fn propagate(&mut self, id: ObjectRef) -> Result<(), ObjectGraphError> {
        if self.reject.remove(&id) {
            return Err(ObjectGraphError::Propagation {
                id,
                reason: "rejected by test graph".into(),
            });
        }
        self.inner.propagate(id)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}
