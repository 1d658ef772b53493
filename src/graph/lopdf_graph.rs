//! [`ObjectGraph`] over an in-memory `lopdf::Document`.

use super::content::{inherited, is_image, resolve, scan_placements, xobject_dict};
use super::{ObjectGraph, ObjectGraphError, Result};
use crate::types::{
    ColorSpace, ImageObject, KeyValue, ObjectRef, PageInfo, PageResourceBinding, StreamFilter,
};
use flate2::read::ZlibDecoder;
use log::{debug, warn};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// US Letter, used when a page carries no usable box.
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Resource path from a page down to an image, as discovered by a scan.
#[derive(Debug, Clone)]
struct BindingPath {
    page: ObjectId,
    page_number: u32,
    names: Vec<String>,
}

pub struct LopdfGraph {
    doc: Document,
    open: bool,
    /// Every path through which an image was discovered, for propagation checks.
    bindings: RefCell<HashMap<ObjectRef, Vec<BindingPath>>>,
}

impl LopdfGraph {
    pub fn from_document(doc: Document) -> Self {
        Self {
            doc,
            open: true,
            bindings: RefCell::new(HashMap::new()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let doc = Document::load(path).map_err(library)?;
        Ok(Self::from_document(doc))
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(library)?;
        Ok(Self::from_document(doc))
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Drop unreachable objects (such as replaced soft masks), write the
    /// document and finalize the graph.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        let pruned = self.doc.prune_objects();
        debug!("pruned {} orphaned objects", pruned.len());
        self.doc
            .save(path)
            .map_err(|e| ObjectGraphError::Library(e.to_string()))?;
        self.open = false;
        Ok(())
    }

    /// Like [`save`](Self::save) but into a writer.
    pub fn save_to<W: std::io::Write>(&mut self, target: &mut W) -> Result<()> {
        self.ensure_open()?;
        self.doc.prune_objects();
        self.doc
            .save_to(target)
            .map_err(|e| ObjectGraphError::Library(e.to_string()))?;
        self.open = false;
        Ok(())
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ObjectGraphError::Closed)
        }
    }

    fn object(&self, id: ObjectRef) -> Result<&Object> {
        self.doc
            .get_object(id.into())
            .map_err(|_| ObjectGraphError::InvalidObject(id))
    }

    fn stream(&self, id: ObjectRef) -> Result<&Stream> {
        self.object(id)?
            .as_stream()
            .map_err(|_| ObjectGraphError::NotAStream(id))
    }

    fn stream_mut(&mut self, id: ObjectRef) -> Result<&mut Stream> {
        self.doc
            .get_object_mut(id.into())
            .map_err(|_| ObjectGraphError::InvalidObject(id))?
            .as_stream_mut()
            .map_err(|_| ObjectGraphError::NotAStream(id))
    }

    fn dict_mut(&mut self, id: ObjectRef) -> Result<&mut Dictionary> {
        match self.doc.get_object_mut(id.into()) {
            Ok(Object::Stream(stream)) => Ok(&mut stream.dict),
            Ok(Object::Dictionary(dict)) => Ok(dict),
            Ok(_) => Err(ObjectGraphError::Malformed(format!("{id} is not a dictionary"))),
            Err(_) => Err(ObjectGraphError::InvalidObject(id)),
        }
    }

    fn dict(&self, id: ObjectRef) -> Result<&Dictionary> {
        match self.object(id)? {
            Object::Stream(stream) => Ok(&stream.dict),
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(ObjectGraphError::Malformed(format!("{id} is not a dictionary"))),
        }
    }

    /// Follow a resource path from a page and return the object it names now.
    fn resolve_path(&self, path: &BindingPath) -> Option<ObjectId> {
        let page = self.doc.get_object(path.page).ok()?.as_dict().ok()?;
        let mut resources = inherited(&self.doc, page, b"Resources").and_then(|r| r.as_dict().ok());
        let mut target = None;
        for name in &path.names {
            let xobjects = xobject_dict(&self.doc, resources)?;
            let Object::Reference(id) = xobjects.get(name.as_bytes()).ok()? else {
                return None;
            };
            target = Some(*id);
            if let Ok(Object::Stream(form)) = self.doc.get_object(*id) {
                if let Some(own) = form
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| resolve(&self.doc, r))
                    .and_then(|r| r.as_dict().ok())
                {
                    resources = Some(own);
                }
            }
        }
        target
    }

    fn integer(&self, dict: &Dictionary, key: &[u8]) -> Option<i64> {
        match resolve(&self.doc, dict.get(key).ok()?)? {
            Object::Integer(n) => Some(*n),
            Object::Real(n) => Some(f64::from(*n) as i64),
            _ => None,
        }
    }

    fn colorspace(&self, dict: &Dictionary, is_stencil: bool) -> ColorSpace {
        let Some(value) = dict.get(b"ColorSpace").ok().and_then(|v| resolve(&self.doc, v)) else {
            return if is_stencil {
                ColorSpace::Gray
            } else {
                ColorSpace::Other("none".into())
            };
        };
        match value {
            Object::Name(name) => device_colorspace(name),
            Object::Array(items) => {
                let family = items.first().and_then(|f| f.as_name().ok()).unwrap_or_default();
                match family {
                    b"ICCBased" => {
                        let Some(Object::Reference(profile)) = items.get(1) else {
                            return ColorSpace::Other("ICCBased".into());
                        };
                        let components = self
                            .doc
                            .get_object(*profile)
                            .ok()
                            .and_then(|o| o.as_stream().ok())
                            .and_then(|s| self.integer(&s.dict, b"N"))
                            .unwrap_or(0);
                        match u8::try_from(components) {
                            Ok(n @ (1 | 3 | 4)) => ColorSpace::Icc {
                                components: n,
                                profile: ObjectRef::from(*profile),
                            },
                            _ => ColorSpace::Other("ICCBased".into()),
                        }
                    }
                    b"CalRGB" => ColorSpace::Rgb,
                    b"CalGray" => ColorSpace::Gray,
                    other => ColorSpace::Other(String::from_utf8_lossy(other).into_owned()),
                }
            }
            _ => ColorSpace::Other("unknown".into()),
        }
    }
}

fn device_colorspace(name: &[u8]) -> ColorSpace {
    match name {
        b"DeviceGray" | b"G" => ColorSpace::Gray,
        b"DeviceRGB" | b"RGB" => ColorSpace::Rgb,
        b"DeviceCMYK" | b"CMYK" => ColorSpace::Cmyk,
        other => ColorSpace::Other(String::from_utf8_lossy(other).into_owned()),
    }
}

fn filter_of(dict: &Dictionary) -> Option<StreamFilter> {
    match dict.get(b"Filter").ok()? {
        Object::Name(name) => Some(StreamFilter::from_name(&String::from_utf8_lossy(name))),
        Object::Array(items) => {
            let names: Vec<String> = items
                .iter()
                .filter_map(|o| o.as_name().ok())
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .collect();
            match names.as_slice() {
                [] => None,
                [single] => Some(StreamFilter::from_name(single)),
                chain => Some(StreamFilter::Other(chain.join("+"))),
            }
        }
        _ => None,
    }
}

fn library(e: lopdf::Error) -> ObjectGraphError {
    ObjectGraphError::Library(e.to_string())
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(f64::from(*n)),
        _ => None,
    }
}

pub(crate) fn to_key_value(object: &Object) -> KeyValue {
    match object {
        Object::Null => KeyValue::Null,
        Object::Boolean(b) => KeyValue::Boolean(*b),
        Object::Integer(n) => KeyValue::Integer(*n),
        Object::Real(n) => KeyValue::Real(f64::from(*n)),
        Object::Name(name) => KeyValue::Name(String::from_utf8_lossy(name).into_owned()),
        Object::String(bytes, _) => KeyValue::String(bytes.clone()),
        Object::Reference(id) => KeyValue::Reference(ObjectRef::from(*id)),
        Object::Array(items) => KeyValue::Array(items.iter().map(to_key_value).collect()),
        Object::Dictionary(dict) => KeyValue::Dictionary(
            dict.iter()
                .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), to_key_value(v)))
                .collect(),
        ),
        Object::Stream(_) => KeyValue::Opaque("stream".into()),
    }
}

pub(crate) fn to_object(value: &KeyValue) -> Result<Object> {
    Ok(match value {
        KeyValue::Null => Object::Null,
        KeyValue::Boolean(b) => Object::Boolean(*b),
        KeyValue::Integer(n) => Object::Integer(*n),
        KeyValue::Real(n) => Object::Real(*n as _),
        KeyValue::Name(name) => Object::Name(name.clone().into_bytes()),
        KeyValue::String(bytes) => Object::String(bytes.clone(), lopdf::StringFormat::Literal),
        KeyValue::Reference(r) => Object::Reference((*r).into()),
        KeyValue::Array(items) => Object::Array(items.iter().map(to_object).collect::<Result<_>>()?),
        KeyValue::Dictionary(entries) => {
            let mut dict = Dictionary::new();
            for (k, v) in entries {
                dict.set(k.as_str(), to_object(v)?);
            }
            Object::Dictionary(dict)
        }
        KeyValue::Opaque(what) => {
            return Err(ObjectGraphError::Malformed(format!("cannot write opaque {what}")));
        }
    })
}

impl ObjectGraph for LopdfGraph {
    fn pages(&self) -> Result<Vec<PageInfo>> {
        let mut pages = Vec::new();
        for (page_number, id) in self.doc.get_pages() {
            let dict = self
                .doc
                .get_object(id)
                .and_then(Object::as_dict)
                .map_err(|_| ObjectGraphError::Malformed(format!("page {page_number} is not a dictionary")))?;
            let visible = inherited(&self.doc, dict, b"CropBox")
                .or_else(|| inherited(&self.doc, dict, b"MediaBox"))
                .and_then(|b| b.as_array().ok())
                .map(|items| items.iter().filter_map(number).collect::<Vec<f64>>());
            let (width, height) = match visible.as_deref() {
                Some([x0, y0, x1, y1]) => ((x1 - x0).abs(), (y1 - y0).abs()),
                _ => {
                    warn!("page {page_number} has no usable MediaBox; assuming US Letter");
                    DEFAULT_PAGE_SIZE
                }
            };
            pages.push(PageInfo {
                number: page_number,
                id: ObjectRef::from(id),
                width,
                height,
            });
        }
        Ok(pages)
    }

    fn image_bindings(&self, page: &PageInfo) -> Result<Vec<PageResourceBinding>> {
        let page_id: ObjectId = page.id.into();
        self.doc
            .get_object(page_id)
            .map_err(|_| ObjectGraphError::InvalidObject(page.id))?;

        let found = scan_placements(&self.doc, page_id);
        let mut cache = self.bindings.borrow_mut();
        let mut bindings = Vec::with_capacity(found.len());
        for image in found {
            let paths = cache.entry(image.image).or_default();
            if !paths.iter().any(|p| p.page == page_id && p.names == image.path) {
                paths.push(BindingPath {
                    page: page_id,
                    page_number: page.number,
                    names: image.path.clone(),
                });
            }
            bindings.push(PageResourceBinding {
                page: page.number,
                name: image.display_name(),
                image: image.image,
                placement: image.placement,
            });
        }
        Ok(bindings)
    }

    fn image_object(&self, id: ObjectRef) -> Result<ImageObject> {
        let stream = self.stream(id)?;
        if !is_image(stream) {
            return Err(ObjectGraphError::Malformed(format!("{id} is not an image XObject")));
        }
        let dict = &stream.dict;
        let dimension = |key: &[u8]| {
            self.integer(dict, key)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    ObjectGraphError::Malformed(format!(
                        "{id} has no valid /{}",
                        String::from_utf8_lossy(key)
                    ))
                })
        };
        let width = dimension(b"Width")?;
        let height = dimension(b"Height")?;
        let is_stencil = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
        let default_bpc = if is_stencil { 1 } else { 8 };
        let bits_per_component = self
            .integer(dict, b"BitsPerComponent")
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(default_bpc);
        let soft_mask = match dict.get(b"SMask") {
            Ok(Object::Reference(r)) => Some(ObjectRef::from(*r)),
            _ => None,
        };

        Ok(ImageObject {
            id,
            width,
            height,
            colorspace: self.colorspace(dict, is_stencil),
            bits_per_component,
            filter: filter_of(dict),
            soft_mask,
            is_stencil,
            encoded_len: stream.content.len(),
        })
    }

    fn read_stream(&self, id: ObjectRef) -> Result<Vec<u8>> {
        Ok(self.stream(id)?.content.clone())
    }

    fn read_stream_decoded(&self, id: ObjectRef) -> Result<Vec<u8>> {
        let stream = self.stream(id)?;
        match stream.dict.get(b"Filter") {
            Err(_) => Ok(stream.content.clone()),
            // lopdf refuses to decompress image streams, so plain Flate is inflated here
            Ok(Object::Name(name))
                if name.as_slice() == b"FlateDecode" && !stream.dict.has(b"DecodeParms") =>
            {
                let mut out = Vec::new();
                ZlibDecoder::new(stream.content.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| ObjectGraphError::Library(format!("{id}: Flate stream: {e}")))?;
                Ok(out)
            }
            Ok(_) => stream.decompressed_content().map_err(library),
        }
    }

    fn read_key(&self, id: ObjectRef, key: &str) -> Result<Option<KeyValue>> {
        let dict = self.dict(id)?;
        Ok(match dict.get(key.as_bytes()) {
            Ok(Object::Null) | Err(_) => None,
            Ok(value) => Some(to_key_value(value)),
        })
    }

    fn write_key(&mut self, id: ObjectRef, key: &str, value: KeyValue) -> Result<()> {
        self.ensure_open()?;
        let object = to_object(&value)?;
        let dict = self.dict_mut(id)?;
        if value.is_null() {
            dict.remove(key.as_bytes());
        } else {
            dict.set(key, object);
        }
        Ok(())
    }

    fn replace_stream(
        &mut self,
        id: ObjectRef,
        bytes: Vec<u8>,
        filter: Option<&StreamFilter>,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = self.stream_mut(id)?;
        stream.set_content(bytes);
        match filter {
            Some(f) => stream.dict.set("Filter", Object::Name(f.pdf_name().as_bytes().to_vec())),
            None => {
                stream.dict.remove(b"Filter");
            }
        }
        Ok(())
    }

    fn create_object(&mut self, dict: Vec<(String, KeyValue)>, stream: Vec<u8>) -> Result<ObjectRef> {
        self.ensure_open()?;
        let mut d = Dictionary::new();
        for (key, value) in &dict {
            if !value.is_null() {
                d.set(key.as_str(), to_object(value)?);
            }
        }
        let id = self.doc.add_object(Object::Stream(Stream::new(d, stream)));
        Ok(ObjectRef::from(id))
    }

    fn propagate(&mut self, id: ObjectRef) -> Result<()> {
        self.ensure_open()?;
        let stream = self.stream_mut(id)?;
        let len = stream.content.len() as i64;
        stream.dict.set("Length", Object::Integer(len));

        let mask = match stream.dict.get(b"SMask") {
            Ok(Object::Reference(r)) => Some(*r),
            _ => None,
        };
        if let Some(mask) = mask {
            let present = self
                .doc
                .get_object(mask)
                .ok()
                .and_then(|o| o.as_stream().ok())
                .is_some();
            if !present {
                return Err(ObjectGraphError::Propagation {
                    id,
                    reason: format!("soft mask {} is missing", ObjectRef::from(mask)),
                });
            }
        }

        let paths = self.bindings.borrow().get(&id).cloned().unwrap_or_default();
        for path in &paths {
            if self.resolve_path(path) != Some(id.into()) {
                return Err(ObjectGraphError::Propagation {
                    id,
                    reason: format!(
                        "binding {} on page {} no longer resolves",
                        path.names.join("/"),
                        path.page_number
                    ),
                });
            }
        }
        debug!("{id} propagated to {} binding(s)", paths.len());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
