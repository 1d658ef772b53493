//! Content-stream scanning: which images a page binds and where it paints them.
//!
//! Walks the page's `XObject` resources (and those of any Form XObject the
//! page paints), tracking the current transformation matrix through
//! `q`/`Q`/`cm` so each `Do` of an image yields its on-page placement. An
//! image painted several times keeps its largest placement; an image that is
//! bound but never painted has no placement.

use crate::types::{ObjectRef, Transform};
use log::warn;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;

/// Guard against reference cycles and absurdly deep page trees.
const MAX_HOPS: usize = 64;

/// One image reachable from a page, addressed by its resource path.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundImage {
    /// XObject names from the page resources down to the image, e.g. `["Fm0", "Im1"]`.
    pub path: Vec<String>,
    pub image: ObjectRef,
    pub placement: Option<Transform>,
}

impl FoundImage {
    pub fn display_name(&self) -> String {
        self.path.join("/")
    }
}

/// All images found on one page.
pub type Placements = Vec<FoundImage>;

/// Follow references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_HOPS {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

/// Look up a page attribute, walking `/Parent` for inheritable keys.
pub(crate) fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut dict = page;
    for _ in 0..MAX_HOPS {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?;
        dict = resolve(doc, parent)?.as_dict().ok()?;
    }
    None
}

/// Stream content with filters removed where lopdf knows how.
pub(crate) fn stream_bytes(stream: &Stream) -> Vec<u8> {
    if stream.dict.has(b"Filter") {
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone())
    } else {
        stream.content.clone()
    }
}

pub(crate) fn is_image(stream: &Stream) -> bool {
    subtype(stream) == Some(b"Image".as_slice())
}

fn is_form(stream: &Stream) -> bool {
    subtype(stream) == Some(b"Form".as_slice())
}

fn subtype(stream: &Stream) -> Option<&[u8]> {
    stream.dict.get(b"Subtype").ok()?.as_name().ok()
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(f64::from(*n)),
        _ => None,
    }
}

pub(crate) fn matrix_from(object: Option<&Object>) -> Option<Transform> {
    let values: Vec<f64> = object?.as_array().ok()?.iter().filter_map(number).collect();
    match values.as_slice() {
        [a, b, c, d, e, f] => Some(Transform::new(*a, *b, *c, *d, *e, *f)),
        _ => None,
    }
}

/// The `/XObject` dictionary of a resources dictionary, resolved.
pub(crate) fn xobject_dict<'a>(doc: &'a Document, resources: Option<&'a Dictionary>) -> Option<&'a Dictionary> {
    let xobjects = resources?.get(b"XObject").ok()?;
    resolve(doc, xobjects)?.as_dict().ok()
}

/// Scan one page for image bindings and placements.
pub fn scan_placements(doc: &Document, page_id: ObjectId) -> Placements {
    let Ok(page) = doc.get_object(page_id).and_then(Object::as_dict) else {
        return Vec::new();
    };
    let resources = inherited(doc, page, b"Resources").and_then(|r| r.as_dict().ok());
    let content = doc.get_page_content(page_id).unwrap_or_default();

    let mut scanner = Scanner {
        doc,
        found: Vec::new(),
        visiting: HashSet::new(),
    };
    scanner.walk(&content, resources, Transform::IDENTITY, &[]);
    scanner.found
}

struct Scanner<'a> {
    doc: &'a Document,
    found: Vec<FoundImage>,
    visiting: HashSet<ObjectId>,
}

impl<'a> Scanner<'a> {
    fn walk(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        base: Transform,
        prefix: &[String],
    ) {
        let xobjects = xobject_dict(self.doc, resources);

        // Register every bound image first so unpainted ones are still reported.
        if let Some(xobjects) = xobjects {
            for (name, value) in xobjects.iter() {
                if let Object::Reference(id) = value {
                    if self.stream(*id).is_some_and(is_image) {
                        let path = child_path(prefix, name);
                        self.record(path, ObjectRef::from(*id), None);
                    }
                }
            }
        }

        let operations = match Content::decode(content) {
            Ok(decoded) => decoded.operations,
            Err(e) => {
                warn!("unreadable content stream ({e}); placements unknown");
                return;
            }
        };

        let mut stack = vec![base];
        for op in operations {
            match op.operator.as_str() {
                "q" => {
                    let top = *stack.last().unwrap_or(&base);
                    stack.push(top);
                }
                "Q" => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                "cm" => {
                    let values: Vec<f64> = op.operands.iter().filter_map(number).collect();
                    if let [a, b, c, d, e, f] = values.as_slice() {
                        let m = Transform::new(*a, *b, *c, *d, *e, *f);
                        if let Some(ctm) = stack.last_mut() {
                            *ctm = m.then(ctm);
                        }
                    }
                }
                "Do" => {
                    let ctm = *stack.last().unwrap_or(&base);
                    let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                        continue;
                    };
                    let Some(Object::Reference(id)) = xobjects.and_then(|x| x.get(name).ok())
                    else {
                        continue;
                    };
                    let Some(stream) = self.stream(*id) else {
                        continue;
                    };
                    if is_image(stream) {
                        self.record(child_path(prefix, name), ObjectRef::from(*id), Some(ctm));
                    } else if is_form(stream) && self.visiting.insert(*id) {
                        let form_matrix =
                            matrix_from(stream.dict.get(b"Matrix").ok()).unwrap_or(Transform::IDENTITY);
                        let form_resources = stream
                            .dict
                            .get(b"Resources")
                            .ok()
                            .and_then(|r| resolve(self.doc, r))
                            .and_then(|r| r.as_dict().ok())
                            .or(resources);
                        let form_content = stream_bytes(stream);
                        let path = child_path(prefix, name);
                        self.walk(&form_content, form_resources, form_matrix.then(&ctm), &path);
                        self.visiting.remove(id);
                    }
                }
                _ => {}
            }
        }
    }

    fn stream(&self, id: ObjectId) -> Option<&'a Stream> {
        self.doc.get_object(id).ok()?.as_stream().ok()
    }

    fn record(&mut self, path: Vec<String>, image: ObjectRef, placement: Option<Transform>) {
        match self.found.iter_mut().find(|f| f.path == path) {
            Some(existing) => {
                if let Some(new) = placement {
                    let replace = match existing.placement {
                        None => true,
                        Some(old) => area(&new) > area(&old),
                    };
                    if replace {
                        existing.placement = Some(new);
                    }
                }
            }
            None => self.found.push(FoundImage {
                path,
                image,
                placement,
            }),
        }
    }
}

fn area(t: &Transform) -> f64 {
    let a = t.displayed_area();
    if a.is_finite() { a } else { 0.0 }
}

fn child_path(prefix: &[String], name: &[u8]) -> Vec<String> {
    let mut path = prefix.to_vec();
    path.push(String::from_utf8_lossy(name).into_owned());
    path
}
