//! Object graph adapter: the only way the core touches the document.
//!
//! The [`ObjectGraph`] trait is a thin capability interface over a PDF
//! library: read a stream and its dictionary keys, replace a stream, write
//! keys, create objects, and force a change to propagate to every page that
//! references it. The production implementation is [`LopdfGraph`]; tests wrap
//! it to inject failures.
//!
//! | Call | Used by |
//! |---|---|
//! | `pages`, `image_bindings`, `image_object` | orchestrator discovery |
//! | `read_stream`, `read_key`, `read_stream_decoded` | orchestrator inputs, rewrite snapshot |
//! | `replace_stream`, `write_key`, `create_object` | rewrite protocol steps 2–3 |
//! | `propagate` | rewrite protocol step 4 |

mod content;
mod lopdf_graph;

pub use content::{Placements, scan_placements};
pub use lopdf_graph::LopdfGraph;

use crate::types::{ImageObject, KeyValue, ObjectRef, PageInfo, PageResourceBinding, StreamFilter};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectGraphError {
    #[error("object {0} does not exist")]
    InvalidObject(ObjectRef),
    #[error("object {0} is not a stream")]
    NotAStream(ObjectRef),
    #[error("document is finalized or closed")]
    Closed,
    #[error("change to {id} did not propagate: {reason}")]
    Propagation { id: ObjectRef, reason: String },
    #[error("malformed document structure: {0}")]
    Malformed(String),
    #[error("PDF library error: {0}")]
    Library(String),
}

impl ObjectGraphError {
    /// The document handle itself is gone; nothing further can be written.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

pub type Result<T> = std::result::Result<T, ObjectGraphError>;

/// Mutable view of a document's indirect objects.
///
/// All calls fail with [`ObjectGraphError`] on an unknown id, and every
/// mutating call fails with [`ObjectGraphError::Closed`] once the document is
/// finalized.
pub trait ObjectGraph {
    /// Pages in document order.
    fn pages(&self) -> Result<Vec<PageInfo>>;

    /// Image XObjects bound on a page, with their largest placement.
    fn image_bindings(&self, page: &PageInfo) -> Result<Vec<PageResourceBinding>>;

    /// Image metadata from the XObject dictionary.
    fn image_object(&self, id: ObjectRef) -> Result<ImageObject>;

    /// Encoded (still filtered) stream bytes.
    fn read_stream(&self, id: ObjectRef) -> Result<Vec<u8>>;

    /// Stream bytes with the stream's filters removed.
    fn read_stream_decoded(&self, id: ObjectRef) -> Result<Vec<u8>>;

    /// Dictionary value for `key`, `None` if absent or null.
    fn read_key(&self, id: ObjectRef, key: &str) -> Result<Option<KeyValue>>;

    /// Set `key`; [`KeyValue::Null`] removes it.
    fn write_key(&mut self, id: ObjectRef, key: &str, value: KeyValue) -> Result<()>;

    /// Replace stream bytes and filter. `None` removes the filter.
    fn replace_stream(
        &mut self,
        id: ObjectRef,
        bytes: Vec<u8>,
        filter: Option<&StreamFilter>,
    ) -> Result<()>;

    /// Add a new stream object and return its reference.
    fn create_object(&mut self, dict: Vec<(String, KeyValue)>, stream: Vec<u8>)
    -> Result<ObjectRef>;

    /// Make every page-level reader observe the current state of `id`.
    fn propagate(&mut self, id: ObjectRef) -> Result<()>;

    /// False once the document is finalized or closed.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Wraps a graph and injects failures into selected calls.
    pub struct FaultyGraph<G> {
        pub inner: G,
        /// `propagate` fails this many more times for each object.
        pub fail_propagate: HashMap<ObjectRef, u32>,
        /// Every `propagate` call, in order, failed or not.
        pub propagated: Vec<ObjectRef>,
        /// `replace_stream` silently drops `/SMask`, like some libraries do.
        pub clear_smask_on_replace: bool,
        /// An injected propagate failure also closes the document.
        pub close_on_failure: bool,
        closed: bool,
    }

    impl<G: ObjectGraph> FaultyGraph<G> {
        pub fn new(inner: G) -> Self {
            Self {
                inner,
                fail_propagate: HashMap::new(),
                propagated: Vec::new(),
                clear_smask_on_replace: false,
                close_on_failure: false,
                closed: false,
            }
        }

        /// The first `propagate` of `id` fails; later ones pass through.
        pub fn failing_propagate(inner: G, id: ObjectRef) -> Self {
            Self::failing_propagate_times(inner, id, 1)
        }

        pub fn failing_propagate_times(inner: G, id: ObjectRef, times: u32) -> Self {
            let mut graph = Self::new(inner);
            graph.fail_propagate.insert(id, times);
            graph
        }

        fn check_open(&self) -> Result<()> {
            if self.closed {
                Err(ObjectGraphError::Closed)
            } else {
                Ok(())
            }
        }
    }

    impl<G: ObjectGraph> ObjectGraph for FaultyGraph<G> {
        fn pages(&self) -> Result<Vec<PageInfo>> {
            self.inner.pages()
        }

        fn image_bindings(&self, page: &PageInfo) -> Result<Vec<PageResourceBinding>> {
            self.inner.image_bindings(page)
        }

        fn image_object(&self, id: ObjectRef) -> Result<ImageObject> {
            self.inner.image_object(id)
        }

        fn read_stream(&self, id: ObjectRef) -> Result<Vec<u8>> {
            self.inner.read_stream(id)
        }

        fn read_stream_decoded(&self, id: ObjectRef) -> Result<Vec<u8>> {
            self.inner.read_stream_decoded(id)
        }

        fn read_key(&self, id: ObjectRef, key: &str) -> Result<Option<KeyValue>> {
            self.inner.read_key(id, key)
        }

        fn write_key(&mut self, id: ObjectRef, key: &str, value: KeyValue) -> Result<()> {
            self.check_open()?;
            self.inner.write_key(id, key, value)
        }

        fn replace_stream(
            &mut self,
            id: ObjectRef,
            bytes: Vec<u8>,
            filter: Option<&StreamFilter>,
        ) -> Result<()> {
            self.check_open()?;
            self.inner.replace_stream(id, bytes, filter)?;
            if self.clear_smask_on_replace {
                self.inner.write_key(id, "SMask", KeyValue::Null)?;
            }
            Ok(())
        }

        fn create_object(
            &mut self,
            dict: Vec<(String, KeyValue)>,
            stream: Vec<u8>,
        ) -> Result<ObjectRef> {
            self.check_open()?;
            self.inner.create_object(dict, stream)
        }

        fn propagate(&mut self, id: ObjectRef) -> Result<()> {
            self.check_open()?;
            self.propagated.push(id);
            if let Some(remaining) = self.fail_propagate.get_mut(&id).filter(|n| **n > 0) {
                *remaining -= 1;
                if self.close_on_failure {
                    self.closed = true;
                    return Err(ObjectGraphError::Closed);
                }
                return Err(ObjectGraphError::Propagation {
                    id,
                    reason: "injected failure".into(),
                });
            }
            self.inner.propagate(id)
        }

        fn is_open(&self) -> bool {
            !self.closed && self.inner.is_open()
        }
    }
}
