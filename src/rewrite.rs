//! Stream rewrite protocol.
//!
//! Replaces one image's encoded bytes in place, so every page binding that
//! aliases the object observes the new data, and keeps `/SMask` linkage
//! intact. The sequence is:
//!
//! 1. Snapshot the stream bytes and every dictionary key the rewrite touches.
//! 2. Replace the stream and filter; rewrite geometry and colour keys.
//! 3. Point `/SMask` at a newly created mask object, or write the original
//!    reference back. Some libraries drop dependent keys on a stream
//!    replacement, so the write-back is unconditional.
//! 4. Propagate the change through the graph's page-resource cache.
//! 5. Re-read `/SMask` and the stream and check both.
//!
//! A failure in any step restores the snapshot and propagates it again. A rollback that itself fails
//! is reported separately; the orchestrator treats it as fatal.

use crate::candidates::{OptimizationCandidate, SoftMaskCandidate};
use crate::graph::{ObjectGraph, ObjectGraphError};
use crate::types::{ImageObject, KeyValue, ObjectRef};
use log::{debug, error, warn};

/// Keys written by a rewrite and therefore restored by a rollback.
const SNAPSHOT_KEYS: [&str; 8] = [
    "Filter",
    "DecodeParms",
    "Width",
    "Height",
    "ColorSpace",
    "BitsPerComponent",
    "Decode",
    "SMask",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    /// The new bytes are in place; `soft_mask` is the image's `/SMask` now.
    Committed { soft_mask: Option<ObjectRef> },
    /// Nothing visible changed.
    RolledBack { error: ObjectGraphError },
    /// The rewrite failed and so did the restore. The image may be inconsistent.
    RollbackFailed {
        error: ObjectGraphError,
        rollback_error: ObjectGraphError,
    },
}

/// Pre-rewrite state of one image object.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: ObjectRef,
    pub bytes: Vec<u8>,
    pub keys: Vec<(&'static str, Option<KeyValue>)>,
}

impl Snapshot {
    pub fn take(graph: &impl ObjectGraph, id: ObjectRef) -> Result<Self, ObjectGraphError> {
        let bytes = graph.read_stream(id)?;
        let keys = SNAPSHOT_KEYS
            .iter()
            .map(|&key| Ok((key, graph.read_key(id, key)?)))
            .collect::<Result<Vec<_>, ObjectGraphError>>()?;
        Ok(Self { id, bytes, keys })
    }

    pub fn value(&self, key: &str) -> Option<&KeyValue> {
        self.keys
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn soft_mask(&self) -> Option<ObjectRef> {
        self.value("SMask").and_then(KeyValue::as_reference)
    }

    /// Put the bytes and keys back, propagate them, then check the result.
    pub fn restore(&self, graph: &mut impl ObjectGraph) -> Result<(), ObjectGraphError> {
        graph.replace_stream(self.id, self.bytes.clone(), None)?;
        for (key, value) in &self.keys {
            graph.write_key(self.id, key, value.clone().unwrap_or(KeyValue::Null))?;
        }
        graph.propagate(self.id)?;
        verify(graph, self.id, &self.bytes, self.soft_mask())
    }
}

/// Commit `candidate` as the new content of `image`, or leave it untouched.
pub fn rewrite(
    graph: &mut impl ObjectGraph,
    image: &ImageObject,
    candidate: &OptimizationCandidate,
) -> RewriteOutcome {
    if !graph.is_open() {
        return RewriteOutcome::RolledBack {
            error: ObjectGraphError::Closed,
        };
    }
    let snapshot = match Snapshot::take(graph, image.id) {
        Ok(snapshot) => snapshot,
        Err(error) => return RewriteOutcome::RolledBack { error },
    };

    match apply(graph, image, candidate, &snapshot) {
        Ok(soft_mask) => {
            debug!(
                "{}: committed {} bytes, soft mask {}",
                image.id,
                candidate.encoded.bytes.len(),
                describe(soft_mask)
            );
            RewriteOutcome::Committed { soft_mask }
        }
        Err(err) => {
            warn!("{}: rewrite failed ({err}); rolling back", image.id);
            match snapshot.restore(graph) {
                Ok(()) => RewriteOutcome::RolledBack { error: err },
                Err(rollback_error) => {
                    error!("{}: rollback failed: {rollback_error}", image.id);
                    RewriteOutcome::RollbackFailed {
                        error: err,
                        rollback_error,
                    }
                }
            }
        }
    }
}

fn apply(
    graph: &mut impl ObjectGraph,
    image: &ImageObject,
    candidate: &OptimizationCandidate,
    snapshot: &Snapshot,
) -> Result<Option<ObjectRef>, ObjectGraphError> {
    let id = image.id;
    let enc = &candidate.encoded;

    graph.replace_stream(id, enc.bytes.clone(), Some(&enc.filter))?;
    graph.write_key(id, "Width", KeyValue::Integer(i64::from(enc.width)))?;
    graph.write_key(id, "Height", KeyValue::Integer(i64::from(enc.height)))?;
    graph.write_key(id, "ColorSpace", KeyValue::name(&enc.colorspace.to_string()))?;
    graph.write_key(id, "BitsPerComponent", KeyValue::Integer(8))?;
    graph.write_key(id, "DecodeParms", KeyValue::Null)?;
    // candidate pixels were decoded through the old /Decode already
    graph.write_key(id, "Decode", KeyValue::Null)?;

    let soft_mask = match &candidate.soft_mask {
        Some(mask) => {
            let mask_id = graph.create_object(mask_dictionary(mask), mask.bytes.clone())?;
            graph.write_key(id, "SMask", KeyValue::Reference(mask_id))?;
            Some(mask_id)
        }
        None => {
            let original = snapshot.soft_mask();
            if let Some(mask_id) = original {
                graph.write_key(id, "SMask", KeyValue::Reference(mask_id))?;
            }
            original
        }
    };

    graph.propagate(id)?;
    verify(graph, id, &enc.bytes, soft_mask)?;
    Ok(soft_mask)
}

fn mask_dictionary(mask: &SoftMaskCandidate) -> Vec<(String, KeyValue)> {
    vec![
        ("Type".into(), KeyValue::name("XObject")),
        ("Subtype".into(), KeyValue::name("Image")),
        ("Width".into(), KeyValue::Integer(i64::from(mask.width))),
        ("Height".into(), KeyValue::Integer(i64::from(mask.height))),
        ("ColorSpace".into(), KeyValue::name("DeviceGray")),
        ("BitsPerComponent".into(), KeyValue::Integer(8)),
        ("Filter".into(), KeyValue::name(mask.filter.pdf_name())),
    ]
}

fn verify(
    graph: &impl ObjectGraph,
    id: ObjectRef,
    bytes: &[u8],
    soft_mask: Option<ObjectRef>,
) -> Result<(), ObjectGraphError> {
    let observed = graph.read_key(id, "SMask")?.and_then(|v| v.as_reference());
    if observed != soft_mask {
        return Err(ObjectGraphError::Propagation {
            id,
            reason: format!(
                "soft mask reads back as {}, expected {}",
                describe(observed),
                describe(soft_mask)
            ),
        });
    }
    if let Some(mask) = soft_mask {
        graph.read_stream(mask)?;
    }
    if graph.read_stream(id)? != bytes {
        return Err(ObjectGraphError::Propagation {
            id,
            reason: "stream reads back with different bytes".into(),
        });
    }
    Ok(())
}

fn describe(r: Option<ObjectRef>) -> String {
    r.map_or_else(|| "none".to_string(), |r| r.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::{CandidatePlan, SourceImage, realize};
    use crate::graph::LopdfGraph;
    use crate::graph::tests::FaultyGraph;
    use crate::imaging::{Quality, RustCodec, TargetFormat};
    use crate::test_helpers::*;
    use crate::types::StreamFilter;
    use image::{DynamicImage, GrayImage, Luma, RgbImage};
    use lopdf::Object;

    const FULL: [f64; 6] = [200.0, 0.0, 0.0, 200.0, 50.0, 50.0];

    struct Fixture {
        graph: LopdfGraph,
        image: ObjectRef,
        mask: Option<ObjectRef>,
    }

    fn fixture(with_mask: bool) -> Fixture {
        let mut b = PdfBuilder::new();
        let p1 = b.page(612.0, 792.0);
        let p2 = b.page(612.0, 792.0);
        let img = b.rgb_image(96, 64, gradient);
        let mask = with_mask.then(|| b.soft_mask(img, 96, 64, |x, _| if x < 48 { 0 } else { 255 }));
        b.set_key(
            img,
            "DecodeParms",
            Object::Dictionary(lopdf::dictionary! { "Columns" => 96i64 }),
        );
        b.place(p1, "Im0", img, FULL);
        b.place(p2, "Shared", img, FULL);
        let graph = b.into_graph();
        for page in graph.pages().unwrap() {
            graph.image_bindings(&page).unwrap();
        }
        Fixture {
            graph,
            image: oref(img),
            mask: mask.map(oref),
        }
    }

    fn candidate(size: (u32, u32), alpha: bool) -> OptimizationCandidate {
        let color = DynamicImage::ImageRgb8(RgbImage::from_fn(96, 64, |x, y| image::Rgb(gradient(x, y))));
        let source = SourceImage {
            color,
            alpha: alpha.then(|| GrayImage::from_fn(96, 64, |x, _| Luma([if x < 48 { 0 } else { 255 }]))),
        };
        let plan = CandidatePlan {
            width: size.0,
            height: size.1,
            quality: Quality::new(60),
            format: TargetFormat::Jpeg,
            expected_fidelity: 0.5,
        };
        realize(0, &plan, &source, &RustCodec::new()).unwrap()
    }

    fn image_of(graph: &impl ObjectGraph, id: ObjectRef) -> ImageObject {
        graph.image_object(id).unwrap()
    }

    // =========================================================================
    // Commit
    // =========================================================================

    #[test]
    fn commit_replaces_bytes_and_geometry() {
        let Fixture { mut graph, image, .. } = fixture(false);
        let before = image_of(&graph, image);
        let cand = candidate((48, 32), false);

        let outcome = rewrite(&mut graph, &before, &cand);
        assert_eq!(outcome, RewriteOutcome::Committed { soft_mask: None });

        let after = image_of(&graph, image);
        assert_eq!((after.width, after.height), (48, 32));
        assert_eq!(after.filter, Some(StreamFilter::Dct));
        assert_eq!(graph.read_stream(image).unwrap(), cand.encoded.bytes);
        assert_eq!(graph.read_key(image, "DecodeParms").unwrap(), None);
    }

    #[test]
    fn every_alias_observes_the_single_rewrite() {
        let Fixture { mut graph, image, .. } = fixture(false);
        let before = image_of(&graph, image);
        rewrite(&mut graph, &before, &candidate((96, 64), false));

        let mut seen = Vec::new();
        for page in graph.pages().unwrap() {
            for binding in graph.image_bindings(&page).unwrap() {
                seen.push(binding.image);
            }
        }
        assert_eq!(seen, vec![image, image]);
        assert_eq!(image_of(&graph, image).filter, Some(StreamFilter::Dct));
    }

    #[test]
    fn new_soft_mask_replaces_the_old_reference() {
        let Fixture { mut graph, image, mask } = fixture(true);
        let before = image_of(&graph, image);
        let cand = candidate((48, 32), true);

        let RewriteOutcome::Committed { soft_mask: Some(new_mask) } = rewrite(&mut graph, &before, &cand) else {
            panic!("expected a commit with a soft mask");
        };
        assert_ne!(Some(new_mask), mask);
        let mask_obj = image_of(&graph, new_mask);
        assert_eq!((mask_obj.width, mask_obj.height), (48, 32));
        assert_eq!(mask_obj.filter, Some(StreamFilter::Flate));
        assert_eq!(image_of(&graph, image).soft_mask, Some(new_mask));
    }

    #[test]
    fn original_soft_mask_is_reaffirmed_when_the_library_drops_it() {
        let Fixture { graph, image, mask } = fixture(true);
        let mut graph = FaultyGraph::new(graph);
        graph.clear_smask_on_replace = true;
        let before = image_of(&graph, image);

        let outcome = rewrite(&mut graph, &before, &candidate((96, 64), false));
        assert_eq!(outcome, RewriteOutcome::Committed { soft_mask: mask });
        assert_eq!(image_of(&graph, image).soft_mask, mask);
    }

    #[test]
    fn decode_array_is_dropped_even_when_components_match() {
        let Fixture { mut graph, image, .. } = fixture(false);
        graph
            .write_key(
                image,
                "Decode",
                KeyValue::Array((0..6).map(|i| KeyValue::Integer(1 - i % 2)).collect()),
            )
            .unwrap();
        let before = image_of(&graph, image);

        let outcome = rewrite(&mut graph, &before, &candidate((96, 64), false));
        assert_eq!(outcome, RewriteOutcome::Committed { soft_mask: None });
        assert_eq!(graph.read_key(image, "Decode").unwrap(), None);
    }

    #[test]
    fn decode_array_is_dropped_when_component_count_changes() {
        let mut b = PdfBuilder::new();
        let page = b.page(612.0, 792.0);
        let img = b.cmyk_image(64, 64, |x, _| [x as u8, 0, 0, 0]);
        b.set_key(
            img,
            "Decode",
            Object::Array((0..8).map(|i| Object::Integer(i % 2)).collect()),
        );
        b.place(page, "Im0", img, FULL);
        let mut graph = b.into_graph();
        let before = image_of(&graph, oref(img));

        let color = DynamicImage::new_rgb8(64, 64);
        let source = SourceImage { color, alpha: None };
        let plan = CandidatePlan {
            width: 64,
            height: 64,
            quality: Quality::new(50),
            format: TargetFormat::Jpeg,
            expected_fidelity: 0.5,
        };
        let cand = realize(0, &plan, &source, &RustCodec::new()).unwrap();
        assert!(matches!(
            rewrite(&mut graph, &before, &cand),
            RewriteOutcome::Committed { .. }
        ));
        assert_eq!(graph.read_key(oref(img), "Decode").unwrap(), None);
        assert_eq!(
            graph.read_key(oref(img), "ColorSpace").unwrap(),
            Some(KeyValue::name("DeviceRGB"))
        );
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    #[test]
    fn propagate_failure_restores_the_snapshot_exactly() {
        let Fixture { graph, image, mask } = fixture(true);
        let mut graph = FaultyGraph::failing_propagate(graph, image);
        let before = image_of(&graph, image);
        let snapshot = Snapshot::take(&graph, image).unwrap();

        let outcome = rewrite(&mut graph, &before, &candidate((48, 32), true));
        assert!(matches!(
            outcome,
            RewriteOutcome::RolledBack {
                error: ObjectGraphError::Propagation { .. }
            }
        ));
        assert_eq!(Snapshot::take(&graph, image).unwrap(), snapshot);
        assert_eq!(image_of(&graph, image).soft_mask, mask);
    }

    #[test]
    fn restored_snapshot_is_propagated() {
        let Fixture { graph, image, .. } = fixture(true);
        let mut graph = FaultyGraph::failing_propagate(graph, image);
        let before = image_of(&graph, image);

        let outcome = rewrite(&mut graph, &before, &candidate((48, 32), true));
        assert!(matches!(outcome, RewriteOutcome::RolledBack { .. }));
        assert_eq!(graph.propagated, vec![image, image]);
    }

    #[test]
    fn failed_propagation_of_the_restore_is_a_rollback_failure() {
        let Fixture { graph, image, .. } = fixture(true);
        let mut graph = FaultyGraph::failing_propagate_times(graph, image, 2);
        let before = image_of(&graph, image);

        let outcome = rewrite(&mut graph, &before, &candidate((48, 32), true));
        assert!(matches!(
            outcome,
            RewriteOutcome::RollbackFailed {
                error: ObjectGraphError::Propagation { .. },
                rollback_error: ObjectGraphError::Propagation { .. },
            }
        ));
    }

    #[test]
    fn rollback_failure_is_reported() {
        let Fixture { graph, image, .. } = fixture(true);
        let mut graph = FaultyGraph::failing_propagate(graph, image);
        graph.close_on_failure = true;
        let before = image_of(&graph, image);

        let outcome = rewrite(&mut graph, &before, &candidate((48, 32), true));
        assert!(matches!(
            outcome,
            RewriteOutcome::RollbackFailed {
                error: ObjectGraphError::Closed,
                rollback_error: ObjectGraphError::Closed,
            }
        ));
    }

    #[test]
    fn closed_document_is_left_untouched() {
        let Fixture {
            mut graph, image, ..
        } = fixture(false);
        let snapshot = Snapshot::take(&graph, image).unwrap();
        let before = image_of(&graph, image);
        graph.close();

        let outcome = rewrite(&mut graph, &before, &candidate((48, 32), false));
        assert_eq!(
            outcome,
            RewriteOutcome::RolledBack {
                error: ObjectGraphError::Closed
            }
        );
        assert_eq!(Snapshot::take(&graph, image).unwrap(), snapshot);
    }

    #[test]
    fn snapshot_reads_absent_keys_as_none() {
        let Fixture { graph, image, .. } = fixture(false);
        let snapshot = Snapshot::take(&graph, image).unwrap();
        assert_eq!(snapshot.soft_mask(), None);
        assert_eq!(snapshot.value("Decode"), None);
        assert_eq!(snapshot.value("Width"), Some(&KeyValue::Integer(96)));
    }
}
