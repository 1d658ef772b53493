//! Optimization orchestrator.
//!
//! Walks every page, collects the image XObjects bound there and optimizes
//! each image object once, however many bindings alias it. Work runs in
//! batches of three phases:
//!
//! ```text
//! 1. Read      (sequential)  graph → Job          pre-filters, stream bytes, mask, ICC profile
//! 2. Evaluate  (rayon)       Job → Verdict        decode, classify, candidate ladder, quality gate
//! 3. Commit    (sequential)  Verdict → result     rewrite protocol through the graph
//! ```
//!
//! Only phases 1 and 3 touch the graph, and only from the calling thread.
//! Evaluation is pure pixel work and runs on the rayon pool. The wall-clock
//! budget is checked before each image is read, so an image that has been
//! read is always evaluated and, if it passes, committed.
//!
//! Per-image errors become [`OptimizationResult`]s. Only a closed document or
//! a failed rollback ends the run with an [`OptimizeError`].

use crate::candidates::{
    OptimizationCandidate, SourceImage, decoded_raster, plan_candidates, realize,
};
use crate::classify::{Classification, Strategy, Transparency, classify, merge};
use crate::config::OptimizeConfig;
use crate::graph::{ObjectGraph, ObjectGraphError};
use crate::imaging::{
    CodecError, ColorTransform, DecodeHint, DefaultCmykTransform, Pixels, Predictor, RasterCodec,
    RustCodec, effective_dpi,
};
use crate::quality::{OPAQUE_ALPHA, QualityReport, assess};
use crate::report::{DocumentReport, OptimizationResult, Outcome, Reason};
use crate::rewrite::{RewriteOutcome, rewrite};
use crate::types::{ColorSpace, ImageObject, KeyValue, ObjectRef, PageInfo, Transform};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("document was closed during optimization")]
    DocumentClosed,
    #[error("rollback of {image} failed, document may be inconsistent: {reason}")]
    RollbackFailed { image: ObjectRef, reason: String },
    #[error("cannot enumerate document: {0}")]
    Graph(#[from] ObjectGraphError),
}

/// One image object and every place it is painted.
#[derive(Debug, Clone)]
struct Target {
    id: ObjectRef,
    pages: Vec<u32>,
    placements: Vec<(PageInfo, Option<Transform>)>,
}

#[derive(Debug)]
struct MaskInput {
    image: ImageObject,
    bytes: Vec<u8>,
    predictor: Option<Predictor>,
    decode: Option<Vec<f64>>,
    /// Set for `/Matte` (pre-multiplied colour) or an unreadable `/Decode`;
    /// such a mask is never re-encoded.
    keep: bool,
}

/// Everything evaluation needs, read from the graph up front.
#[derive(Debug)]
struct Job {
    target: Target,
    image: ImageObject,
    bytes: Vec<u8>,
    predictor: Option<Predictor>,
    decode: Option<Vec<f64>>,
    profile: Option<Vec<u8>>,
    mask: Option<MaskInput>,
    /// Encoded size of the current soft mask, 0 if absent or unreadable.
    mask_len: usize,
    bytes_before: usize,
}

impl Job {
    fn result(&self, outcome: Outcome, reason: Reason) -> OptimizationResult {
        OptimizationResult::unchanged(
            self.image.id,
            self.target.pages.clone(),
            outcome,
            reason,
            self.bytes_before,
        )
    }

    fn failure(&self, reason: Reason, detail: String) -> OptimizationResult {
        OptimizationResult::failed(
            self.image.id,
            self.target.pages.clone(),
            reason,
            detail,
            self.bytes_before,
        )
    }

    /// Unsupported input is skipped; anything else is a failure.
    fn codec_result(&self, err: CodecError) -> OptimizationResult {
        if err.is_unsupported() {
            OptimizationResult {
                detail: Some(err.to_string()),
                ..self.result(Outcome::Skipped, Reason::UnsupportedEncoding)
            }
        } else {
            warn!("{}: {err}", self.image.id);
            self.failure(Reason::CodecError, err.to_string())
        }
    }
}

enum Prepared {
    Ready(Box<Job>),
    Done(OptimizationResult),
}

enum Step {
    Done(OptimizationResult),
    Evaluated(Box<Job>, Verdict),
}

enum Verdict {
    Commit {
        candidate: Box<OptimizationCandidate>,
        report: QualityReport,
        strategy: Strategy,
        bytes_after: usize,
    },
    Done(OptimizationResult),
}

/// Decoded source with its classification.
struct Analysis {
    source: SourceImage,
    classification: Classification,
    transparency: Transparency,
    dpi: Option<f64>,
}

/// Optimize with the built-in codec and the default CMYK conversion.
pub fn optimize(
    graph: &mut impl ObjectGraph,
    config: &OptimizeConfig,
) -> Result<DocumentReport, OptimizeError> {
    optimize_with(graph, &RustCodec::new(), &DefaultCmykTransform, config)
}

/// Optimize using specific collaborators (allows testing with mocks).
pub fn optimize_with<G: ObjectGraph>(
    graph: &mut G,
    codec: &impl RasterCodec,
    color: &impl ColorTransform,
    config: &OptimizeConfig,
) -> Result<DocumentReport, OptimizeError> {
    let started = Instant::now();
    let deadline = config.processing.time_budget().map(|budget| started + budget);
    if !graph.is_open() {
        return Err(OptimizeError::DocumentClosed);
    }

    let targets = discover(&*graph)?;
    info!("found {} distinct images", targets.len());

    let batch = rayon::current_num_threads().max(1) * 2;
    let mut results = Vec::with_capacity(targets.len());
    for chunk in targets.chunks(batch) {
        if !graph.is_open() {
            return Err(OptimizeError::DocumentClosed);
        }

        // Phase 1: read
        let reader: &G = graph;
        let prepared: Vec<Prepared> = chunk
            .iter()
            .map(|target| {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    let bytes = reader.image_object(target.id).map_or(0, |i| i.encoded_len);
                    return Prepared::Done(OptimizationResult::skipped(
                        target.id,
                        target.pages.clone(),
                        Reason::BudgetExhausted,
                        bytes,
                    ));
                }
                match prepare(reader, target, codec, config) {
                    Ok(job) => Prepared::Ready(Box::new(job)),
                    Err(result) => Prepared::Done(result),
                }
            })
            .collect();

        // Phase 2: evaluate
        let evaluated: Vec<Step> = prepared
            .into_par_iter()
            .map(|p| match p {
                Prepared::Ready(job) => {
                    let verdict = evaluate(&job, codec, color, config);
                    Step::Evaluated(job, verdict)
                }
                Prepared::Done(result) => Step::Done(result),
            })
            .collect();

        // Phase 3: commit
        for step in evaluated {
            let result = match step {
                Step::Done(result) | Step::Evaluated(_, Verdict::Done(result)) => result,
                Step::Evaluated(
                    job,
                    Verdict::Commit {
                        candidate,
                        report,
                        strategy,
                        bytes_after,
                    },
                ) => commit(graph, &job, &candidate, report, strategy, bytes_after)?,
            };
            results.push(result);
        }
    }

    let report = DocumentReport::new(results);
    info!(
        "{} accepted, {} downgraded, {} rejected, {} skipped, {} failed; saved {} bytes in {:.1?}",
        report.count(Outcome::Accepted),
        report.count(Outcome::Downgraded),
        report.count(Outcome::Rejected),
        report.count(Outcome::Skipped),
        report.count(Outcome::Failed),
        report.bytes_saved,
        started.elapsed()
    );
    Ok(report)
}

/// Read-only view of what `optimize` would do with each image.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub image: ObjectRef,
    pub pages: Vec<u32>,
    pub info: Option<ImageObject>,
    pub classification: Option<Classification>,
    pub dpi: Option<f64>,
    /// Why the image would not be optimized, if known before evaluation.
    pub note: Option<Reason>,
}

/// Classify every image without mutating the document.
pub fn inspect(
    graph: &impl ObjectGraph,
    config: &OptimizeConfig,
) -> Result<Vec<ImageSummary>, OptimizeError> {
    let codec = RustCodec::new();
    let color = DefaultCmykTransform;
    let mut summaries = Vec::new();
    for target in discover(graph)? {
        let info = graph.image_object(target.id).ok();
        let mut summary = ImageSummary {
            image: target.id,
            pages: target.pages.clone(),
            info,
            classification: None,
            dpi: None,
            note: None,
        };
        match prepare(graph, &target, &codec, config) {
            Ok(job) => match analyze(&job, &codec, &color, config) {
                Ok(analysis) => {
                    summary.classification = Some(analysis.classification);
                    summary.dpi = analysis.dpi;
                }
                Err(result) => summary.note = result.reason,
            },
            Err(result) => summary.note = result.reason,
        }
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Unique image objects in first-seen order, with all their placements.
fn discover(graph: &impl ObjectGraph) -> Result<Vec<Target>, OptimizeError> {
    let pages = graph.pages()?;
    let mut targets: Vec<Target> = Vec::new();
    let mut index: HashMap<ObjectRef, usize> = HashMap::new();

    for page in &pages {
        let bindings = match graph.image_bindings(page) {
            Ok(bindings) => bindings,
            Err(e) if e.is_fatal() => return Err(OptimizeError::DocumentClosed),
            Err(e) => {
                warn!("page {}: cannot read image bindings: {e}", page.number);
                continue;
            }
        };
        for binding in bindings {
            let slot = *index.entry(binding.image).or_insert_with(|| {
                targets.push(Target {
                    id: binding.image,
                    pages: Vec::new(),
                    placements: Vec::new(),
                });
                targets.len() - 1
            });
            let target = &mut targets[slot];
            if !target.pages.contains(&page.number) {
                target.pages.push(page.number);
            }
            target.placements.push((*page, binding.placement));
        }
    }
    Ok(targets)
}

/// Pre-filters and reads. `Err` carries the final result for the image.
fn prepare(
    graph: &impl ObjectGraph,
    target: &Target,
    codec: &impl RasterCodec,
    config: &OptimizeConfig,
) -> Result<Job, OptimizationResult> {
    let id = target.id;
    let pages = target.pages.clone();
    let image = graph.image_object(id).map_err(|e| {
        warn!("{id}: {e}");
        OptimizationResult::failed(id, pages.clone(), Reason::GraphError, e.to_string(), 0)
    })?;
    let mask_len = image
        .soft_mask
        .and_then(|m| graph.image_object(m).ok())
        .map_or(0, |m| m.encoded_len);
    let bytes_before = image.encoded_len + mask_len;
    let skip = |reason| Err(OptimizationResult::skipped(id, pages.clone(), reason, bytes_before));

    let selection = &config.selection;
    if image.is_stencil {
        return skip(Reason::StencilMask);
    }
    if image.width < selection.min_dimension
        || image.height < selection.min_dimension
        || image.encoded_len < selection.min_bytes
    {
        return skip(Reason::TooSmall);
    }
    if !codec.supports(image.filter.as_ref()) || image.colorspace.components().is_none() {
        debug!("{id}: {:?} / {} not supported", image.filter, image.colorspace);
        return skip(Reason::UnsupportedEncoding);
    }
    if image.colorspace.is_cmyk() && !config.enable_cmyk_conversion {
        return skip(Reason::CmykDisabled);
    }

    let bytes = graph.read_stream(id).map_err(|e| {
        OptimizationResult::failed(id, pages.clone(), Reason::GraphError, e.to_string(), bytes_before)
    })?;
    let predictor = predictor_of(graph.read_key(id, "DecodeParms").ok().flatten(), &image);
    let decode = decode_array(graph.read_key(id, "Decode").ok().flatten()).map_err(|detail| {
        debug!("{id}: {detail}");
        OptimizationResult {
            detail: Some(detail),
            ..OptimizationResult::skipped(id, pages.clone(), Reason::UnsupportedEncoding, bytes_before)
        }
    })?;
    let profile = match &image.colorspace {
        ColorSpace::Icc {
            components: 4,
            profile,
        } => graph
            .read_stream_decoded(*profile)
            .map_err(|e| warn!("{id}: cannot read ICC profile: {e}"))
            .ok(),
        _ => None,
    };
    let mask = image.soft_mask.and_then(|m| {
        read_mask(graph, m)
            .map_err(|e| warn!("{id}: cannot read soft mask {m}: {e}"))
            .ok()
    });

    Ok(Job {
        target: target.clone(),
        image,
        bytes,
        predictor,
        decode,
        profile,
        mask,
        mask_len,
        bytes_before,
    })
}

fn read_mask(graph: &impl ObjectGraph, id: ObjectRef) -> Result<MaskInput, ObjectGraphError> {
    let image = graph.image_object(id)?;
    let bytes = graph.read_stream(id)?;
    let predictor = predictor_of(graph.read_key(id, "DecodeParms")?, &image);
    let (decode, readable) = match decode_array(graph.read_key(id, "Decode")?) {
        Ok(decode) => (decode, true),
        Err(_) => (None, false),
    };
    let matte = graph.read_key(id, "Matte")?.is_some_and(|v| !v.is_null());
    Ok(MaskInput {
        image,
        bytes,
        predictor,
        decode,
        keep: matte || !readable,
    })
}

/// Numeric `/Decode` array. `Err` when present but not a flat list of numbers.
fn decode_array(value: Option<KeyValue>) -> Result<Option<Vec<f64>>, String> {
    match value {
        None | Some(KeyValue::Null) => Ok(None),
        Some(KeyValue::Array(items)) => items
            .iter()
            .map(KeyValue::as_number)
            .collect::<Option<Vec<f64>>>()
            .map(Some)
            .ok_or_else(|| "/Decode holds a non-numeric entry".to_string()),
        Some(other) => Err(format!("unreadable /Decode {other:?}")),
    }
}

/// Flate predictor from `/DecodeParms` (a dictionary, or the first one in an array).
fn predictor_of(parms: Option<KeyValue>, image: &ImageObject) -> Option<Predictor> {
    let dict = match parms? {
        KeyValue::Dictionary(d) => d,
        KeyValue::Array(items) => items.into_iter().find_map(|v| match v {
            KeyValue::Dictionary(d) => Some(d),
            _ => None,
        })?,
        _ => return None,
    };
    let get = |key: &str| {
        dict.iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_integer())
    };
    let predictor = u8::try_from(get("Predictor").unwrap_or(1)).ok()?;
    if predictor < 2 {
        return None;
    }
    Some(Predictor {
        predictor,
        colors: get("Colors")
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(image.colorspace.components().unwrap_or(1)),
        bits_per_component: get("BitsPerComponent")
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(image.bits_per_component),
        columns: get("Columns")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(image.width),
    })
}

/// Decode colour and alpha, then classify.
fn analyze(
    job: &Job,
    codec: &impl RasterCodec,
    color: &impl ColorTransform,
    config: &OptimizeConfig,
) -> Result<Analysis, OptimizationResult> {
    let image = &job.image;
    let hint = DecodeHint::new(
        image.width,
        image.height,
        image.colorspace.clone(),
        image.bits_per_component,
    )
    .with_predictor(job.predictor)
    .with_decode(job.decode.clone());

    let pixels = codec
        .decode(&job.bytes, image.filter.as_ref(), &hint)
        .map_err(|e| job.codec_result(e))?;
    let color_image = match pixels {
        Pixels::Image(img) => img,
        Pixels::Cmyk {
            width,
            height,
            data,
        } => {
            let rgb = match color.to_rgb(width, height, &data, job.profile.as_deref()) {
                Ok(rgb) => Ok(rgb),
                Err(e) if job.profile.is_some() => {
                    warn!("{}: embedded profile rejected ({e}); using default CMYK conversion", image.id);
                    DefaultCmykTransform.to_rgb(width, height, &data, None)
                }
                Err(e) => Err(e),
            };
            DynamicImage::ImageRgb8(rgb.map_err(|e| job.failure(Reason::CodecError, e.to_string()))?)
        }
    };
    let dims = (color_image.width(), color_image.height());

    let alpha = match &job.mask {
        Some(mask) if mask.keep => {
            debug!("{}: soft mask {} cannot be re-encoded, keeping it as is", image.id, mask.image.id);
            None
        }
        Some(mask) => decode_mask(mask, codec, dims)
            .map_err(|e| warn!("{}: soft mask undecodable, keeping it as is: {e}", image.id))
            .ok(),
        None => None,
    };
    let transparency = match (&image.soft_mask, &alpha) {
        (None, _) => Transparency::Absent,
        (Some(_), Some(a)) if a.pixels().all(|p| p.0[0] >= OPAQUE_ALPHA) => Transparency::Uniform,
        _ => Transparency::Varying,
    };

    let settings = config.classifier_settings();
    let per_placement: Vec<Classification> = job
        .target
        .placements
        .iter()
        .map(|(page, placement)| classify(image, placement.as_ref(), page, transparency, &settings))
        .collect();
    let classification = merge(&per_placement);
    if classification.ambiguous {
        debug!("{}: placement unknown, using {}", image.id, classification.strategy);
    }

    let dpi = job
        .target
        .placements
        .iter()
        .filter_map(|(_, t)| t.filter(Transform::is_well_formed))
        .filter_map(|t| effective_dpi(dims, t.displayed_size()))
        .fold(None, |lowest: Option<f64>, d| Some(lowest.map_or(d, |l| l.min(d))));

    Ok(Analysis {
        source: SourceImage {
            color: color_image,
            alpha,
        },
        classification,
        transparency,
        dpi,
    })
}

/// Soft mask as 8-bit alpha at the colour image's size.
fn decode_mask(
    mask: &MaskInput,
    codec: &impl RasterCodec,
    dims: (u32, u32),
) -> Result<GrayImage, CodecError> {
    let hint = DecodeHint::new(
        mask.image.width,
        mask.image.height,
        ColorSpace::Gray,
        mask.image.bits_per_component,
    )
    .with_predictor(mask.predictor)
    .with_decode(mask.decode.clone());
    let alpha = match codec.decode(&mask.bytes, mask.image.filter.as_ref(), &hint)? {
        Pixels::Image(img) => img.to_luma8(),
        Pixels::Cmyk { .. } => {
            return Err(CodecError::UnsupportedColorSpace("DeviceCMYK".into()));
        }
    };
    if alpha.dimensions() == dims {
        Ok(alpha)
    } else {
        Ok(imageops::resize(&alpha, dims.0, dims.1, FilterType::Triangle))
    }
}

/// Run the candidate ladder through the quality and size gates.
fn evaluate(
    job: &Job,
    codec: &impl RasterCodec,
    color: &impl ColorTransform,
    config: &OptimizeConfig,
) -> Verdict {
    let analysis = match analyze(job, codec, color, config) {
        Ok(analysis) => analysis,
        Err(result) => return Verdict::Done(result),
    };
    let id = job.image.id;
    let strategy = analysis.classification.strategy;
    let threshold = match strategy {
        Strategy::Background => config.background.min_similarity,
        _ => config.min_similarity,
    };
    let masked = job.image.soft_mask.is_some();
    let allowed = (job.bytes_before as f64 * (1.0 - config.gate.min_savings_ratio)).floor() as usize;
    debug!(
        "{id}: {strategy} ({:?}, coverage {:.2}, dpi {:?})",
        analysis.transparency, analysis.classification.coverage, analysis.dpi
    );

    let source = if config.grayscale {
        analysis.source.into_grayscale()
    } else {
        analysis.source
    };
    let original = source.raster();
    let plans = plan_candidates(strategy, source.dimensions(), analysis.dpi, config);
    let mut best: Option<QualityReport> = None;
    let mut passed_quality = false;

    for (index, plan) in plans.iter().enumerate() {
        let candidate = match realize(index, plan, &source, codec) {
            Ok(candidate) => candidate,
            Err(e) => return Verdict::Done(job.codec_result(e).with_strategy(strategy)),
        };
        let report = match decoded_raster(&candidate, codec)
            .map_err(|e| e.to_string())
            .and_then(|raster| assess(&original, &raster).map_err(|e| e.to_string()))
        {
            Ok(report) => report,
            Err(e) => {
                debug!("{id}: candidate {index} discarded: {e}");
                continue;
            }
        };
        let total = candidate.encoded_len() + if candidate.soft_mask.is_some() { 0 } else { job.mask_len };
        debug!(
            "{id}: candidate {index} q{} {}x{}: similarity {:.4}, psnr {:.1}, black {:.4}, {} bytes",
            plan.quality.value(),
            plan.width,
            plan.height,
            report.similarity,
            report.psnr,
            report.black_pixel_ratio,
            total
        );
        if best.is_none_or(|b| report.similarity > b.similarity) {
            best = Some(report);
        }

        let quality_ok = report.similarity >= threshold
            && (!masked || report.black_pixel_ratio <= config.gate.max_black_pixel_ratio);
        if !quality_ok {
            continue;
        }
        passed_quality = true;
        if total > allowed {
            continue;
        }
        return Verdict::Commit {
            candidate: Box::new(candidate),
            report,
            strategy,
            bytes_after: total,
        };
    }

    let (outcome, reason) = if passed_quality {
        (Outcome::Rejected, Reason::NoSizeReduction)
    } else {
        (Outcome::Skipped, Reason::QualityGateExhausted)
    };
    Verdict::Done(OptimizationResult {
        quality: best,
        ..job.result(outcome, reason).with_strategy(strategy)
    })
}

fn commit(
    graph: &mut impl ObjectGraph,
    job: &Job,
    candidate: &OptimizationCandidate,
    report: QualityReport,
    strategy: Strategy,
    bytes_after: usize,
) -> Result<OptimizationResult, OptimizeError> {
    let id = job.image.id;
    if !graph.is_open() {
        return Err(OptimizeError::DocumentClosed);
    }

    match rewrite(graph, &job.image, candidate) {
        RewriteOutcome::Committed { .. } => {
            let outcome = if candidate.index == 0 {
                Outcome::Accepted
            } else {
                Outcome::Downgraded
            };
            info!(
                "{id}: {strategy} {} -> {} bytes (similarity {:.3})",
                job.bytes_before, bytes_after, report.similarity
            );
            Ok(OptimizationResult {
                image: id,
                pages: job.target.pages.clone(),
                strategy: Some(strategy),
                outcome,
                reason: None,
                detail: None,
                bytes_before: job.bytes_before,
                bytes_after,
                quality: Some(report),
                candidate_index: Some(candidate.index),
            })
        }
        RewriteOutcome::RolledBack { error } => {
            if error.is_fatal() || !graph.is_open() {
                return Err(OptimizeError::DocumentClosed);
            }
            Ok(OptimizationResult {
                quality: Some(report),
                ..job
                    .failure(Reason::GraphError, error.to_string())
                    .with_strategy(strategy)
            })
        }
        RewriteOutcome::RollbackFailed {
            error,
            rollback_error,
        } => Err(OptimizeError::RollbackFailed {
            image: id,
            reason: format!("{error}; rollback: {rollback_error}"),
        }),
    }
}
