//! Per-image results and the document-level report.
//!
//! Every image the orchestrator discovers ends up with exactly one
//! [`OptimizationResult`], so a caller can tell "the quality gate kept the
//! original" apart from "the rewrite failed". The report serializes to JSON
//! for `--report`.

use crate::classify::Strategy;
use crate::quality::QualityReport;
use crate::types::ObjectRef;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The most aggressive candidate was committed.
    Accepted,
    /// A less aggressive candidate was committed.
    Downgraded,
    /// Candidates met the quality bar but none was worth writing.
    Rejected,
    /// The original was kept without an error.
    Skipped,
    /// A codec or graph error; the original bytes are intact.
    Failed,
}

impl Outcome {
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Accepted | Self::Downgraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    StencilMask,
    TooSmall,
    UnsupportedEncoding,
    CmykDisabled,
    BudgetExhausted,
    QualityGateExhausted,
    NoSizeReduction,
    CodecError,
    GraphError,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StencilMask => "stencil-mask",
            Self::TooSmall => "too-small",
            Self::UnsupportedEncoding => "unsupported-encoding",
            Self::CmykDisabled => "cmyk-disabled",
            Self::BudgetExhausted => "budget-exhausted",
            Self::QualityGateExhausted => "quality-gate-exhausted",
            Self::NoSizeReduction => "no-size-reduction",
            Self::CodecError => "codec-error",
            Self::GraphError => "graph-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub image: ObjectRef,
    /// Pages the image is bound on, in document order.
    pub pages: Vec<u32>,
    pub strategy: Option<Strategy>,
    pub outcome: Outcome,
    pub reason: Option<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Image stream plus soft-mask stream, before.
    pub bytes_before: usize,
    /// Image stream plus soft-mask stream, after. Equal to `bytes_before`
    /// unless the outcome is committed.
    pub bytes_after: usize,
    /// Report of the committed candidate, or of the best rejected one.
    pub quality: Option<QualityReport>,
    /// Position of the committed candidate in its ladder.
    pub candidate_index: Option<usize>,
}

impl OptimizationResult {
    /// A result that leaves the image untouched.
    pub fn unchanged(image: ObjectRef, pages: Vec<u32>, outcome: Outcome, reason: Reason, bytes: usize) -> Self {
        Self {
            image,
            pages,
            strategy: None,
            outcome,
            reason: Some(reason),
            detail: None,
            bytes_before: bytes,
            bytes_after: bytes,
            quality: None,
            candidate_index: None,
        }
    }

    pub fn skipped(image: ObjectRef, pages: Vec<u32>, reason: Reason, bytes: usize) -> Self {
        Self::unchanged(image, pages, Outcome::Skipped, reason, bytes)
    }

    pub fn failed(image: ObjectRef, pages: Vec<u32>, reason: Reason, detail: String, bytes: usize) -> Self {
        Self {
            detail: Some(detail),
            ..Self::unchanged(image, pages, Outcome::Failed, reason, bytes)
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn bytes_saved(&self) -> usize {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Results for one document, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentReport {
    pub results: Vec<OptimizationResult>,
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub bytes_saved: usize,
}

impl DocumentReport {
    pub fn new(results: Vec<OptimizationResult>) -> Self {
        let bytes_before = results.iter().map(|r| r.bytes_before).sum();
        let bytes_after = results.iter().map(|r| r.bytes_after).sum();
        let bytes_saved = results.iter().map(OptimizationResult::bytes_saved).sum();
        Self {
            results,
            bytes_before,
            bytes_after,
            bytes_saved,
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn result_for(&self, image: ObjectRef) -> Option<&OptimizationResult> {
        self.results.iter().find(|r| r.image == image)
    }
}
