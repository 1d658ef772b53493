//! Strategy selection for one image.
//!
//! Classification is a pure function of the image, its on-page placement, the
//! page size and the transparency structure of its soft mask. Anything that
//! cannot be measured (no placement, degenerate matrix, zero-area page) is
//! ambiguous and falls back to the least lossy applicable strategy.

use crate::imaging::coverage_ratio;
use crate::types::{ImageObject, PageInfo, Transform};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Background,
    ForegroundOpaque,
    ForegroundTransparent,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Background => "background",
            Self::ForegroundOpaque => "foreground-opaque",
            Self::ForegroundTransparent => "foreground-transparent",
        })
    }
}

/// What the soft mask does to the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transparency {
    /// No `/SMask`.
    Absent,
    /// A mask that is effectively opaque everywhere.
    Uniform,
    /// A mask that actually cuts out content, or one that could not be read.
    Varying,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierSettings {
    /// Minimum share of the page an image must cover to count as background.
    pub background_coverage: f64,
    /// `false` keeps every image on the foreground paths.
    pub allow_background: bool,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            background_coverage: 0.60,
            allow_background: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub strategy: Strategy,
    pub coverage: f64,
    /// The placement could not be measured.
    pub ambiguous: bool,
}

pub fn classify(
    image: &ImageObject,
    placement: Option<&Transform>,
    page: &PageInfo,
    transparency: Transparency,
    settings: &ClassifierSettings,
) -> Classification {
    let transparency = if image.soft_mask.is_none() {
        Transparency::Absent
    } else {
        transparency
    };
    let masked_fallback = if transparency == Transparency::Absent {
        Strategy::ForegroundOpaque
    } else {
        Strategy::ForegroundTransparent
    };

    let measured = placement
        .filter(|t| t.is_well_formed())
        .filter(|_| page.area().is_finite() && page.area() > 0.0);
    let Some(transform) = measured else {
        return Classification {
            strategy: masked_fallback,
            coverage: 0.0,
            ambiguous: true,
        };
    };

    let coverage = coverage_ratio(transform.displayed_area(), page.area());
    let strategy = if transparency == Transparency::Varying {
        Strategy::ForegroundTransparent
    } else if settings.allow_background && coverage >= settings.background_coverage {
        Strategy::Background
    } else {
        masked_fallback
    };

    Classification {
        strategy,
        coverage,
        ambiguous: false,
    }
}

/// Combine the classifications of every placement of one image.
///
/// Ambiguous placements are ignored when at least one placement could be
/// measured. Background wins only if every placement agrees; transparency
/// wins if any placement needs it.
pub fn merge(classifications: &[Classification]) -> Classification {
    let measured: Vec<&Classification> = classifications.iter().filter(|c| !c.ambiguous).collect();
    let pool: Vec<&Classification> = if measured.is_empty() {
        classifications.iter().collect()
    } else {
        measured
    };
    let Some(first) = pool.first() else {
        return Classification {
            strategy: Strategy::ForegroundOpaque,
            coverage: 0.0,
            ambiguous: true,
        };
    };

    let strategy = if pool.iter().any(|c| c.strategy == Strategy::ForegroundTransparent) {
        Strategy::ForegroundTransparent
    } else if pool.iter().all(|c| c.strategy == Strategy::Background) {
        Strategy::Background
    } else {
        Strategy::ForegroundOpaque
    };

    Classification {
        strategy,
        coverage: pool.iter().map(|c| c.coverage).fold(0.0, f64::max),
        ambiguous: first.ambiguous,
    }
}
