//! CLI output formatting for `optimize` and `inspect`.
//!
//! Every image is listed by its position in discovery order and its object
//! reference, followed by indented context lines.
//!
//! ## Optimize
//!
//! ```text
//! 001 12 0 R (pages 1, 2) background
//!     accepted: 480000 -> 1834 bytes (-99.6%)
//!     similarity 0.912, psnr 31.2 dB, candidate 0
//! 002 14 0 R (page 3)
//!     skipped: too-small
//!
//! Summary
//!     2 images: 1 accepted, 0 downgraded, 0 rejected, 1 skipped, 0 failed
//!     480300 -> 2134 bytes, saved 478166
//! ```
//!
//! ## Inspect
//!
//! ```text
//! 001 12 0 R (page 1)
//!     400x400 DeviceRGB, 8 bpc, FlateDecode, 480000 bytes
//!     strategy: background (coverage 1.00), 47 dpi
//! ```
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::optimize::ImageSummary;
use crate::report::{DocumentReport, OptimizationResult, Outcome};
use crate::types::ObjectRef;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn pages_label(pages: &[u32]) -> String {
    let list = pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    match pages.len() {
        0 => "unplaced".to_string(),
        1 => format!("page {list}"),
        _ => format!("pages {list}"),
    }
}

/// ```text
/// 001 12 0 R (pages 1, 2)
/// ```
fn image_header(index: usize, image: ObjectRef, pages: &[u32]) -> String {
    format!("{} {} ({})", format_index(index), image, pages_label(pages))
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Accepted => "accepted",
        Outcome::Downgraded => "downgraded",
        Outcome::Rejected => "rejected",
        Outcome::Skipped => "skipped",
        Outcome::Failed => "failed",
    }
}

/// Relative size change, `-99.6%` for a shrink.
fn percent_change(before: usize, after: usize) -> String {
    if before == 0 {
        return "n/a".to_string();
    }
    let change = (after as f64 - before as f64) / before as f64 * 100.0;
    format!("{change:+.1}%")
}

// ============================================================================
// optimize
// ============================================================================

fn format_result(index: usize, result: &OptimizationResult) -> Vec<String> {
    let mut header = image_header(index, result.image, &result.pages);
    if let Some(strategy) = result.strategy {
        header.push_str(&format!(" {strategy}"));
    }
    let mut lines = vec![header];

    let label = outcome_label(result.outcome);
    if result.outcome.is_committed() {
        lines.push(format!(
            "{}{label}: {} -> {} bytes ({})",
            indent(1),
            result.bytes_before,
            result.bytes_after,
            percent_change(result.bytes_before, result.bytes_after)
        ));
    } else {
        let reason = result.reason.map_or("unknown", |r| r.as_str());
        lines.push(format!("{}{label}: {reason}", indent(1)));
    }

    if let Some(q) = &result.quality {
        let mut line = format!(
            "{}similarity {:.3}, psnr {:.1} dB",
            indent(1),
            q.similarity,
            q.psnr
        );
        if let Some(i) = result.candidate_index {
            line.push_str(&format!(", candidate {i}"));
        }
        lines.push(line);
    }
    if let Some(detail) = &result.detail {
        lines.push(format!("{}{detail}", indent(1)));
    }
    lines
}

/// Format a document report: one block per image, then totals.
pub fn format_report(report: &DocumentReport) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, result) in report.results.iter().enumerate() {
        lines.extend(format_result(i + 1, result));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }

    lines.push("Summary".to_string());
    lines.push(format!(
        "{}{} images: {} accepted, {} downgraded, {} rejected, {} skipped, {} failed",
        indent(1),
        report.results.len(),
        report.count(Outcome::Accepted),
        report.count(Outcome::Downgraded),
        report.count(Outcome::Rejected),
        report.count(Outcome::Skipped),
        report.count(Outcome::Failed),
    ));
    lines.push(format!(
        "{}{} -> {} bytes, saved {}",
        indent(1),
        report.bytes_before,
        report.bytes_after,
        report.bytes_saved
    ));
    lines
}

pub fn print_report(report: &DocumentReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// inspect
// ============================================================================

/// Format the read-only inspection of every image.
pub fn format_inspection(summaries: &[ImageSummary]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, summary) in summaries.iter().enumerate() {
        lines.push(image_header(i + 1, summary.image, &summary.pages));

        match &summary.info {
            Some(info) if info.is_stencil => {
                lines.push(format!("{}{}x{} stencil mask", indent(1), info.width, info.height));
            }
            Some(info) => {
                let filter = info
                    .filter
                    .as_ref()
                    .map_or("uncompressed".to_string(), |f| f.to_string());
                lines.push(format!(
                    "{}{}x{} {}, {} bpc, {}, {} bytes",
                    indent(1),
                    info.width,
                    info.height,
                    info.colorspace,
                    info.bits_per_component,
                    filter,
                    info.encoded_len
                ));
                if let Some(mask) = info.soft_mask {
                    lines.push(format!("{}soft mask: {mask}", indent(1)));
                }
            }
            None => lines.push(format!("{}unreadable", indent(1))),
        }

        if let Some(c) = &summary.classification {
            let mut line = format!(
                "{}strategy: {} (coverage {:.2})",
                indent(1),
                c.strategy,
                c.coverage
            );
            if let Some(dpi) = summary.dpi {
                line.push_str(&format!(", {dpi:.0} dpi"));
            }
            if c.ambiguous {
                line.push_str(", placement unknown");
            }
            lines.push(line);
        }
        if let Some(note) = summary.note {
            lines.push(format!("{}note: {}", indent(1), note.as_str()));
        }
    }
    if lines.is_empty() {
        lines.push("No images found".to_string());
    }
    lines
}

pub fn print_inspection(summaries: &[ImageSummary]) {
    for line in format_inspection(summaries) {
        println!("{}", line);
    }
}
