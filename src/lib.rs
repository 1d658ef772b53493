//! # pdfslim
//!
//! Shrinks PDF documents by re-encoding their embedded raster images, and
//! only keeps a re-encoded image when it still looks like the original.
//!
//! # Architecture: Read, Evaluate, Commit
//!
//! Every distinct image object is processed once, however many pages alias
//! it, in three phases:
//!
//! ```text
//! 1. Read      graph   →  job        pre-filters, stream bytes, soft mask, ICC profile
//! 2. Evaluate  job     →  verdict    decode, classify, candidate ladder, quality gate
//! 3. Commit    verdict →  result     snapshot, rewrite, propagate, verify or roll back
//! ```
//!
//! Only reading and committing touch the document. Evaluation is pure pixel
//! work and runs in parallel on the rayon pool.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`graph`] | The [`graph::ObjectGraph`] seam over a PDF document, and its lopdf implementation |
//! | [`imaging`] | Raster codec gateway: decode, encode, CMYK conversion, size and DPI arithmetic |
//! | [`classify`] | Picks a strategy from placement, page coverage and transparency |
//! | [`quality`] | SSIM, PSNR and black-pixel drift between a candidate and its source |
//! | [`candidates`] | Plans and realizes the quality/size ladder for one image |
//! | [`rewrite`] | Transactional replacement of one image stream and its soft mask |
//! | [`optimize`] | The orchestrator: discovery, batching, gates, per-image results |
//! | [`report`] | Per-image results and document totals |
//! | [`config`] | `pdfslim.toml` loading, merging over stock defaults, validation |
//! | [`types`] | Shared value types (`ObjectRef`, `ImageObject`, `Transform`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## The Document Is Behind A Trait
//!
//! Everything that reads or writes the PDF goes through [`graph::ObjectGraph`].
//! Tests wrap the lopdf implementation to inject failures at any write step,
//! which is how the rollback guarantees are exercised.
//!
//! ## Soft Masks Travel With Their Image
//!
//! An image and its `/SMask` are replaced as a unit. A rewrite either commits
//! both with matching dimensions, or restores the snapshot taken before the
//! first write. A rollback that itself fails aborts the whole run.
//!
//! ## Gates, Not Guesses
//!
//! A candidate is only written if it passes the similarity threshold for its
//! strategy, does not introduce black pixels where the mask is opaque, and
//! saves enough bytes to be worth it. Otherwise the original is kept and the
//! report says why.

pub mod candidates;
pub mod classify;
pub mod config;
pub mod graph;
pub mod imaging;
pub mod optimize;
pub mod output;
pub mod quality;
pub mod report;
pub mod rewrite;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
