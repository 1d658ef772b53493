//! Optimizer configuration.
//!
//! Handles loading, validating, and merging `pdfslim.toml` files. Stock
//! defaults are the base layer; a user file overrides any subset of keys;
//! command-line flags override both.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! target_quality = 70          # JPEG quality of the first foreground candidate
//! max_dpi = 150                # Resolution cap for foreground images
//! dpi_tolerance = 1.5          # Only downscale above max_dpi * tolerance
//! min_similarity = 0.85        # SSIM a foreground candidate must reach
//! enable_cmyk_conversion = true
//! grayscale = false            # Re-encode every image without colour
//!
//! [background]
//! scale = 0.25                 # Linear scale of background images
//! quality = 1                  # JPEG quality of background images
//! min_similarity = 0.25
//! coverage = 0.60              # Page share that makes an image a background
//! preserve = false             # Never treat images as backgrounds
//!
//! [gate]
//! quality_step = 10
//! max_candidates = 3
//! max_black_pixel_ratio = 0.01
//! min_savings_ratio = 0.05
//!
//! [selection]
//! min_dimension = 50
//! min_bytes = 1024
//!
//! [processing]
//! max_processes = 4            # Max parallel workers (omit for auto = CPU cores)
//! time_budget_secs = 120       # Stop starting new images after this long
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::classify::ClassifierSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Optimizer configuration loaded from a TOML file.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeConfig {
    /// JPEG quality of the most aggressive foreground candidate (1-100).
    pub target_quality: u32,
    /// Foreground images displayed above this resolution are downscaled.
    pub max_dpi: u32,
    /// Factor above `max_dpi` tolerated before downscaling.
    pub dpi_tolerance: f64,
    /// Similarity a foreground candidate must reach (0-1).
    pub min_similarity: f64,
    /// Convert CMYK images to RGB; when off they are left untouched.
    pub enable_cmyk_conversion: bool,
    /// Encode candidates as DeviceGray and judge them against a gray original.
    pub grayscale: bool,
    pub background: BackgroundConfig,
    pub gate: GateConfig,
    pub selection: SelectionConfig,
    pub processing: ProcessingConfig,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            target_quality: 70,
            max_dpi: 150,
            dpi_tolerance: 1.5,
            min_similarity: 0.85,
            enable_cmyk_conversion: true,
            grayscale: false,
            background: BackgroundConfig::default(),
            gate: GateConfig::default(),
            selection: SelectionConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// Handling of page-filling images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundConfig {
    /// Linear scale applied to background images, in (0, 1].
    pub scale: f64,
    /// JPEG quality for background images (1-100).
    pub quality: u32,
    /// Similarity a background candidate must reach (0-1).
    pub min_similarity: f64,
    /// Share of the page an image must cover to count as background (0-1).
    pub coverage: f64,
    /// Keep every image on the foreground paths.
    pub preserve: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            scale: 0.25,
            quality: 1,
            min_similarity: 0.25,
            coverage: 0.60,
            preserve: false,
        }
    }
}

/// Candidate ladder and acceptance gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Quality increment between successive foreground candidates.
    pub quality_step: u32,
    /// Most candidates tried per image (at least 1).
    pub max_candidates: usize,
    /// Largest tolerated share of new opaque-black pixels on masked images.
    pub max_black_pixel_ratio: f64,
    /// Smallest size reduction, as a share of the original, worth committing.
    pub min_savings_ratio: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            quality_step: 10,
            max_candidates: 3,
            max_black_pixel_ratio: 0.01,
            min_savings_ratio: 0.05,
        }
    }
}

/// Images too small to be worth touching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    /// Images with a side shorter than this (pixels) are skipped.
    pub min_dimension: u32,
    /// Images whose encoded stream is smaller than this (bytes) are skipped.
    pub min_bytes: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_dimension: 50,
            min_bytes: 1024,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel evaluation workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
    /// Wall-clock budget for the whole run, checked between images.
    pub time_budget_secs: Option<u64>,
}

impl ProcessingConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

fn check_quality(name: &str, value: u32) -> Result<(), ConfigError> {
    if (1..=100).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{name} must be 1-100")))
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{name} must be between 0 and 1")))
    }
}

impl OptimizeConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_quality("target_quality", self.target_quality)?;
        check_quality("background.quality", self.background.quality)?;
        check_unit("min_similarity", self.min_similarity)?;
        check_unit("background.min_similarity", self.background.min_similarity)?;
        check_unit("background.coverage", self.background.coverage)?;
        check_unit("gate.max_black_pixel_ratio", self.gate.max_black_pixel_ratio)?;
        check_unit("gate.min_savings_ratio", self.gate.min_savings_ratio)?;

        if !(self.background.scale > 0.0 && self.background.scale <= 1.0) {
            return Err(ConfigError::Validation(
                "background.scale must be in (0, 1]".into(),
            ));
        }
        if self.max_dpi == 0 {
            return Err(ConfigError::Validation("max_dpi must be positive".into()));
        }
        if !(self.dpi_tolerance >= 1.0) {
            return Err(ConfigError::Validation(
                "dpi_tolerance must be at least 1".into(),
            ));
        }
        if self.gate.max_candidates == 0 {
            return Err(ConfigError::Validation(
                "gate.max_candidates must be at least 1".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            background_coverage: self.background.coverage,
            allow_background: !self.background.preserve,
        }
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(q) = overrides.quality {
            self.target_quality = q;
        }
        if let Some(dpi) = overrides.max_dpi {
            self.max_dpi = dpi;
        }
        if let Some(s) = overrides.min_similarity {
            self.min_similarity = s;
        }
        if overrides.no_cmyk {
            self.enable_cmyk_conversion = false;
        }
        if overrides.preserve_background {
            self.background.preserve = true;
        }
        if overrides.grayscale {
            self.grayscale = true;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Values given on the command line, applied over the file config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub quality: Option<u32>,
    pub max_dpi: Option<u32>,
    pub min_similarity: Option<f64>,
    pub no_cmyk: bool,
    pub preserve_background: bool,
    pub grayscale: bool,
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(OptimizeConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<OptimizeConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: OptimizeConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from an optional file path.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A path that does not exist is an error; no
/// path at all means stock defaults.
pub fn load_config(path: Option<&Path>) -> Result<OptimizeConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = match path {
        Some(p) => Some(load_raw_config(p)?.ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file {} not found", p.display()),
            ))
        })?),
        None => None,
    };
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `pdfslim.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pdfslim Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# JPEG quality (1-100) of the first, most aggressive foreground candidate.
# Later candidates step up by gate.quality_step.
target_quality = 70

# Foreground images displayed above max_dpi * dpi_tolerance are
# downscaled to max_dpi.
max_dpi = 150
dpi_tolerance = 1.5

# Mean SSIM (0-1) a foreground candidate must reach to be committed.
min_similarity = 0.85

# Convert CMYK images to RGB before re-encoding.
# When false, CMYK images are skipped.
enable_cmyk_conversion = true

# Drop colour: every candidate is encoded as DeviceGray, and the quality
# gate compares it against a gray version of the original.
grayscale = false

# ---------------------------------------------------------------------------
# Background images (cover most of a page, no cut-out transparency)
# ---------------------------------------------------------------------------
[background]
# Linear scale, in (0, 1]. 0.25 keeps 1/16 of the pixels.
scale = 0.25

# JPEG quality (1-100).
quality = 1

# Backgrounds are judged against a much lower similarity bar.
min_similarity = 0.25

# Share of the page (0-1) an image must cover to count as background.
coverage = 0.6

# Set to true to optimize every image as foreground.
preserve = false

# ---------------------------------------------------------------------------
# Candidate ladder and acceptance gate
# ---------------------------------------------------------------------------
[gate]
# Quality increment between candidates (capped at 95).
quality_step = 10

# Most candidates encoded and assessed per image.
max_candidates = 3

# Masked images: largest share of pixels allowed to turn opaque black.
max_black_pixel_ratio = 0.01

# A rewrite must save at least this share of the original bytes.
min_savings_ratio = 0.05

# ---------------------------------------------------------------------------
# Selection
# ---------------------------------------------------------------------------
[selection]
# Images with a side shorter than this many pixels are skipped.
min_dimension = 50

# Images whose encoded stream is smaller than this many bytes are skipped.
min_bytes = 1024

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel evaluation workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Wall-clock budget in seconds, checked between images. Images not started
# in time are reported as skipped.
# time_budget_secs = 120
"##
}
