//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// PDF user space unit: 72 points per inch.
const POINTS_PER_INCH: f64 = 72.0;

/// Smallest side a DPI cap is allowed to produce.
pub const MIN_RESIZED_SIDE: u32 = 64;

/// Effective resolution of an image at its displayed size.
///
/// Returns the larger of the horizontal and vertical DPI, or `None` when the
/// displayed size is zero or not finite.
///
/// # Examples
/// ```
/// # use pdfslim::imaging::effective_dpi;
/// // 600 px shown across 2 inches → 300 DPI
/// assert_eq!(effective_dpi((600, 300), (144.0, 72.0)), Some(300.0));
/// ```
pub fn effective_dpi(pixels: (u32, u32), displayed_points: (f64, f64)) -> Option<f64> {
    let (w_pt, h_pt) = displayed_points;
    if !(w_pt.is_finite() && h_pt.is_finite()) || w_pt <= 0.0 || h_pt <= 0.0 {
        return None;
    }
    let dpi_x = f64::from(pixels.0) / (w_pt / POINTS_PER_INCH);
    let dpi_y = f64::from(pixels.1) / (h_pt / POINTS_PER_INCH);
    Some(dpi_x.max(dpi_y))
}

/// Scale dimensions uniformly, rounding and keeping each side at least 1.
pub fn scaled_size(pixels: (u32, u32), scale: f64) -> (u32, u32) {
    let scale = scale.clamp(0.0, 1.0);
    let w = (f64::from(pixels.0) * scale).round().max(1.0) as u32;
    let h = (f64::from(pixels.1) * scale).round().max(1.0) as u32;
    (w, h)
}

/// Target size under a DPI cap.
///
/// Downscales only when `dpi` exceeds `max_dpi × tolerance`, then to exactly
/// `max_dpi`, never making a side smaller than [`MIN_RESIZED_SIDE`] (or the
/// original side, if that is already smaller).
pub fn dpi_capped_size(pixels: (u32, u32), dpi: f64, max_dpi: u32, tolerance: f64) -> (u32, u32) {
    let max_dpi = f64::from(max_dpi);
    if !dpi.is_finite() || dpi <= max_dpi * tolerance {
        return pixels;
    }
    let (mut w, mut h) = scaled_size(pixels, max_dpi / dpi);

    let short_target = w.min(h);
    let short_original = pixels.0.min(pixels.1);
    let floor = MIN_RESIZED_SIDE.min(short_original);
    if short_target < floor {
        // grow back uniformly until the short side reaches the floor
        let scale = f64::from(floor) / f64::from(short_original);
        (w, h) = scaled_size(pixels, scale);
    }
    (w.min(pixels.0), h.min(pixels.1))
}

/// Fraction of the page covered by a placement, in `[0, 1]`.
pub fn coverage_ratio(displayed_area: f64, page_area: f64) -> f64 {
    if !displayed_area.is_finite() || !page_area.is_finite() || page_area <= 0.0 {
        return 0.0;
    }
    (displayed_area / page_area).clamp(0.0, 1.0)
}
