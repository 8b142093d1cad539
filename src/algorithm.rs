use std::time::Instant;

use image::GrayImage;
use log::{debug, info};

use crate::config::ContourConfig;
use crate::contour_funcs::{find_boundary_curves, polygon_area, polygon_moments,
                           polygon_perimeter, roundness, BoundaryCurve};
use crate::error::HitError;
use crate::frame::{Frame, Sample};
use crate::image_funcs::{binarize, normalize_frame};

/// One accepted hit: a compact bright region of a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    /// Centroid of the region's boundary polygon, truncated to integer pixel
    /// coordinates. Always inside the frame.
    pub cx: i32,
    pub cy: i32,

    /// Area enclosed by the boundary polygon (through pixel centers),
    /// truncated. A 2x2 pixel blob has area 1.
    pub area: i32,

    /// See [crate::contour_funcs::roundness()].
    pub roundness: f64,
}

/// Per-frame results of [extract_hits()].
#[derive(Debug)]
pub struct HitExtraction {
    /// The thresholded frame; pixels are 0 or 255.
    pub binary: GrayImage,

    /// Accepted hits, in the order their boundaries were discovered.
    pub hits: Vec<Hit>,
}

/// Returns a zeroed composite accumulator for frames of the given size.
pub fn new_accumulator(width: u32, height: u32) -> GrayImage {
    GrayImage::new(width, height)
}

/// Zeroes every cell of `accumulator` in place.
pub fn reset_accumulator(accumulator: &mut GrayImage) {
    accumulator.iter_mut().for_each(|cell| *cell = 0);
}

// Cells are 8-bit counters that wrap: 255 + 1 is 0.
fn increment_accumulator(accumulator: &mut GrayImage, x: u32, y: u32) {
    let cell = &mut accumulator.get_pixel_mut(x, y).0[0];
    *cell = cell.wrapping_add(1);
}

// Computes the metrics of `curve` and applies the configured filters. Returns
// None if the curve is rejected.
fn evaluate_curve(curve: &BoundaryCurve, config: &ContourConfig,
                  width: u32, height: u32) -> Option<Hit> {
    if (curve.points.len() as i64) < config.contour_min_size as i64 {
        return None;
    }
    let (cx, cy) = polygon_moments(&curve.points).centroid()?;
    let area = polygon_area(&curve.points);
    let perimeter = polygon_perimeter(&curve.points);
    if area < config.contour_min_area as f64 ||
        area > config.contour_max_area as f64
    {
        return None;
    }
    if cx < 0 || cy < 0 || cx >= width as i64 || cy >= height as i64 {
        return None;
    }
    Some(Hit{cx: cx as i32,
             cy: cy as i32,
             area: area as i32,
             roundness: roundness(perimeter, area, config.roundness_pi)})
}

/// Runs hit extraction on `frame`, adding one count to `accumulator` at the
/// centroid of every accepted hit.
///
/// # Arguments
///   `frame` - The camera frame. Any [Sample] type, 1 or 3 channels. See
///   [crate::image_funcs::normalize_frame()] for how it is brought to 8 bits.
///
///   `config` - Thresholding and filtering parameters.
///
///   `accumulator` - Composite image, owned by the caller and typically
///   reused across many frames. Must have the frame's width and height. The
///   only state this function modifies; callers sharing it between threads
///   must hold a lock around this call and around any reads of it.
///
/// # Errors
/// [HitError::InvalidFrameShape] if the frame is not HxW or HxWx3;
/// [HitError::AccumulatorShapeMismatch] if `accumulator` is sized for a
/// different frame. In either case `accumulator` is left untouched.
pub fn extract_hits<T: Sample>(frame: &Frame<T>, config: &ContourConfig,
                               accumulator: &mut GrayImage)
                               -> Result<HitExtraction, HitError> {
    let extract_start = Instant::now();
    let (width, height, _channels) = frame.dimensions()?;
    if accumulator.dimensions() != (width, height) {
        return Err(HitError::AccumulatorShapeMismatch{
            expected: (width, height), actual: accumulator.dimensions()});
    }

    let gray = normalize_frame(frame)?;
    debug!("Normalized {}x{} frame in {:?}",
           width, height, extract_start.elapsed());
    let binary = binarize(&gray, config);
    let curves = find_boundary_curves(&binary);

    let mut hits = Vec::<Hit>::new();
    for curve in &curves {
        if let Some(hit) = evaluate_curve(curve, config, width, height) {
            increment_accumulator(accumulator, hit.cx as u32, hit.cy as u32);
            hits.push(hit);
        }
    }
    info!("Accepted {} of {} boundary curves in {:?}",
          hits.len(), curves.len(), extract_start.elapsed());
    Ok(HitExtraction{binary, hits})
}

/// Like [extract_hits()], for callers without a composite of their own: a
/// zeroed accumulator is allocated and returned along with the results.
pub fn extract_hits_with_new_accumulator<T: Sample>(
    frame: &Frame<T>, config: &ContourConfig)
    -> Result<(HitExtraction, GrayImage), HitError>
{
    let (width, height, _channels) = frame.dimensions()?;
    let mut accumulator = new_accumulator(width, height);
    let extraction = extract_hits(frame, config, &mut accumulator)?;
    Ok((extraction, accumulator))
}

// mod tests.
