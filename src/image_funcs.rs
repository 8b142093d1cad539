// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::filter::box_filter;
use log::debug;

use crate::config::ContourConfig;
use crate::error::HitError;
use crate::frame::{ChannelOrder, Frame, Sample};

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Converts `frame` to an 8-bit single channel image of the same width and
/// height.
///
/// * 3-channel frames are reduced to luma (BT.601 weights), honoring the
///   frame's channel order.
/// * 8-bit frames keep their values; a single-channel 8-bit frame comes back
///   unchanged.
/// * Any other sample type is stretched so that its minimum maps to 0 and its
///   maximum to 255. Non-finite values count as 0. A frame with no contrast
///   at all becomes all zeros.
pub fn normalize_frame<T: Sample>(frame: &Frame<T>) -> Result<GrayImage, HitError> {
    let (width, height, channels) = frame.dimensions()?;
    let order = frame.channel_order;

    let gray_pixels = match T::as_u8_slice(frame.data) {
        Some(bytes) if channels == 1 => bytes.to_vec(),
        Some(bytes) => bytes.chunks_exact(3)
            .map(|px| luma_u8(px, order))
            .collect(),
        None if channels == 1 => rescale_to_u8(
            frame.data.iter().map(|s| s.to_f64()).collect()),
        None => rescale_to_u8(
            frame.data.chunks_exact(3)
                .map(|px| luma_f64(px[0].to_f64(), px[1].to_f64(),
                                   px[2].to_f64(), order))
                .collect()),
    };
    GrayImage::from_raw(width, height, gray_pixels).ok_or_else(
        || HitError::InvalidFrameShape{shape: frame.shape.clone(),
                                       data_len: frame.data.len()})
}

// Fixed point luma with 14 fractional bits, rounded. The weights sum to
// 1 << 14 so the result never exceeds 255.
fn luma_u8(px: &[u8], order: ChannelOrder) -> u8 {
    let (b, g, r) = match order {
        ChannelOrder::Bgr => (px[0] as u32, px[1] as u32, px[2] as u32),
        ChannelOrder::Rgb => (px[2] as u32, px[1] as u32, px[0] as u32),
    };
    ((b * 1868 + g * 9617 + r * 4899 + (1 << 13)) >> 14) as u8
}

fn luma_f64(c0: f64, c1: f64, c2: f64, order: ChannelOrder) -> f64 {
    let (b, g, r) = match order {
        ChannelOrder::Bgr => (c0, c1, c2),
        ChannelOrder::Rgb => (c2, c1, c0),
    };
    0.114 * b + 0.587 * g + 0.299 * r
}

fn rescale_to_u8(mut values: Vec<f64>) -> Vec<u8> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
        min = f64::min(min, *v);
        max = f64::max(max, *v);
    }
    if !(max > min) {
        // Degenerate (or empty) frame.
        return vec![0_u8; values.len()];
    }
    let range = max - min;
    values.into_iter()
        .map(|v| ((v - min) * 255.0 / range).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Produces a binary image from `gray`: [FOREGROUND] where a pixel passes the
/// configured threshold, [BACKGROUND] elsewhere.
///
/// With `config.adaptive` unset, a pixel is foreground when it is at least
/// `config.threshold_value`. Otherwise it is foreground when it is at least
/// the mean of its surrounding `effective_blocksize()` square, minus
/// `config.adaptive_shift`. Image borders are extended by repeating the edge
/// pixels when computing the mean.
pub fn binarize(gray: &GrayImage, config: &ContourConfig) -> GrayImage {
    let binarize_start = Instant::now();
    let (width, height) = gray.dimensions();
    let mut binary = GrayImage::from_pixel(width, height, Luma([BACKGROUND]));
    if config.adaptive {
        let radius = config.effective_blocksize() / 2;
        let local_mean = box_filter(gray, radius, radius);
        for ((out, &p), &mean) in binary.iter_mut()
            .zip(gray.iter()).zip(local_mean.iter())
        {
            if p as f64 >= mean as f64 - config.adaptive_shift {
                *out = FOREGROUND;
            }
        }
    } else {
        let threshold = config.threshold_value;
        for (out, &p) in binary.iter_mut().zip(gray.iter()) {
            if p as i32 >= threshold {
                *out = FOREGROUND;
            }
        }
    }
    debug!("Binarized {}x{} (adaptive: {}) in {:?}",
           width, height, config.adaptive, binarize_start.elapsed());
    binary
}

// mod tests.
