// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::{imageops, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use log::debug;

/// The outer boundary of one connected foreground region, as a closed
/// polygon through pixel centers. The last vertex connects back to the
/// first. Vertices in the interior of straight runs are omitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundaryCurve {
    pub points: Vec<Point<i32>>,
}

/// Traces the outer boundary of every outermost 8-connected foreground
/// region of `binary` (any non-zero pixel is foreground). Hole boundaries are
/// not reported, nor are regions lying inside another region's hole.
///
/// Curves are returned in raster order of their first (top-left) pixel.
pub fn find_boundary_curves(binary: &GrayImage) -> Vec<BoundaryCurve> {
    let trace_start = Instant::now();
    let (width, height) = binary.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    // The border follower only starts an outer border after a background
    // pixel, so regions in column 0 need a ring of background around them.
    let mut padded = GrayImage::new(width + 2, height + 2);
    imageops::replace(&mut padded, binary, 1, 1);
    let curves: Vec<BoundaryCurve> = find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) &&
                c.parent.is_none())
        .map(|c| {
            let points: Vec<Point<i32>> = c.points.iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect();
            BoundaryCurve{points: compress_chain(&points)}
        })
        .collect();
    debug!("Found {} boundary curves in {:?}",
           curves.len(), trace_start.elapsed());
    curves
}

// Drops every vertex whose incoming step equals its outgoing step, treating
// `points` as a closed chain of neighboring pixels. Chains of one or two
// points have no interior vertices and are kept as-is.
fn compress_chain(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let n = points.len();
    if n <= 2 {
        return points.to_vec();
    }
    let mut compressed = Vec::<Point<i32>>::with_capacity(n);
    for i in 0..n {
        let prev = points[(i + n - 1) % n];
        let cur = points[i];
        let next = points[(i + 1) % n];
        let step_in = (cur.x - prev.x, cur.y - prev.y);
        let step_out = (next.x - cur.x, next.y - cur.y);
        if step_in != step_out {
            compressed.push(cur);
        }
    }
    compressed
}

/// Raster moments of the region enclosed by a closed polygon, computed from
/// its vertices with Green's theorem. The signs are normalized so that `m00`
/// is non-negative whichever way the polygon winds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Integer centroid (floor of the first moments over `m00`), or None if
    /// the polygon encloses no area.
    pub fn centroid(&self) -> Option<(i64, i64)> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(((self.m10 / self.m00).floor() as i64,
              (self.m01 / self.m00).floor() as i64))
    }
}

pub fn polygon_moments(points: &[Point<i32>]) -> Moments {
    // Twice the signed area, and six times the signed first moments. Integer
    // arithmetic keeps these exact.
    let mut a00: i64 = 0;
    let mut a10: i64 = 0;
    let mut a01: i64 = 0;
    let mut prev = match points.last() {
        Some(p) => *p,
        None => return Moments{m00: 0.0, m10: 0.0, m01: 0.0},
    };
    for &cur in points {
        let (x0, y0) = (prev.x as i64, prev.y as i64);
        let (x1, y1) = (cur.x as i64, cur.y as i64);
        let cross = x0 * y1 - x1 * y0;
        a00 += cross;
        a10 += cross * (x0 + x1);
        a01 += cross * (y0 + y1);
        prev = cur;
    }
    let sign = if a00 < 0 { -1.0 } else { 1.0 };
    Moments{m00: sign * a00 as f64 / 2.0,
            m10: sign * a10 as f64 / 6.0,
            m01: sign * a01 as f64 / 6.0}
}

/// Unsigned area enclosed by a closed polygon (shoelace formula).
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    let mut twice_area: i64 = 0;
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

/// Length of a closed polygon, including the edge from the last vertex back
/// to the first.
pub fn polygon_perimeter(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    let mut perimeter = 0.0;
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        perimeter += ((q.x - p.x) as f64).hypot((q.y - p.y) as f64);
    }
    perimeter
}

/// Circularity measure `perimeter^2 / area - 4 * pi`. Close to zero for a
/// circle and larger for elongated or ragged shapes; infinite for a
/// zero-area shape.
pub fn roundness(perimeter: f64, area: f64, pi: f64) -> f64 {
    if area > 0.0 {
        perimeter * perimeter / area - 4.0 * pi
    } else {
        f64::INFINITY
    }
}

// mod tests.
