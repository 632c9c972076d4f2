use std::f64::consts::PI;

use anyhow::Result;
use image::GrayImage;
use imageproc::contours::{find_contours_with_threshold, BorderType, Contour};
use imageproc::geometry::{arc_length, convex_hull};
use imageproc::point::Point;

use super::{ShapeMeasurer, ShapeStats};

/// Shape measurement over a thresholded mask: perimeter from the outer
/// contour, solidity from the convex hull, aspect ratio and roundness from
/// a moment-fitted ellipse. Degenerate masks measure as zeros.
pub struct ContourShapeMeasurer;

impl ShapeMeasurer for ContourShapeMeasurer {
    fn measure(&self, mask: &GrayImage, scale: f64) -> Result<ShapeStats> {
        let foreground: Vec<Point<i32>> = mask
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(|(x, y, _)| Point::new(x as i32, y as i32))
            .collect();
        if foreground.is_empty() {
            return Ok(ShapeStats::default());
        }

        let area = foreground.len() as f64 * scale * scale;

        let contours: Vec<Contour<i32>> = find_contours_with_threshold(mask, 0);
        let perimeter = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .map(|c| arc_length(&c.points, true))
            .fold(0.0_f64, f64::max)
            * scale;
        let circularity = if perimeter > 0.0 {
            // ImageJ caps circularity at 1.0 to absorb pixelation error.
            (4.0 * PI * area / (perimeter * perimeter)).min(1.0)
        } else {
            0.0
        };

        let (major, minor) = ellipse_axes(&foreground);
        let aspect_ratio = if minor > 0.0 { major / minor } else { 0.0 };
        let major_scaled = major * scale;
        let roundness = if major_scaled > 0.0 {
            4.0 * area / (PI * major_scaled * major_scaled)
        } else {
            0.0
        };

        let hull = convex_hull(foreground.as_slice());
        let hull_area = lattice_polygon_area(&hull) * scale * scale;
        let solidity = if hull_area > 0.0 { area / hull_area } else { 0.0 };

        Ok(ShapeStats {
            perimeter,
            circularity,
            aspect_ratio,
            roundness,
            solidity,
        })
    }
}

/// Full major/minor axis lengths (in pixels) of the ellipse with the same
/// second-order central moments as the pixel set.
fn ellipse_axes(points: &[Point<i32>]) -> (f64, f64) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let mut mu20 = 0.0;
    let mut mu02 = 0.0;
    let mut mu11 = 0.0;
    for p in points {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
    }
    mu20 /= n;
    mu02 /= n;
    mu11 /= n;

    let common = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
    let lambda1 = (mu20 + mu02 + common) / 2.0;
    let lambda2 = (mu20 + mu02 - common) / 2.0;

    (4.0 * lambda1.max(0.0).sqrt(), 4.0 * lambda2.max(0.0).sqrt())
}

/// Pixel area enclosed by a lattice polygon: shoelace area plus the Pick
/// boundary correction, so a filled axis-aligned rectangle measures exactly
/// width x height.
fn lattice_polygon_area(polygon: &[Point<i32>]) -> f64 {
    if polygon.len() < 2 {
        return polygon.len() as f64;
    }
    let mut twice_area = 0.0_f64;
    for (i, p) in polygon.iter().enumerate() {
        let q = &polygon[(i + 1) % polygon.len()];
        twice_area += (p.x as f64) * (q.y as f64) - (q.x as f64) * (p.y as f64);
    }
    let boundary = arc_length(polygon, true);
    twice_area.abs() / 2.0 + boundary / 2.0 + 1.0
}
