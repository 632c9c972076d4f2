use std::path::Path;

use anyhow::{Context, Result};
use image::GrayImage;

pub mod shape;
pub mod thin;
pub mod topology;

pub use shape::ContourShapeMeasurer;
pub use thin::MorphologicalThinner;
pub use topology::GraphSkeletonAnalyzer;

/// Mask geometry as reported by the measurement backend. All lengths are in
/// calibrated units; ratios are dimensionless.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShapeStats {
    pub perimeter: f64,
    pub circularity: f64,
    pub aspect_ratio: f64,
    pub roundness: f64,
    pub solidity: f64,
}

pub trait ShapeMeasurer {
    fn measure(&self, mask: &GrayImage, scale: f64) -> Result<ShapeStats>;
}

pub trait Skeletonizer {
    fn skeletonize(&self, mask: &GrayImage) -> GrayImage;
}

#[derive(Debug, Clone, Copy)]
pub struct TopologyOptions {
    pub prune_dead_ends: bool,
    pub calculate_shortest_paths: bool,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            prune_dead_ends: true,
            calculate_shortest_paths: true,
        }
    }
}

/// Scalar topology of one skeleton. `average_branch_length` stays `None`
/// when the analyzer could not derive it, so callers can apply their own
/// fallback instead of mistaking it for a measured zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonTopology {
    pub num_branches: u32,
    pub num_junctions: u32,
    pub num_end_points: u32,
    pub num_junction_voxels: u32,
    pub num_slab_voxels: u32,
    pub num_triple_points: u32,
    pub num_quadruple_points: u32,
    pub max_branch_length: f64,
    pub average_branch_length: Option<f64>,
    pub longest_shortest_path: f64,
}

pub trait SkeletonAnalyzer {
    /// Analyze a skeleton raster and report one result per connected
    /// skeleton, in label order.
    fn analyze(&self, skeleton: &GrayImage, scale: f64, options: TopologyOptions) -> Vec<SkeletonTopology>;
}

pub fn open_mask(path: &Path) -> Result<GrayImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?;
    Ok(image.to_luma8())
}

pub fn foreground_count(image: &GrayImage) -> u64 {
    image.pixels().filter(|p| p[0] > 0).count() as u64
}

pub fn binarize(image: &GrayImage) -> GrayImage {
    let mut binary = image.clone();
    for pixel in binary.pixels_mut() {
        pixel[0] = if pixel[0] > 0 { 255 } else { 0 };
    }
    binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn foreground_count_treats_any_nonzero_as_foreground() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(0, 0, Luma([1]));
        img.put_pixel(1, 0, Luma([128]));
        img.put_pixel(2, 0, Luma([255]));
        assert_eq!(foreground_count(&img), 3);
    }

    #[test]
    fn binarize_maps_nonzero_to_full_intensity() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([7]));
        let binary = binarize(&img);
        assert_eq!(binary.get_pixel(0, 0)[0], 255);
        assert_eq!(binary.get_pixel(1, 0)[0], 0);
    }
}
