use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::imaging::{
    foreground_count, open_mask, ContourShapeMeasurer, GraphSkeletonAnalyzer,
    MorphologicalThinner, ShapeMeasurer, SkeletonAnalyzer, Skeletonizer, TopologyOptions,
};

pub const RESULTS_FILE: &str = "Skeleton_Analysis_Results.csv";

lazy_static! {
    // FracLac prep names masks <cell>_area<number>_mask.tif with area
    // values in the 300-800 range.
    static ref AREA_RANGE_SUFFIX: Regex = Regex::new(r"_area[3-8]\d{2}_mask\.tif$").unwrap();
    static ref AREA_ANY_SUFFIX: Regex = Regex::new(r"_area\d+_mask\.tif$").unwrap();
    static ref MASK_SUFFIX: Regex = Regex::new(r"_mask\.tif$").unwrap();
}

/// One row of the skeleton results table. Field order is the column order.
#[derive(Debug, Clone, Serialize)]
pub struct SkeletonMetrics {
    pub cell_name: String,
    pub mask_file: String,
    pub skeleton_file: String,
    pub pixel_size_um: f64,
    pub mask_area_um2: f64,
    pub mask_perimeter_um: f64,
    pub mask_circularity: f64,
    pub mask_aspect_ratio: f64,
    pub mask_roundness: f64,
    pub mask_solidity: f64,
    pub num_branches: u32,
    pub num_junctions: u32,
    pub num_end_points: u32,
    pub num_junction_voxels: u32,
    pub num_slab_voxels: u32,
    pub num_triple_points: u32,
    pub num_quadruple_points: u32,
    pub max_branch_length_um: f64,
    pub avg_branch_length_um: f64,
    pub longest_shortest_path_um: f64,
    pub total_skeleton_length_um: f64,
    pub skeleton_area_um2: f64,
    pub branching_density: f64,
}

/// Strip the mask-naming suffix to recover the cell name. Unmatched names
/// pass through unchanged.
pub fn cell_name(mask_file: &str) -> String {
    for suffix in [&*AREA_RANGE_SUFFIX, &*AREA_ANY_SUFFIX, &*MASK_SUFFIX] {
        let stripped = suffix.replace(mask_file, "");
        if stripped != mask_file {
            return stripped.into_owned();
        }
    }
    mask_file.to_string()
}

/// Analyzer-reported average when available, else total slab length spread
/// over the branch count.
pub fn average_branch_length(
    reported: Option<f64>,
    num_branches: u32,
    num_slab_voxels: u32,
    scale: f64,
) -> f64 {
    if let Some(value) = reported {
        return value;
    }
    if num_branches > 0 {
        (num_slab_voxels as f64 * scale) / num_branches as f64
    } else {
        0.0
    }
}

/// Falls back to slab count times scale, which slightly underestimates
/// because junction voxels carry no length there.
pub fn total_skeleton_length(
    avg_branch_length: f64,
    num_branches: u32,
    num_slab_voxels: u32,
    scale: f64,
) -> f64 {
    if avg_branch_length > 0.0 && num_branches > 0 {
        avg_branch_length * num_branches as f64
    } else {
        num_slab_voxels as f64 * scale
    }
}

pub fn branching_density(skeleton_area: f64, mask_area: f64) -> f64 {
    if mask_area > 0.0 {
        skeleton_area / mask_area
    } else {
        0.0
    }
}

pub fn analyze_mask(
    mask_path: &Path,
    pixel_size: f64,
    output_dir: &Path,
    measurer: &dyn ShapeMeasurer,
    skeletonizer: &dyn Skeletonizer,
    analyzer: &dyn SkeletonAnalyzer,
) -> Result<SkeletonMetrics> {
    let mask_file = mask_path
        .file_name()
        .context("Mask path has no file name")?
        .to_string_lossy()
        .to_string();

    let mask = open_mask(mask_path)?;
    let mask_area = foreground_count(&mask) as f64 * pixel_size * pixel_size;
    let shape = measurer.measure(&mask, pixel_size)?;

    let skeleton = skeletonizer.skeletonize(&mask);
    let name = cell_name(&mask_file);
    let skeleton_file = format!("{}_skeleton.tif", name);
    let skeleton_path = output_dir.join(&skeleton_file);
    skeleton
        .save(&skeleton_path)
        .with_context(|| format!("Failed to save skeleton: {}", skeleton_path.display()))?;

    let components = analyzer.analyze(&skeleton, pixel_size, TopologyOptions::default());
    if components.len() > 1 {
        warn!(
            "{}: mask contains {} separate skeletons; only the first is measured",
            mask_file,
            components.len()
        );
    }
    let topology = components.into_iter().next().unwrap_or_default();

    let avg_branch_length = average_branch_length(
        topology.average_branch_length,
        topology.num_branches,
        topology.num_slab_voxels,
        pixel_size,
    );
    let total_length = total_skeleton_length(
        avg_branch_length,
        topology.num_branches,
        topology.num_slab_voxels,
        pixel_size,
    );
    let skeleton_area = foreground_count(&skeleton) as f64 * pixel_size * pixel_size;

    Ok(SkeletonMetrics {
        cell_name: name,
        mask_file,
        skeleton_file,
        pixel_size_um: pixel_size,
        mask_area_um2: mask_area,
        mask_perimeter_um: shape.perimeter,
        mask_circularity: shape.circularity,
        mask_aspect_ratio: shape.aspect_ratio,
        mask_roundness: shape.roundness,
        mask_solidity: shape.solidity,
        num_branches: topology.num_branches,
        num_junctions: topology.num_junctions,
        num_end_points: topology.num_end_points,
        num_junction_voxels: topology.num_junction_voxels,
        num_slab_voxels: topology.num_slab_voxels,
        num_triple_points: topology.num_triple_points,
        num_quadruple_points: topology.num_quadruple_points,
        max_branch_length_um: topology.max_branch_length,
        avg_branch_length_um: avg_branch_length,
        longest_shortest_path_um: topology.longest_shortest_path,
        total_skeleton_length_um: total_length,
        skeleton_area_um2: skeleton_area,
        branching_density: branching_density(skeleton_area, mask_area),
    })
}

#[derive(Debug)]
pub struct SkeletonSummary {
    pub masks: usize,
    pub processed: usize,
    pub failed: usize,
    pub output: PathBuf,
}

pub fn run_skeleton(masks_dir: &Path, output_dir: &Path, pixel_size: f64) -> Result<SkeletonSummary> {
    if !pixel_size.is_finite() || pixel_size <= 0.0 {
        bail!("Pixel size must be a positive number of microns per pixel, got {}", pixel_size);
    }
    if !masks_dir.is_dir() {
        bail!("Masks folder not found: {}", masks_dir.display());
    }

    let pattern = masks_dir.join("*_mask.tif");
    let masks: Vec<PathBuf> = glob(&pattern.to_string_lossy())
        .context("Invalid mask search pattern")?
        .filter_map(Result::ok)
        .collect();
    if masks.is_empty() {
        bail!("No mask files found in {}", masks_dir.display());
    }
    info!("Found {} mask files", masks.len());
    info!("Pixel size: {} um/pixel", pixel_size);

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let progress_bar = ProgressBar::new(masks.len() as u64);
    progress_bar.set_style(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec}) {msg}")
        .expect("Failed to create progress bar template")
        .progress_chars("=> "));

    let measurer = ContourShapeMeasurer;
    let skeletonizer = MorphologicalThinner;
    let analyzer = GraphSkeletonAnalyzer;

    let mut results: Vec<SkeletonMetrics> = Vec::new();
    let mut failed = 0;
    for mask_path in &masks {
        let mask_name = mask_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| mask_path.display().to_string());
        progress_bar.set_message(mask_name.clone());

        match analyze_mask(mask_path, pixel_size, output_dir, &measurer, &skeletonizer, &analyzer) {
            Ok(metrics) => {
                info!(
                    "  {}: {} branches, {} junctions, {} slab voxels",
                    metrics.cell_name, metrics.num_branches, metrics.num_junctions, metrics.num_slab_voxels
                );
                results.push(metrics);
            }
            Err(e) => {
                error!("Error processing {}: {:#}. Skipping mask.", mask_path.display(), e);
                failed += 1;
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message(format!("{} masks processed, {} failed", results.len(), failed));

    if results.is_empty() {
        bail!("No masks processed successfully out of {}", masks.len());
    }

    let output = output_dir.join(RESULTS_FILE);
    write_results(&results, &output)?;
    info!("Results: {}", output.display());
    info!("Skeleton images saved to: {}", output_dir.display());

    Ok(SkeletonSummary {
        masks: masks.len(),
        processed: results.len(),
        failed,
        output,
    })
}

fn write_results(results: &[SkeletonMetrics], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for metrics in results {
        writer.serialize(metrics)?;
    }
    writer.flush()?;
    Ok(())
}
