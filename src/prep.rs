use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use crate::imaging::{binarize, open_mask};

pub const IMAGES_FOLDER: &str = "FracLacImages";
pub const BATCH_FOLDER: &str = "FracLacBatch";
pub const DATA_FOLDER: &str = "FracLacData";

#[derive(Debug)]
pub struct PrepSummary {
    pub cleaned: usize,
    pub failed: usize,
    pub batches: usize,
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

fn find_tiff_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_tiff(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Clean raw masks to single-channel binary TIFFs and chunk them into
/// fixed-size batch folders ready for FracLac. Also creates the empty
/// FracLacData folder that collects the plugin's outputs.
pub fn run_prep(input_dir: &Path, output_dir: &Path, batch_size: usize) -> Result<PrepSummary> {
    if batch_size == 0 {
        bail!("Batch size must be at least 1");
    }
    if !input_dir.is_dir() {
        bail!("Input folder not found: {}", input_dir.display());
    }

    let files = find_tiff_files(input_dir)?;
    if files.is_empty() {
        bail!("No TIFF files found in {}", input_dir.display());
    }
    info!("Found {} TIFF files", files.len());

    let images_dir = output_dir.join(IMAGES_FOLDER);
    let batch_root = output_dir.join(BATCH_FOLDER);
    let data_dir = batch_root.join(DATA_FOLDER);
    for dir in [&images_dir, &batch_root, &data_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let progress_bar = ProgressBar::new(files.len() as u64);
    progress_bar.set_style(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec}) {msg}")
        .expect("Failed to create progress bar template")
        .progress_chars("=> "));

    let mut cleaned: Vec<PathBuf> = Vec::new();
    let mut failed = 0;
    for path in &files {
        match clean_mask(path, &images_dir) {
            Ok(cleaned_path) => cleaned.push(cleaned_path),
            Err(e) => {
                error!("Error cleaning {}: {:#}", path.display(), e);
                failed += 1;
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message(format!("{} cleaned, {} failed", cleaned.len(), failed));

    if cleaned.is_empty() {
        bail!("No mask files could be cleaned");
    }

    let batches = cleaned.chunks(batch_size).count();
    info!("Creating {} batches of up to {} files", batches, batch_size);
    for (index, chunk) in cleaned.chunks(batch_size).enumerate() {
        let batch_dir = batch_root.join(format!("Batch_{:03}", index + 1));
        fs::create_dir_all(&batch_dir)
            .with_context(|| format!("Failed to create {}", batch_dir.display()))?;
        for file in chunk {
            let name = file.file_name().context("Cleaned file has no name")?;
            fs::copy(file, batch_dir.join(name))
                .with_context(|| format!("Failed to copy {} into {}", file.display(), batch_dir.display()))?;
        }
    }

    info!("Cleaned masks: {}", images_dir.display());
    info!("Batch folders: {}", batch_root.display());
    info!("FracLac outputs collect in: {}", data_dir.display());

    Ok(PrepSummary {
        cleaned: cleaned.len(),
        failed,
        batches,
    })
}

fn clean_mask(path: &Path, images_dir: &Path) -> Result<PathBuf> {
    let mask = open_mask(path)?;
    let binary = binarize(&mask);
    let name = path.file_name().context("Mask file has no name")?;
    let output = images_dir.join(name);
    binary
        .save(&output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fraclac_prep_{}_{}", tag, std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_mask(dir: &Path, name: &str) {
        let mut img = GrayImage::new(8, 8);
        for x in 2..6 {
            for y in 2..6 {
                img.put_pixel(x, y, Luma([17]));
            }
        }
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn cleans_and_batches_masks() {
        let root = temp_dir("batches");
        let input = root.join("raw");
        fs::create_dir_all(&input).unwrap();
        for name in ["a_mask.tif", "b_mask.tif", "c_mask.tif"] {
            write_mask(&input, name);
        }

        let summary = run_prep(&input, &root.join("out"), 2).unwrap();
        assert_eq!(summary.cleaned, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.batches, 2);

        let batch_root = root.join("out").join(BATCH_FOLDER);
        assert!(batch_root.join(DATA_FOLDER).is_dir());
        assert!(batch_root.join("Batch_001").join("a_mask.tif").is_file());
        assert!(batch_root.join("Batch_002").join("c_mask.tif").is_file());
    }

    #[test]
    fn cleaned_masks_are_binary() {
        let root = temp_dir("binary");
        let input = root.join("raw");
        fs::create_dir_all(&input).unwrap();
        write_mask(&input, "a_mask.tif");

        run_prep(&input, &root.join("out"), 25).unwrap();

        let cleaned = image::open(root.join("out").join(IMAGES_FOLDER).join("a_mask.tif"))
            .unwrap()
            .to_luma8();
        assert!(cleaned.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(cleaned.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn empty_input_folder_is_fatal() {
        let root = temp_dir("empty");
        let input = root.join("raw");
        fs::create_dir_all(&input).unwrap();
        assert!(run_prep(&input, &root.join("out"), 25).is_err());
    }
}
