use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::extract::{extract_file, PartialRecord};

pub const COMBINED_RESULTS_FILE: &str = "FracLac_Combined_Results.csv";

/// Run-wide accumulation target: one record per specimen, extended
/// field-by-field as batches are processed. Single writer, no sharing.
#[derive(Debug, Default)]
pub struct RecordTable {
    records: BTreeMap<String, PartialRecord>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, key: String, fields: PartialRecord) {
        self.records.entry(key).or_default().extend(fields);
    }

    pub fn merge_all(&mut self, partials: BTreeMap<String, PartialRecord>) {
        for (key, fields) in partials {
            self.merge(key, fields);
        }
    }

    pub fn get(&self, key: &str) -> Option<&PartialRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Output column order: `filename` first, then the sorted union of every
    /// canonical field seen during the run.
    pub fn column_order(&self) -> Vec<String> {
        let mut fields: BTreeSet<&str> = BTreeSet::new();
        for record in self.records.values() {
            fields.extend(record.keys().map(String::as_str));
        }
        let mut columns = vec!["filename".to_string()];
        columns.extend(fields.into_iter().map(String::from));
        columns
    }

    pub fn write_csv(&self, path: &Path) -> Result<usize> {
        let columns = self.column_order();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&columns)?;

        for (key, fields) in &self.records {
            let row: Vec<&str> = columns
                .iter()
                .map(|column| {
                    if column == "filename" {
                        key.as_str()
                    } else {
                        fields.get(column).map(String::as_str).unwrap_or("")
                    }
                })
                .collect();
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(self.records.len())
    }
}

fn is_summary_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("box") && lower.contains("count") && lower.contains("summary")
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}

/// FracLac output folders are the subfolders of the data root that contain a
/// box count summary. Returned in lexicographic name order, which fixes the
/// merge precedence: later folders win on conflicting fields.
pub fn find_batch_folders(data_root: &Path) -> Result<Vec<PathBuf>> {
    let mut folders = Vec::new();
    for path in sorted_entries(data_root)? {
        if !path.is_dir() {
            continue;
        }
        let has_summary = fs::read_dir(&path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| is_summary_name(&e.file_name().to_string_lossy()))
            })
            .unwrap_or(false);
        if has_summary {
            folders.push(path);
        }
    }
    Ok(folders)
}

pub fn find_summary_file(folder: &Path) -> Option<PathBuf> {
    sorted_entries(folder).ok()?.into_iter().find(|path| {
        path.file_name()
            .map(|name| {
                let name = name.to_string_lossy().to_lowercase();
                is_summary_name(&name) && name.ends_with(".txt")
            })
            .unwrap_or(false)
    })
}

#[derive(Debug)]
pub struct CombineSummary {
    pub folders: usize,
    pub skipped: usize,
    pub specimens: usize,
    pub measurements: usize,
    pub output: PathBuf,
}

pub fn run_combine(data_root: &Path, output_dir: &Path) -> Result<CombineSummary> {
    if !data_root.is_dir() {
        bail!("Data folder not found: {}", data_root.display());
    }

    let folders = find_batch_folders(data_root)?;
    if folders.is_empty() {
        bail!(
            "No FracLac output folders with box count summaries found under {}",
            data_root.display()
        );
    }
    info!("Found {} FracLac output folders", folders.len());

    let progress_bar = ProgressBar::new(folders.len() as u64);
    progress_bar.set_style(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec}) {msg}")
        .expect("Failed to create progress bar template")
        .progress_chars("=> "));

    let mut table = RecordTable::new();
    let mut skipped = 0;
    for folder in &folders {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| folder.display().to_string());
        progress_bar.set_message(folder_name.clone());

        match find_summary_file(folder) {
            Some(file) => match extract_file(&file) {
                Ok(partials) => {
                    info!("  {}: {} cells", folder_name, partials.len());
                    table.merge_all(partials);
                }
                Err(e) => {
                    error!("Error processing {}: {:#}. Skipping file.", file.display(), e);
                    skipped += 1;
                }
            },
            None => {
                warn!("  {}: no box count summary .txt file, skipping", folder_name);
                skipped += 1;
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message(format!(
        "{} folders processed, {} skipped",
        folders.len() - skipped,
        skipped
    ));

    if table.is_empty() {
        bail!("No data extracted from {} folders", folders.len());
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let output = output_dir.join(COMBINED_RESULTS_FILE);
    let specimens = table.write_csv(&output)?;
    let measurements = table.column_order().len() - 1;
    info!("Combined table: {} cells, {} measurements per cell", specimens, measurements);
    info!("Output file: {}", output.display());

    Ok(CombineSummary {
        folders: folders.len(),
        skipped,
        specimens,
        measurements,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> PartialRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fraclac_{}_{}", tag, std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn merge_extends_then_overwrites_fields() {
        let mut table = RecordTable::new();
        table.merge("key".into(), fields(&[("a", "1")]));
        table.merge("key".into(), fields(&[("b", "2")]));

        let record = table.get("key").unwrap();
        assert_eq!(record, &fields(&[("a", "1"), ("b", "2")]));

        table.merge("key".into(), fields(&[("a", "3")]));
        assert_eq!(table.get("key").unwrap()["a"], "3");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn filename_is_always_the_first_column() {
        let mut table = RecordTable::new();
        table.merge("z_mask.tif".into(), fields(&[("span_ratio", "2"), ("density", "1")]));
        table.merge("a_mask.tif".into(), fields(&[("lacunarity", "0.4")]));

        let columns = table.column_order();
        assert_eq!(columns[0], "filename");
        assert_eq!(columns[1..], ["density", "lacunarity", "span_ratio"]);
    }

    #[test]
    fn missing_fields_serialize_as_empty_cells() {
        let dir = temp_dir("write_csv");
        let mut table = RecordTable::new();
        table.merge("a_mask.tif".into(), fields(&[("density", "1")]));
        table.merge("b_mask.tif".into(), fields(&[("lacunarity", "0.4")]));

        let path = dir.join("combined.csv");
        table.write_csv(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();

        let mut lines = written.lines();
        assert_eq!(lines.next().unwrap(), "filename,density,lacunarity");
        assert_eq!(lines.next().unwrap(), "a_mask.tif,1,");
        assert_eq!(lines.next().unwrap(), "b_mask.tif,,0.4");
    }

    #[test]
    fn later_folders_win_on_conflicting_fields() {
        let root = temp_dir("precedence");
        let out = root.join("out");
        for (folder, value) in [("a_batch", "1.0"), ("b_batch", "2.0")] {
            let dir = root.join("data").join(folder);
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("Box Count Summary.txt"),
                format!("1. Scan\t6. Db\nx_mask.tif\t{}\n", value),
            )
            .unwrap();
        }

        let summary = run_combine(&root.join("data"), &out).unwrap();
        assert_eq!(summary.folders, 2);
        assert_eq!(summary.specimens, 1);

        let written = fs::read_to_string(summary.output).unwrap();
        assert!(written.contains("x_mask.tif,2.0"));
    }

    #[test]
    fn folders_without_summaries_do_not_qualify() {
        let root = temp_dir("qualify");
        let data = root.join("data");
        fs::create_dir_all(data.join("real")).unwrap();
        fs::create_dir_all(data.join("other")).unwrap();
        fs::write(data.join("real").join("box count summary.txt"), "1. Scan\n").unwrap();
        fs::write(data.join("other").join("notes.txt"), "").unwrap();

        let folders = find_batch_folders(&data).unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].ends_with("real"));
    }

    #[test]
    fn missing_data_root_is_fatal() {
        let root = temp_dir("missing");
        let result = run_combine(&root.join("does_not_exist"), &root.join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn an_unreadable_file_skips_without_aborting() {
        let root = temp_dir("skip");
        let data = root.join("data");
        let good = data.join("b_good");
        let bad = data.join("a_bad");
        fs::create_dir_all(&good).unwrap();
        fs::create_dir_all(&bad).unwrap();
        fs::write(
            good.join("box count summary.txt"),
            "1. Scan\t6. Db\ny_mask.tif\t1.7\n",
        )
        .unwrap();
        // Qualifies the folder but is not a readable .txt summary.
        fs::write(bad.join("Box Count Summary.csv"), "not the right file").unwrap();

        let summary = run_combine(&data, &root.join("out")).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.specimens, 1);
    }
}
