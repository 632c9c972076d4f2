use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::columns::map_columns;
use crate::filename::specimen_key_for_row;

pub type PartialRecord = BTreeMap<String, String>;

const NOT_CALCULATED: &str = "Not Calculated";

/// Extract per-specimen partial records from one tab-delimited FracLac
/// box count summary. Rows sharing a specimen key extend one record.
pub fn extract_from_reader<R: io::Read>(input: R) -> Result<BTreeMap<String, PartialRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers().context("Failed to read header row")?.clone();
    let bindings = map_columns(&headers);
    if bindings.is_empty() {
        debug!("No canonical columns matched among {} headers", headers.len());
    }

    let mut records: BTreeMap<String, PartialRecord> = BTreeMap::new();
    for (line, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Error reading line {}: {}", line + 2, e);
                continue;
            }
        };

        let key = specimen_key_for_row(&headers, &row);
        let record = records.entry(key).or_default();
        for binding in &bindings {
            if let Some(value) = row.get(binding.column) {
                if !value.is_empty() && value != NOT_CALCULATED && !value.trim().is_empty() {
                    record.insert(binding.canonical.to_string(), value.to_string());
                }
            }
        }
    }

    Ok(records)
}

pub fn extract_file(path: &Path) -> Result<BTreeMap<String, PartialRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    extract_from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to extract records from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_sharing_a_key_extend_one_record() {
        let data = "1. Scan\t6. Db\t87. Lambda\n\
                    foo_mask.tif\t1.423\tNot Calculated\n\
                    foo_mask.tif\t\t0.52\n";
        let records = extract_from_reader(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records["foo_mask.tif"];
        assert_eq!(record["fractal_dimension"], "1.423");
        assert_eq!(record["lacunarity"], "0.52");
    }

    #[test]
    fn empty_not_calculated_and_whitespace_values_are_skipped() {
        let data = "1. Scan\t6. Db\t87. Lambda\t131. Density\n\
                    a_mask.tif\tNot Calculated\t   \t\n";
        let records = extract_from_reader(data.as_bytes()).unwrap();

        assert!(records["a_mask.tif"].is_empty());
    }

    #[test]
    fn kept_values_are_copied_verbatim() {
        let data = "1. Scan\t6. Db\n\
                    b_mask.tif\t 1.50 \n";
        let records = extract_from_reader(data.as_bytes()).unwrap();

        assert_eq!(records["b_mask.tif"]["fractal_dimension"], " 1.50 ");
    }

    #[test]
    fn corrupted_identity_values_key_to_the_recovered_name() {
        let data = "1. Scan\t6. Db\n\
                    xyz_mask.tif_mask.tifImageDescriptionjunk\t1.1\n";
        let records = extract_from_reader(data.as_bytes()).unwrap();

        assert!(records.contains_key("xyz_mask.tif"));
    }

    #[test]
    fn short_rows_contribute_fewer_fields() {
        let data = "1. Scan\t6. Db\t87. Lambda\n\
                    c_mask.tif\t1.2\n";
        let records = extract_from_reader(data.as_bytes()).unwrap();

        let record = &records["c_mask.tif"];
        assert_eq!(record.len(), 1);
        assert_eq!(record["fractal_dimension"], "1.2");
    }
}
