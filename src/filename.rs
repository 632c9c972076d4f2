use csv::StringRecord;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

// TIFF metadata fragments that FracLac concatenates onto the image title.
const METADATA_MARKERS: [&str; 3] = ["ImageDescription", "Software", "tifffile"];

const IDENTITY_PREFIX: &str = "1.";
const SYNTHETIC_PREFIX: &str = "unknown";

lazy_static! {
    static ref MASK_NAME_RE: Regex = Regex::new(r"(?i)(.+?_mask)\.?tif").unwrap();
    static ref TIFF_NAME_RE: Regex = Regex::new(r"(?i)([^/\\]+\.tif)").unwrap();
}

/// Recover the original mask filename from FracLac's corrupted title field.
///
/// When a metadata marker is present the text before it holds the filename
/// duplicated verbatim, so half of that prefix (by character count) is the
/// candidate name. Unequal-length duplication falls back to matching the
/// full raw value.
pub fn recover_filename(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        return SYNTHETIC_PREFIX.to_string();
    }
    // Synthetic keys round-trip unchanged.
    if value == SYNTHETIC_PREFIX || value.starts_with("unknown_") {
        return value.to_string();
    }

    for marker in METADATA_MARKERS {
        if let Some(pos) = value.find(marker) {
            let before = &value[..pos];
            let half_len = before.chars().count() / 2;
            let halved: String = before.chars().take(half_len).collect();
            if let Some(captures) = MASK_NAME_RE.captures(&halved) {
                return format!("{}.tif", &captures[1]);
            }
        }
    }

    if let Some(captures) = MASK_NAME_RE.captures(value) {
        return format!("{}.tif", &captures[1]);
    }

    if let Some(captures) = TIFF_NAME_RE.captures(value) {
        return captures[1].to_string();
    }

    let truncated: String = value.chars().take(30).collect();
    warn!("Could not recover a mask filename from '{}'; keying the row as 'unknown_{}'", value, truncated);
    format!("unknown_{}", truncated)
}

/// Pick the specimen key for one row: the primary identity column when the
/// file still has one, otherwise the first value that looks like it carries
/// a filename.
pub fn specimen_key_for_row(headers: &StringRecord, row: &StringRecord) -> String {
    for (header, value) in headers.iter().zip(row.iter()) {
        if header.starts_with(IDENTITY_PREFIX) {
            return recover_filename(value);
        }
    }

    for value in row.iter() {
        let lower = value.to_lowercase();
        if lower.contains("_mask") || lower.contains(".tif") {
            return recover_filename(value);
        }
    }

    warn!("Row carries no identity column and no filename-bearing value; keying it as 'unknown'");
    SYNTHETIC_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_halving_resolves_duplicated_name() {
        let raw = "xyz_mask.tif_mask.tifImageDescriptionjunk";
        assert_eq!(recover_filename(raw), "xyz_mask.tif");
    }

    #[test]
    fn equal_length_duplication_resolves_from_the_halved_text() {
        let raw = "abc_mask.tifabc_mask.tifSoftware{\"shape\": [512, 512]}";
        assert_eq!(recover_filename(raw), "abc_mask.tif");
    }

    #[test]
    fn clean_mask_name_passes_through() {
        assert_eq!(recover_filename("sample_42_mask.tif"), "sample_42_mask.tif");
    }

    #[test]
    fn missing_dot_before_extension_is_repaired() {
        assert_eq!(recover_filename("cell7_masktif"), "cell7_mask.tif");
    }

    #[test]
    fn loose_match_returns_the_tif_name_verbatim() {
        assert_eq!(recover_filename(r"C:\scans\img9.tif"), "img9.tif");
    }

    #[test]
    fn unrecoverable_value_gets_a_synthetic_key() {
        let raw = "0123456789012345678901234567890123456789";
        assert_eq!(
            recover_filename(raw),
            "unknown_012345678901234567890123456789"
        );
    }

    #[test]
    fn recovery_is_idempotent_on_its_own_outputs() {
        let inputs = [
            "xyz_mask.tif_mask.tifImageDescriptionjunk",
            "abc_mask.tifabc_mask.tifSoftware junk",
            "sample_42_mask.tif",
            r"C:\scans\img9.tif",
            "no filename in here at all",
            "",
        ];
        for input in inputs {
            let once = recover_filename(input);
            assert_eq!(recover_filename(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(recover_filename("XYZ_MASK.TIF"), "XYZ_MASK.tif");
    }

    #[test]
    fn identity_column_takes_priority() {
        let headers = StringRecord::from(vec!["1. Scan", "6. Db", "Comment"]);
        let row = StringRecord::from(vec!["a_mask.tif", "1.5", "b_mask.tif"]);
        assert_eq!(specimen_key_for_row(&headers, &row), "a_mask.tif");
    }

    #[test]
    fn values_are_scanned_in_column_order() {
        let headers = StringRecord::from(vec!["x", "y", "z"]);
        let row = StringRecord::from(vec!["no tokens here", "c_mask.tif", "d_mask.tif"]);
        assert_eq!(specimen_key_for_row(&headers, &row), "c_mask.tif");
    }

    #[test]
    fn row_without_any_identity_keys_as_unknown() {
        let headers = StringRecord::from(vec!["x", "y"]);
        let row = StringRecord::from(vec!["-", "3.2"]);
        assert_eq!(specimen_key_for_row(&headers, &row), "unknown");
    }
}
