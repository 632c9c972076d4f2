use csv::StringRecord;

// FracLac numbers its output columns, but the numeric prefixes are the only
// stable part of the header text across plugin versions.
pub const CANONICAL_COLUMNS: [(&str, &str); 17] = [
    ("6.", "fractal_dimension"),
    ("87.", "lacunarity"),
    ("131.", "density"),
    ("132.", "span_ratio"),
    ("134.", "maximum_span_across_hull"),
    ("135.", "convex_hull_area"),
    ("136.", "convex_hull_perimeter"),
    ("137.", "convex_hull_circularity"),
    ("140.", "maximum_radius_from_hulls_centre_of_mass"),
    ("141.", "max_min_radii"),
    ("142.", "cv_for_all_radii"),
    ("143.", "mean_radius"),
    ("145.", "diameter_of_bounding_circle"),
    ("146.", "maximum_radius_from_circles_centre"),
    ("147.", "max_min_radii_from_circles_centre"),
    ("148.", "cv_for_all_radii_from_circles_centre"),
    ("149.", "mean_radius_from_circles_centre"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub column: usize,
    pub canonical: &'static str,
}

/// Resolve one file's header row against the canonical column table.
/// Each canonical name binds the first header starting with its prefix;
/// a header bound once is never rebound.
pub fn map_columns(headers: &StringRecord) -> Vec<ColumnBinding> {
    let mut bound = vec![false; headers.len()];
    let mut bindings = Vec::new();

    for (prefix, canonical) in CANONICAL_COLUMNS {
        for (column, header) in headers.iter().enumerate() {
            if bound[column] {
                continue;
            }
            if header.starts_with(prefix) {
                bound[column] = true;
                bindings.push(ColumnBinding { column, canonical });
                break;
            }
        }
    }

    bindings
}
