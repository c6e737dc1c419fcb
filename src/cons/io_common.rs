use std::path::Path;

/// The columns that are always read and written explicitly, and are never
/// carried as attributes.
pub const RESERVED_COLUMNS: [&str; 6] = [
    "reference",
    "period",
    "questioncode",
    "adjustedresponse",
    "imputation_marker",
    "status",
];

/// Resolves a path of the configuration relative to its directory.
pub fn resolve_path(root: &Path, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        path.to_string()
    } else {
        root.join(p).display().to_string()
    }
}

pub fn is_excel_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false)
}

/// The union of the lists, in order, without duplicates or reserved columns.
pub fn merge_columns(lists: &[&[String]]) -> Vec<String> {
    let mut res: Vec<String> = Vec::new();
    for l in lists.iter() {
        for c in l.iter() {
            if !RESERVED_COLUMNS.contains(&c.as_str()) && !res.contains(c) {
                res.push(c.clone());
            }
        }
    }
    res
}

/// Parses a nullable number. Empty cells and the usual spellings of missing
/// values are null.
pub fn parse_nullable_f64(s: &str) -> Option<Option<f64>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("na") {
        return Some(None);
    }
    s.parse::<f64>().ok().filter(|x| x.is_finite()).map(Some)
}

/// Parses an integer key. Numbers written as floats (`202201.0`) are accepted.
pub fn parse_key<T: TryFrom<u64>>(s: &str) -> Option<T> {
    let s = s.trim();
    let x: u64 = match s.parse::<u64>() {
        Ok(x) => x,
        Err(_) => {
            let f = s.parse::<f64>().ok()?;
            if f < 0.0 || f.fract() != 0.0 || !f.is_finite() {
                return None;
            }
            f as u64
        }
    };
    T::try_from(x).ok()
}

pub fn format_value(x: Option<f64>) -> String {
    x.map(|v| v.to_string()).unwrap_or_default()
}

/// Compares two CSV texts line by line, ignoring the line terminators.
pub fn normalize_lines(s: &str) -> String {
    s.lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}
