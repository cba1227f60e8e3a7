//! Coverage tree loaders for deltacov.
//!
//! Two input formats produce a [`Bundle`]:
//!
//! - JSON, the serde form of the coverage model, read with
//!   [`parse_bundle_json`] / [`load_bundle_json`] and written back with
//!   [`bundle_to_json`].
//! - LCOV tracefiles, parsed with [`parse_lcov`], merged with
//!   [`merge_lcov`] and turned into a tree of source-file units with
//!   [`bundle_from_lcov`].

use std::collections::BTreeMap;
use std::path::Path;

use deltacov_model::{Bundle, LineStatus, Package, SourceFileNode};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while loading coverage input.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The coverage file could not be read.
    #[error("failed to read coverage file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The JSON coverage tree is malformed.
    #[error("invalid coverage JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid format in an LCOV file.
    #[error("Invalid LCOV format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// JSON
// ============================================================================

/// Parse a coverage tree from its JSON form.
pub fn parse_bundle_json(text: &str) -> Result<Bundle, CoverageError> {
    Ok(serde_json::from_str(text)?)
}

/// Read and parse a JSON coverage tree from disk.
pub fn load_bundle_json(path: &Path) -> Result<Bundle, CoverageError> {
    let text = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_bundle_json(&text)
}

/// Serialize a coverage tree as pretty-printed JSON.
pub fn bundle_to_json(bundle: &Bundle) -> Result<String, CoverageError> {
    Ok(serde_json::to_string_pretty(bundle)?)
}

// ============================================================================
// LCOV Types
// ============================================================================

/// Line and branch data of one LCOV `SF` record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcovFile {
    /// Line number (1-indexed) to hit count.
    pub hits: BTreeMap<u32, u32>,
    /// `(line, block, branch)` to taken count; `-` is recorded as 0.
    pub branches: BTreeMap<(u32, String, String), u32>,
}

impl LcovFile {
    /// Status of `line`, combining its hit count with its branch outcomes.
    pub fn status(&self, line: u32) -> LineStatus {
        match self.hits.get(&line) {
            None => LineStatus::Empty,
            Some(0) => LineStatus::NotCovered,
            Some(_) => {
                let missed_branch = self
                    .branches
                    .range((line, String::new(), String::new())..)
                    .take_while(|((l, _, _), _)| *l == line)
                    .any(|(_, taken)| *taken == 0);
                if missed_branch {
                    LineStatus::PartlyCovered
                } else {
                    LineStatus::FullyCovered
                }
            }
        }
    }
}

/// Map of normalized source paths to their LCOV data.
pub type LcovMap = BTreeMap<String, LcovFile>;

// ============================================================================
// LCOV Parsing
// ============================================================================

/// Normalize an LCOV `SF` path: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Parse an LCOV format string.
///
/// LCOV format records:
/// - `SF:<source file>` - Source file path (starts a record)
/// - `DA:<line>,<hits>[,<checksum>]` - Line coverage data
/// - `BRDA:<line>,<block>,<branch>,<taken>` - Branch coverage data
/// - `end_of_record` - Ends the current record
///
/// # Examples
///
/// ```
/// use deltacov_adapters_coverage::parse_lcov;
///
/// let lcov = "SF:src/main/java/com/x/Foo.java\nDA:1,1\nDA:2,0\nend_of_record\n";
/// let map = parse_lcov(lcov).unwrap();
/// let file = map.get("src/main/java/com/x/Foo.java").unwrap();
/// assert_eq!(file.hits.get(&2), Some(&0));
/// ```
pub fn parse_lcov(text: &str) -> Result<LcovMap, CoverageError> {
    let mut map: LcovMap = BTreeMap::new();
    let mut current: Option<(String, LcovFile)> = None;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        let line_num = idx + 1;

        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            if let Some((file, data)) = current.take() {
                merge_file(&mut map, file, data);
            }
            current = Some((normalize_path(path), LcovFile::default()));
            continue;
        }

        if let Some(data) = line.strip_prefix("DA:") {
            let (_, file) = current.as_mut().ok_or_else(|| {
                CoverageError::InvalidFormat(format!(
                    "DA record at line {line_num} without preceding SF record"
                ))
            })?;
            let parts: Vec<&str> = data.split(',').collect();
            if parts.len() < 2 {
                return Err(CoverageError::InvalidFormat(format!(
                    "Invalid DA format at line {line_num}: expected 'DA:<line>,<hits>', got '{line}'"
                )));
            }
            let number = parse_number(parts[0], "line number", line_num)?;
            let hits = parse_number(parts[1], "hit count", line_num)?;
            let entry = file.hits.entry(number).or_insert(0);
            *entry = (*entry).max(hits);
            continue;
        }

        if let Some(data) = line.strip_prefix("BRDA:") {
            let (_, file) = current.as_mut().ok_or_else(|| {
                CoverageError::InvalidFormat(format!(
                    "BRDA record at line {line_num} without preceding SF record"
                ))
            })?;
            let parts: Vec<&str> = data.split(',').collect();
            if parts.len() < 4 {
                return Err(CoverageError::InvalidFormat(format!(
                    "Invalid BRDA format at line {line_num}: got '{line}'"
                )));
            }
            let number = parse_number(parts[0], "line number", line_num)?;
            let taken = if parts[3] == "-" {
                0
            } else {
                parse_number(parts[3], "taken count", line_num)?
            };
            let key = (number, parts[1].to_string(), parts[2].to_string());
            let entry = file.branches.entry(key).or_insert(0);
            *entry = (*entry).max(taken);
            continue;
        }

        if line == "end_of_record" {
            if let Some((file, data)) = current.take() {
                merge_file(&mut map, file, data);
            }
            continue;
        }

        // TN, FN, FNDA, LF, LH, BRF, BRH carry nothing the tree needs.
    }

    if let Some((file, data)) = current {
        merge_file(&mut map, file, data);
    }

    Ok(map)
}

fn parse_number(value: &str, what: &str, line_num: usize) -> Result<u32, CoverageError> {
    value.trim().parse().map_err(|_| {
        CoverageError::InvalidFormat(format!("Invalid {what} at line {line_num}: '{value}'"))
    })
}

fn merge_file(map: &mut LcovMap, path: String, data: LcovFile) {
    let entry = map.entry(path).or_default();
    for (line, hits) in data.hits {
        let existing = entry.hits.entry(line).or_insert(hits);
        *existing = (*existing).max(hits);
    }
    for (key, taken) in data.branches {
        let existing = entry.branches.entry(key).or_insert(taken);
        *existing = (*existing).max(taken);
    }
}

/// Merge several LCOV maps: lines and branches are unioned, counts take the
/// maximum.
pub fn merge_lcov(maps: Vec<LcovMap>) -> LcovMap {
    let mut merged: LcovMap = BTreeMap::new();
    for map in maps {
        for (path, data) in map {
            merge_file(&mut merged, path, data);
        }
    }
    merged
}

// ============================================================================
// LCOV to Coverage Tree
// ============================================================================

/// Split a source path into (slash-separated package, file name).
///
/// The package starts after `source_root_marker` when the path contains it,
/// otherwise it is the path's directory.
fn split_package(path: &str, source_root_marker: &str) -> (String, String) {
    let unit_path = match path.find(source_root_marker) {
        Some(pos) if !source_root_marker.is_empty() => &path[pos + source_root_marker.len()..],
        _ => path,
    };
    match unit_path.rsplit_once('/') {
        Some((package, name)) => (package.to_string(), name.to_string()),
        None => (String::new(), unit_path.to_string()),
    }
}

/// Build a coverage tree with one source-file unit per LCOV record.
///
/// Counters are computed from the line detail.
pub fn bundle_from_lcov(map: &LcovMap, name: &str, source_root_marker: &str) -> Bundle {
    let mut packages: BTreeMap<String, Package> = BTreeMap::new();

    for (path, data) in map {
        let (package_name, file_name) = split_package(path, source_root_marker);
        if !path.contains(source_root_marker) {
            log::debug!("LCOV source '{}' lies outside '{}'", path, source_root_marker);
        }

        let mut source_file = SourceFileNode::new(package_name.clone(), file_name);
        for &line in data.hits.keys() {
            source_file.lines.insert(line, data.status(line));
        }

        packages
            .entry(package_name.clone())
            .or_insert_with(|| Package::new(package_name))
            .source_files
            .push(source_file);
    }

    let mut bundle = Bundle::new(name);
    bundle.packages = packages.into_values().collect();
    bundle.recompute_counters();
    bundle
}

// ============================================================================
// Tests
// ============================================================================


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_lcov_never_panics(text in ".*") {
            let _ = parse_lcov(&text);
        }

        #[test]
        fn bundle_counter_matches_lines(hits in prop::collection::btree_map(1u32..200, 0u32..3, 0..40)) {
            let mut lcov = String::from("SF:src/main/java/p/A.java\n");
            for (line, count) in &hits {
                lcov.push_str(&format!("DA:{line},{count}\n"));
            }
            lcov.push_str("end_of_record\n");

            let bundle = bundle_from_lcov(&parse_lcov(&lcov).unwrap(), "b", "src/main/java/");
            let missed = hits.values().filter(|c| **c == 0).count() as u32;
            prop_assert_eq!(bundle.line_counter.missed, missed);
            prop_assert_eq!(bundle.line_counter.total(), hits.len() as u32);
        }
    }
}
