//! Diff parsing adapters for deltacov.
//!
//! Two parsers turn revision-control output into change facts:
//!
//! - [`parse_name_status`] reads a name-status listing and yields one
//!   [`ChangedFile`] per added or modified source file.
//! - [`parse_changed_lines`] reads a full-context unified diff of a single
//!   file and yields the head-revision line numbers that were added.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use deltacov_types::{ChangeType, ChangedFile};

// ============================================================================
// Options
// ============================================================================

/// Default path segment that marks the root of the tracked source tree.
pub const DEFAULT_SOURCE_ROOT_MARKER: &str = "src/main/java/";

/// Default extension of tracked source files.
pub const DEFAULT_SOURCE_EXTENSION: &str = "java";

/// Controls which name-status entries become changed files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameStatusOptions {
    /// Path segment after which the package path starts.
    pub source_root_marker: String,
    /// Source file extension, with or without a leading dot.
    pub source_extension: String,
}

impl Default for NameStatusOptions {
    fn default() -> Self {
        Self {
            source_root_marker: DEFAULT_SOURCE_ROOT_MARKER.to_string(),
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }
}

impl NameStatusOptions {
    /// The extension with exactly one leading dot, e.g. `.java`.
    pub fn dotted_extension(&self) -> String {
        format!(".{}", self.source_extension.trim_start_matches('.'))
    }
}

// ============================================================================
// Types
// ============================================================================

/// Why a name-status entry did not become a changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The file was deleted in the head revision.
    Deleted,
    /// The path does not have the tracked source extension.
    NotSource,
    /// The path lies outside the tracked source root.
    OutsideSourceRoot,
    /// Fewer than two tab-separated fields.
    TooFewFields,
    /// Status token not recognized.
    UnknownStatus,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Deleted => "deleted",
            SkipReason::NotSource => "not_source",
            SkipReason::OutsideSourceRoot => "outside_source_root",
            SkipReason::TooFewFields => "too_few_fields",
            SkipReason::UnknownStatus => "unknown_status",
        }
    }

    /// Returns true for entries that indicate malformed input rather than an
    /// ordinary out-of-scope file.
    pub fn is_malformed(&self) -> bool {
        matches!(self, SkipReason::TooFewFields | SkipReason::UnknownStatus)
    }
}

/// A name-status entry that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub line: String,
    pub reason: SkipReason,
}

/// Result of parsing a name-status listing with metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameStatusResult {
    /// Retained entries, in listing order.
    pub files: Vec<ChangedFile>,
    /// Skipped entries, in listing order.
    pub skipped: Vec<SkippedEntry>,
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Normalize a path reported by source control.
///
/// - Unquotes C-style quoted paths (`"src/ma\303\261ana.java"`)
/// - Converts backslashes to forward slashes
/// - Removes leading `./`
///
/// # Examples
///
/// ```
/// use deltacov_adapters_diff::normalize_path;
///
/// assert_eq!(normalize_path("./src/main/java/A.java"), "src/main/java/A.java");
/// assert_eq!(normalize_path("src\\main\\java\\A.java"), "src/main/java/A.java");
/// assert_eq!(normalize_path("\"src/a b.java\""), "src/a b.java");
/// ```
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = unquote(path).unwrap_or_else(|| path.to_string());
    let mut normalized = path.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Undo git's C-style path quoting. Returns `None` if `path` is not quoted.
fn unquote(path: &str) -> Option<String> {
    let inner = path.strip_prefix('"')?.strip_suffix('"')?;
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('"') => bytes.push(b'"'),
            Some('\\') => bytes.push(b'\\'),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => {
                bytes.push(b'\\');
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }

    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Derive the dot-qualified unit name for a repo-relative path.
///
/// Returns `None` when the path lacks the source root marker or the
/// extension.
///
/// # Examples
///
/// ```
/// use deltacov_adapters_diff::{NameStatusOptions, qualified_name};
///
/// let options = NameStatusOptions::default();
/// assert_eq!(
///     qualified_name("svc/src/main/java/com/x/Foo.java", &options),
///     Some("com.x.Foo".to_string())
/// );
/// assert_eq!(qualified_name("src/test/java/com/x/FooTest.java", &options), None);
/// ```
pub fn qualified_name(path: &str, options: &NameStatusOptions) -> Option<String> {
    let marker = options.source_root_marker.replace('\\', "/");
    let pos = path.find(&marker)?;
    let unit_path = &path[pos + marker.len()..];
    let stem = unit_path.strip_suffix(&options.dotted_extension())?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace('/', "."))
}

// ============================================================================
// Name-Status Parsing
// ============================================================================

/// Classify a name-status token.
///
/// Single-letter (`M`, `R100`) and word (`Modified`) forms are both accepted;
/// the first letter decides. `Ok(None)` marks a deletion.
fn classify_status(token: &str) -> Result<Option<ChangeType>, SkipReason> {
    match token.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('A') => Ok(Some(ChangeType::Added)),
        Some('M' | 'T' | 'R' | 'C') => Ok(Some(ChangeType::Modified)),
        Some('D') => Ok(None),
        _ => Err(SkipReason::UnknownStatus),
    }
}

/// Parse a name-status listing into changed source files.
///
/// # Examples
///
/// ```
/// use deltacov_adapters_diff::{NameStatusOptions, parse_name_status};
/// use deltacov_types::ChangeType;
///
/// let listing = "M\tsrc/main/java/com/x/Foo.java\nD\tsrc/main/java/com/x/Bar.java\n";
/// let files = parse_name_status(listing, &NameStatusOptions::default());
///
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].qualified_name, "com.x.Foo");
/// assert_eq!(files[0].change_type, ChangeType::Modified);
/// ```
pub fn parse_name_status(text: &str, options: &NameStatusOptions) -> Vec<ChangedFile> {
    parse_name_status_with_meta(text, options).files
}

/// Parse a name-status listing, also reporting every skipped entry.
pub fn parse_name_status_with_meta(text: &str, options: &NameStatusOptions) -> NameStatusResult {
    let extension = options.dotted_extension();
    let mut result = NameStatusResult::default();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_entry(line, options, &extension) {
            Ok(file) => result.files.push(file),
            Err(reason) => {
                if reason.is_malformed() {
                    log::warn!("skipping name-status entry '{}': {}", line, reason.as_str());
                } else {
                    log::debug!("skipping name-status entry '{}': {}", line, reason.as_str());
                }
                result.skipped.push(SkippedEntry {
                    line: line.to_string(),
                    reason,
                });
            }
        }
    }

    result
}

fn parse_entry(
    line: &str,
    options: &NameStatusOptions,
    extension: &str,
) -> Result<ChangedFile, SkipReason> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 2 {
        return Err(SkipReason::TooFewFields);
    }

    let change_type = classify_status(fields[0])?.ok_or(SkipReason::Deleted)?;

    // Renames and copies list the source first and the destination last.
    // The destination names the unit; the source is kept so the per-file
    // diff can pair both sides instead of treating the file as new.
    let raw_path = fields[fields.len() - 1];
    let relative_path = normalize_path(raw_path);
    if relative_path.is_empty() {
        return Err(SkipReason::TooFewFields);
    }
    let previous_path = if fields.len() > 2 {
        Some(normalize_path(fields[fields.len() - 2])).filter(|p| !p.is_empty())
    } else {
        None
    };
    if !relative_path.ends_with(extension) {
        return Err(SkipReason::NotSource);
    }

    let qualified_name =
        qualified_name(&relative_path, options).ok_or(SkipReason::OutsideSourceRoot)?;

    Ok(ChangedFile {
        qualified_name,
        relative_path,
        change_type,
        previous_path,
    })
}

// ============================================================================
// Full-Context Hunk Parsing
// ============================================================================

/// Parse a full-context unified diff of one file into changed line numbers.
///
/// Everything before the first hunk header is skipped. After it, every
/// context or added line advances a running head-revision line counter and
/// added lines record the counter. Removed lines and `\ No newline` markers
/// do not exist in the head revision and are ignored. A later hunk header
/// re-bases the counter on its `+start`.
///
/// Input without any hunk header yields an empty set.
///
/// # Examples
///
/// ```
/// use deltacov_adapters_diff::parse_changed_lines;
///
/// let diff = "diff --git a/A.java b/A.java\n--- a/A.java\n+++ b/A.java\n@@ -1,3 +1,3 @@\n a\n-b\n+c\n d\n";
/// let lines = parse_changed_lines(diff);
/// assert_eq!(lines.into_iter().collect::<Vec<_>>(), vec![2]);
/// ```
pub fn parse_changed_lines(text: &str) -> BTreeSet<u32> {
    let text = text.replace("\r\n", "\n");
    let mut changed = BTreeSet::new();
    let mut lines = text.lines();

    if !lines.by_ref().any(|line| line.starts_with("@@")) {
        return changed;
    }

    let mut current_line: u32 = 0;
    for line in lines {
        if line.starts_with("@@") {
            match parse_hunk_header(line) {
                Some(new_start) => current_line = new_start.saturating_sub(1),
                None => log::warn!("ignoring malformed hunk header '{}'", line),
            }
            continue;
        }
        if line.starts_with("diff ") {
            log::warn!("full-context diff contained a second file header, stopping");
            break;
        }

        match line.as_bytes().first() {
            Some(b'-') | Some(b'\\') => {}
            Some(b'+') => {
                current_line = current_line.saturating_add(1);
                changed.insert(current_line);
            }
            _ => current_line = current_line.saturating_add(1),
        }
    }

    changed
}

/// Parse a hunk header and return the new-side starting line number.
///
/// Hunk headers have the format: `@@ -old_start,old_count +new_start,new_count @@ optional context`
/// or: `@@ -old_start +new_start @@ optional context` (count defaults to 1)
fn parse_hunk_header(line: &str) -> Option<u32> {
    line.split_whitespace()
        .skip(1)
        .take_while(|part| !part.starts_with("@@"))
        .find_map(|part| part.strip_prefix('+'))
        .and_then(|new_part| new_part.split(',').next())
        .and_then(|start| start.parse().ok())
}

// ============================================================================
// Range Collapsing
// ============================================================================

/// Collapse a set of line numbers into sorted, non-adjacent inclusive ranges.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use deltacov_adapters_diff::collapse_lines;
///
/// let lines = BTreeSet::from([1, 2, 3, 7, 9, 10]);
/// assert_eq!(collapse_lines(&lines), vec![1..=3, 7..=7, 9..=10]);
/// ```
pub fn collapse_lines(lines: &BTreeSet<u32>) -> Vec<RangeInclusive<u32>> {
    let mut ranges: Vec<RangeInclusive<u32>> = Vec::new();

    for &line in lines {
        if let Some(last) = ranges.last_mut()
            && last.end().saturating_add(1) == line
        {
            *last = *last.start()..=line;
            continue;
        }
        ranges.push(line..=line);
    }

    ranges
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn hunk_line() -> impl Strategy<Value = String> {
        (prop::sample::select(vec![' ', '+', '-']), "[a-z ]{0,8}")
            .prop_map(|(marker, body)| format!("{marker}{body}"))
    }

    proptest! {
        #[test]
        fn changed_lines_within_new_file(body in prop::collection::vec(hunk_line(), 0..60)) {
            let diff = format!("--- a/A.java\n+++ b/A.java\n@@ -1 +1 @@\n{}\n", body.join("\n"));
            let new_file_len = body.iter().filter(|l| !l.starts_with('-')).count() as u32;
            let changed = parse_changed_lines(&diff);

            for line in &changed {
                prop_assert!(*line >= 1 && *line <= new_file_len);
            }
        }

        #[test]
        fn changed_lines_match_added_positions(body in prop::collection::vec(hunk_line(), 0..60)) {
            let diff = format!("@@ -1 +1 @@\n{}\n", body.join("\n"));

            let mut expected = Vec::new();
            let mut counter = 0u32;
            for line in &body {
                if line.starts_with('-') {
                    continue;
                }
                counter += 1;
                if line.starts_with('+') {
                    expected.push(counter);
                }
            }

            let changed: Vec<u32> = parse_changed_lines(&diff).into_iter().collect();
            prop_assert_eq!(changed, expected);
        }

        #[test]
        fn removals_never_change_result(body in prop::collection::vec(hunk_line(), 0..40)) {
            let with_removals = format!("@@ -1 +1 @@\n{}\n", body.join("\n"));
            let without: Vec<&str> = body
                .iter()
                .map(String::as_str)
                .filter(|l| !l.starts_with('-'))
                .collect();
            let without_removals = format!("@@ -1 +1 @@\n{}\n", without.join("\n"));

            prop_assert_eq!(
                parse_changed_lines(&with_removals),
                parse_changed_lines(&without_removals)
            );
        }

        #[test]
        fn collapse_lines_covers_exactly_input(values in prop::collection::btree_set(1u32..500, 0..60)) {
            let ranges = collapse_lines(&values);
            let flattened: BTreeSet<u32> = ranges.iter().flat_map(|r| r.clone()).collect();
            prop_assert_eq!(&flattened, &values);
            for window in ranges.windows(2) {
                prop_assert!(window[0].end() + 1 < *window[1].start());
            }
        }

        #[test]
        fn name_status_never_panics(text in ".*") {
            let _ = parse_name_status(&text, &NameStatusOptions::default());
        }

        #[test]
        fn normalize_path_never_panics(path in ".*") {
            let _ = normalize_path(&path);
        }
    }
}
