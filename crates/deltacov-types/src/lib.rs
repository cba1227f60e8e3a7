//! Core types and DTOs for deltacov.
//!
//! This crate defines the change-set entities shared by the diff adapters,
//! the filtering domain and the application layer, plus the run report
//! written next to a filtered coverage tree.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Schema Constants
// ============================================================================

/// Schema identifier for the deltacov run report.
pub const SCHEMA_ID: &str = "deltacov.report.v1";

/// Reason: at least one changed line survived filtering.
pub const REASON_CHANGED_LINES: &str = "changed_lines";

/// Reason: the change set did not touch any unit in the coverage tree.
pub const REASON_NO_CHANGED_UNITS: &str = "no_changed_units";

/// Reason: the diff listed no added or modified source files.
pub const REASON_NO_CHANGED_FILES: &str = "no_changed_files";

// ============================================================================
// Enums
// ============================================================================

/// Kind of change recorded for a file between base and head.
///
/// Deleted files never become a [`ChangeRecord`]; they are dropped while the
/// name-status listing is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
}

impl ChangeType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Change Entities
// ============================================================================

/// One entry of a name-status listing that survived filtering.
///
/// This is the identity half of a [`ChangeRecord`]; the changed line numbers
/// are attached once the per-file diff has been parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Dot-qualified unit name, e.g. `com.x.Foo`.
    pub qualified_name: String,
    /// Path as reported by source control, e.g. `src/main/java/com/x/Foo.java`.
    pub relative_path: String,
    /// Normalized change type.
    pub change_type: ChangeType,
    /// Source path of a rename or copy, as reported by source control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

/// A changed file together with the line numbers touched in the head revision.
///
/// The line set is fixed at construction and only readable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    qualified_name: String,
    relative_path: String,
    change_type: ChangeType,
    changed_lines: BTreeSet<u32>,
}

impl ChangeRecord {
    /// Attach the parsed changed lines to a name-status entry.
    pub fn new(file: ChangedFile, changed_lines: BTreeSet<u32>) -> Self {
        Self {
            qualified_name: file.qualified_name,
            relative_path: file.relative_path,
            change_type: file.change_type,
            changed_lines,
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    /// 1-based line numbers in the head revision that were added or modified.
    pub fn changed_lines(&self) -> &BTreeSet<u32> {
        &self.changed_lines
    }

    /// Returns true if `line` was changed.
    pub fn contains(&self, line: u32) -> bool {
        self.changed_lines.contains(&line)
    }
}

/// The base/head revision pair a change set was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionPair {
    pub base: String,
    pub head: String,
}

impl RevisionPair {
    pub fn new(base: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            head: head.into(),
        }
    }
}

impl fmt::Display for RevisionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.base, self.head)
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Information about the tool that generated the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
}

impl Default for Tool {
    fn default() -> Self {
        Self {
            name: "deltacov".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Information about the run timing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// ISO 8601 timestamp when the run started.
    pub started_at: String,
    /// ISO 8601 timestamp when the run ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Inputs the filtered report was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inputs {
    pub base: String,
    pub head: String,
    /// Coverage input files, in the order they were read.
    #[serde(default)]
    pub coverage_paths: Vec<String>,
}

/// Unit and line tallies for one filtering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    /// Files listed as added/modified by the diff.
    pub changed_files: u32,
    /// Changed lines across all changed files.
    pub changed_lines: u32,
    pub packages_retained: u32,
    pub packages_removed: u32,
    pub classes_retained: u32,
    pub classes_removed: u32,
    pub source_files_retained: u32,
    pub source_files_removed: u32,
    /// Line details erased because the line was not changed.
    pub lines_erased: u32,
    pub missed_lines: u32,
    pub covered_lines: u32,
}

impl ReportData {
    /// Covered percentage of changed executable lines, `None` when there are none.
    pub fn coverage_pct(&self) -> Option<f64> {
        let total = self.missed_lines + self.covered_lines;
        if total == 0 {
            None
        } else {
            Some(f64::from(self.covered_lines) * 100.0 / f64::from(total))
        }
    }
}

/// The deltacov run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema: String,
    pub tool: Tool,
    pub run: Run,
    pub inputs: Inputs,
    pub data: ReportData,
    /// Reason tokens describing the outcome.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            schema: SCHEMA_ID.to_string(),
            tool: Tool::default(),
            run: Run::default(),
            inputs: Inputs::default(),
            data: ReportData::default(),
            reasons: Vec::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
