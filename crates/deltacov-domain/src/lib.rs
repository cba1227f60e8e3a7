//! Pure changed-line filtering logic for deltacov.
//!
//! This crate has no side effects beyond mutating the tree it is handed.
//! It joins a [`ChangeIndex`] against a coverage [`Bundle`], erases the
//! detail of every line that did not change, recomputes counters bottom-up
//! and prunes units and packages left without changed code.

use std::collections::BTreeMap;
use std::collections::btree_map;

use deltacov_model::{
    Bundle, ClassNode, Counter, LineStatus, Package, SourceFileNode, SourceNode, package_counter,
};
use deltacov_types::ChangeRecord;

// ============================================================================
// Change Index
// ============================================================================

/// Lookup from dot-qualified unit name to its [`ChangeRecord`].
///
/// Built once from fully populated records and read-only afterwards, so a
/// shared reference can serve any number of filtering passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeIndex {
    records: BTreeMap<String, ChangeRecord>,
}

impl ChangeIndex {
    /// Build an index; a later record replaces an earlier one with the same
    /// qualified name.
    pub fn from_records<I: IntoIterator<Item = ChangeRecord>>(records: I) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            let key = record.qualified_name().to_string();
            if let Some(previous) = map.insert(key, record) {
                log::warn!(
                    "duplicate change entry for '{}' (previous path '{}'), keeping the latest",
                    previous.qualified_name(),
                    previous.relative_path()
                );
            }
        }
        Self { records: map }
    }

    /// The record for `qualified_name`, or `None` if the unit did not change.
    pub fn lookup(&self, qualified_name: &str) -> Option<&ChangeRecord> {
        self.records.get(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in qualified-name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, ChangeRecord> {
        self.records.values()
    }

    /// Changed lines summed over every record.
    pub fn changed_line_count(&self) -> usize {
        self.records.values().map(|r| r.changed_lines().len()).sum()
    }
}

impl FromIterator<ChangeRecord> for ChangeIndex {
    fn from_iter<I: IntoIterator<Item = ChangeRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

impl<'a> IntoIterator for &'a ChangeIndex {
    type Item = &'a ChangeRecord;
    type IntoIter = btree_map::Values<'a, String, ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// Unit Keys
// ============================================================================

fn strip_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

fn join_qualified(package: &str, simple_name: &str) -> String {
    if package.is_empty() {
        simple_name.to_string()
    } else {
        format!("{}.{}", package.replace('/', "."), simple_name)
    }
}

/// Qualified name of a source-file unit: `com/x` + `Foo.java` → `com.x.Foo`.
pub fn source_file_key(source_file: &SourceFileNode) -> String {
    join_qualified(&source_file.package_name, strip_extension(&source_file.name))
}

/// Qualified name of a class unit.
///
/// Uses the class's source file when recorded, so nested classes join their
/// file's record; otherwise the VM name up to the first `$`.
pub fn class_key(class: &ClassNode) -> String {
    match &class.source_file_name {
        Some(file_name) => join_qualified(class.package_name(), strip_extension(file_name)),
        None => {
            let outer = class.name.split('$').next().unwrap_or(&class.name);
            outer.replace('/', ".")
        }
    }
}

// ============================================================================
// Filter Summary
// ============================================================================

/// Tallies from one filtering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub packages_retained: u32,
    pub packages_removed: u32,
    pub classes_retained: u32,
    pub classes_removed: u32,
    pub source_files_retained: u32,
    pub source_files_removed: u32,
    /// Line details erased across classes, source files and methods.
    pub lines_erased: u32,
    /// Bundle counter after filtering.
    pub counter: Counter,
}

// ============================================================================
// Filtering
// ============================================================================

/// Restrict a unit's lines to `record`'s changed lines.
///
/// Every line in `first_line..=last_line` that did not change is erased.
/// Changed lines are tallied: not/partly covered count as missed, fully
/// covered as covered, empty as neither. The tally becomes the node's line
/// counter and is returned with the number of erased details.
///
/// Only lines that carry detail or changed are visited, so the cost does
/// not depend on the width of the line range.
pub fn filter_lines<N: SourceNode + ?Sized>(node: &mut N, record: &ChangeRecord) -> (Counter, u32) {
    let mut counter = Counter::ZERO;
    let mut erased = 0u32;

    if let (Some(first), Some(last)) = (node.first_line(), node.last_line())
        && first <= last
    {
        let range = first..=last;
        let unchanged: Vec<u32> = node
            .lines()
            .iter()
            .map(|(nr, _)| nr)
            .filter(|nr| range.contains(nr) && !record.contains(*nr))
            .collect();
        for nr in unchanged {
            erased += 1;
            node.replace_line(nr, None);
        }

        for &nr in record.changed_lines().range(range) {
            match node.line(nr) {
                LineStatus::NotCovered | LineStatus::PartlyCovered => counter.missed += 1,
                LineStatus::FullyCovered => counter.covered += 1,
                LineStatus::Empty => {}
            }
        }
    }

    node.set_line_counter(counter);
    (counter, erased)
}

/// Resolve a unit against the index; units without a record, or whose
/// record has no changed lines, are dropped.
fn resolve<'a>(index: &'a ChangeIndex, key: &str) -> Option<&'a ChangeRecord> {
    index
        .lookup(key)
        .filter(|record| !record.changed_lines().is_empty())
}

fn filter_class(class: &mut ClassNode, record: &ChangeRecord) -> u32 {
    let (_, mut erased) = filter_lines(class, record);
    for method in &mut class.methods {
        erased += filter_lines(method, record).1;
    }
    erased
}

fn filter_package(package: &mut Package, index: &ChangeIndex, summary: &mut FilterSummary) {
    package.classes.retain_mut(|class| {
        let key = class_key(class);
        match resolve(index, &key) {
            Some(record) => {
                summary.lines_erased += filter_class(class, record);
                summary.classes_retained += 1;
                true
            }
            None => {
                log::debug!("removing unchanged class {}", class.name);
                summary.classes_removed += 1;
                false
            }
        }
    });

    package.source_files.retain_mut(|source_file| {
        let key = source_file_key(source_file);
        match resolve(index, &key) {
            Some(record) => {
                summary.lines_erased += filter_lines(source_file, record).1;
                summary.source_files_retained += 1;
                true
            }
            None => {
                log::debug!("removing unchanged source file {}", key);
                summary.source_files_removed += 1;
                false
            }
        }
    });

    package.line_counter = package_counter(package);
}

/// Filter a coverage tree in place down to the lines in `index`.
///
/// Children are processed before their parent's counter is set, packages
/// left without classes and source files are removed, and the bundle
/// counter becomes the sum of the retained packages.
pub fn filter_bundle(bundle: &mut Bundle, index: &ChangeIndex) -> FilterSummary {
    let mut summary = FilterSummary::default();

    bundle.packages.retain_mut(|package| {
        filter_package(package, index, &mut summary);
        if package.is_empty() {
            log::debug!("removing empty package {}", package.name);
            summary.packages_removed += 1;
            false
        } else {
            summary.packages_retained += 1;
            true
        }
    });

    bundle.line_counter = bundle.packages.iter().map(|p| p.line_counter).sum();
    summary.counter = bundle.line_counter;
    summary
}

/// Non-destructive variant of [`filter_bundle`].
pub fn filtered_copy(bundle: &Bundle, index: &ChangeIndex) -> (Bundle, FilterSummary) {
    let mut copy = bundle.clone();
    let summary = filter_bundle(&mut copy, index);
    (copy, summary)
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================
