//! Line-coverage tree for deltacov.
//!
//! A coverage report is a tree: one [`Bundle`] holds [`Package`]s, a package
//! holds [`ClassNode`]s and [`SourceFileNode`]s, and a class holds
//! [`MethodNode`]s. Every node carries a line [`Counter`]; classes, source
//! files and methods also carry per-line [`LineStatus`] detail.
//!
//! Nodes with line detail implement [`SourceNode`], the accessor and mutator
//! contract the filter works through.

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

// ============================================================================
// Line Status and Counters
// ============================================================================

/// Coverage status of a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// No executable instruction on this line.
    #[default]
    Empty,
    /// No instruction on this line was executed.
    NotCovered,
    /// Some instructions or branches on this line were missed.
    PartlyCovered,
    /// Every instruction and branch on this line was executed.
    FullyCovered,
}

impl LineStatus {
    /// Derive a status from executed/total instruction or branch counts.
    pub fn from_counts(missed: u32, covered: u32) -> Self {
        match (missed, covered) {
            (0, 0) => LineStatus::Empty,
            (_, 0) => LineStatus::NotCovered,
            (0, _) => LineStatus::FullyCovered,
            _ => LineStatus::PartlyCovered,
        }
    }
}

/// A (missed, covered) line counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    pub missed: u32,
    pub covered: u32,
}

impl Counter {
    pub const ZERO: Counter = Counter {
        missed: 0,
        covered: 0,
    };

    pub fn new(missed: u32, covered: u32) -> Self {
        Self { missed, covered }
    }

    pub fn total(&self) -> u32 {
        self.missed + self.covered
    }

    /// Covered ratio in `[0, 1]`, or `None` for an empty counter.
    pub fn covered_ratio(&self) -> Option<f64> {
        if self.total() == 0 {
            None
        } else {
            Some(f64::from(self.covered) / f64::from(self.total()))
        }
    }
}

impl Add for Counter {
    type Output = Counter;

    fn add(self, rhs: Counter) -> Counter {
        Counter::new(self.missed + rhs.missed, self.covered + rhs.covered)
    }
}

impl AddAssign for Counter {
    fn add_assign(&mut self, rhs: Counter) {
        *self = *self + rhs;
    }
}

impl Sum for Counter {
    fn sum<I: Iterator<Item = Counter>>(iter: I) -> Counter {
        iter.fold(Counter::ZERO, Add::add)
    }
}

// ============================================================================
// Line Detail
// ============================================================================

/// Per-line detail of a source node over an inclusive line range.
///
/// The range is fixed once established: erasing a line removes its detail
/// but leaves `first_line..=last_line` untouched, so an erased line reads
/// back as [`LineStatus::Empty`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "LinesRepr", into = "LinesRepr")]
pub struct Lines {
    first: Option<u32>,
    last: Option<u32>,
    statuses: BTreeMap<u32, LineStatus>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct LinesRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_line: Option<u32>,
    #[serde(default)]
    statuses: BTreeMap<u32, LineStatus>,
}

impl From<LinesRepr> for Lines {
    fn from(repr: LinesRepr) -> Self {
        let mut lines = Lines {
            first: repr.first_line,
            last: repr.last_line,
            statuses: BTreeMap::new(),
        };
        for (nr, status) in repr.statuses {
            lines.insert(nr, status);
        }
        lines
    }
}

impl From<Lines> for LinesRepr {
    fn from(lines: Lines) -> Self {
        LinesRepr {
            first_line: lines.first,
            last_line: lines.last,
            statuses: lines.statuses,
        }
    }
}

impl Lines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for line `nr`, widening the range if needed.
    pub fn insert(&mut self, nr: u32, status: LineStatus) {
        self.first = Some(self.first.map_or(nr, |first| first.min(nr)));
        self.last = Some(self.last.map_or(nr, |last| last.max(nr)));
        if status == LineStatus::Empty {
            self.statuses.remove(&nr);
        } else {
            self.statuses.insert(nr, status);
        }
    }

    pub fn first_line(&self) -> Option<u32> {
        self.first
    }

    pub fn last_line(&self) -> Option<u32> {
        self.last
    }

    /// Status of line `nr`; lines without detail are [`LineStatus::Empty`].
    pub fn status(&self, nr: u32) -> LineStatus {
        self.statuses.get(&nr).copied().unwrap_or_default()
    }

    /// Replace the detail of line `nr`; `None` erases it.
    ///
    /// Replacement never moves the line range.
    pub fn replace(&mut self, nr: u32, status: Option<LineStatus>) {
        match status {
            Some(status) if status != LineStatus::Empty => {
                self.statuses.insert(nr, status);
            }
            _ => {
                self.statuses.remove(&nr);
            }
        }
    }

    /// Lines that carry non-empty detail, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, LineStatus)> + '_ {
        self.statuses.iter().map(|(nr, status)| (*nr, *status))
    }

    /// Number of lines with non-empty detail.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Counter over every line with detail, ignoring any filter.
    pub fn counter(&self) -> Counter {
        self.statuses
            .values()
            .map(|status| match status {
                LineStatus::NotCovered | LineStatus::PartlyCovered => Counter::new(1, 0),
                LineStatus::FullyCovered => Counter::new(0, 1),
                LineStatus::Empty => Counter::ZERO,
            })
            .sum()
    }
}

// ============================================================================
// Source Node Contract
// ============================================================================

/// A coverage node with line detail: class, source file or method.
pub trait SourceNode {
    fn lines(&self) -> &Lines;

    fn lines_mut(&mut self) -> &mut Lines;

    fn line_counter(&self) -> Counter;

    fn set_line_counter(&mut self, counter: Counter);

    fn first_line(&self) -> Option<u32> {
        self.lines().first_line()
    }

    fn last_line(&self) -> Option<u32> {
        self.lines().last_line()
    }

    fn line(&self, nr: u32) -> LineStatus {
        self.lines().status(nr)
    }

    fn replace_line(&mut self, nr: u32, status: Option<LineStatus>) {
        self.lines_mut().replace(nr, status);
    }
}

macro_rules! impl_source_node {
    ($($ty:ty),+) => {
        $(
            impl SourceNode for $ty {
                fn lines(&self) -> &Lines {
                    &self.lines
                }

                fn lines_mut(&mut self) -> &mut Lines {
                    &mut self.lines
                }

                fn line_counter(&self) -> Counter {
                    self.line_counter
                }

                fn set_line_counter(&mut self, counter: Counter) {
                    self.line_counter = counter;
                }
            }
        )+
    };
}

impl_source_node!(MethodNode, ClassNode, SourceFileNode);

// ============================================================================
// Tree Nodes
// ============================================================================

/// Coverage of one method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub lines: Lines,
    #[serde(default)]
    pub line_counter: Counter,
}

impl MethodNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_line(mut self, nr: u32, status: LineStatus) -> Self {
        self.lines.insert(nr, status);
        self
    }
}

/// Coverage of one class, named in VM form (`com/x/Foo`, `com/x/Foo$Bar`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassNode {
    pub name: String,
    /// Name of the file the class was compiled from, e.g. `Foo.java`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodNode>,
    #[serde(default)]
    pub lines: Lines,
    #[serde(default)]
    pub line_counter: Counter,
}

impl ClassNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_source_file(mut self, source_file_name: impl Into<String>) -> Self {
        self.source_file_name = Some(source_file_name.into());
        self
    }

    pub fn with_line(mut self, nr: u32, status: LineStatus) -> Self {
        self.lines.insert(nr, status);
        self
    }

    pub fn with_method(mut self, method: MethodNode) -> Self {
        self.methods.push(method);
        self
    }

    /// Package part of the VM name (`com/x` for `com/x/Foo`), empty for the
    /// default package.
    pub fn package_name(&self) -> &str {
        self.name.rsplit_once('/').map_or("", |(package, _)| package)
    }
}

/// Coverage of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceFileNode {
    /// File name without directories, e.g. `Foo.java`.
    pub name: String,
    /// Slash-separated package, e.g. `com/x`.
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub lines: Lines,
    #[serde(default)]
    pub line_counter: Counter,
}

impl SourceFileNode {
    pub fn new(package_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn with_line(mut self, nr: u32, status: LineStatus) -> Self {
        self.lines.insert(nr, status);
        self
    }
}

/// Coverage of one package.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Package {
    /// Slash-separated package name.
    pub name: String,
    #[serde(default)]
    pub classes: Vec<ClassNode>,
    #[serde(default)]
    pub source_files: Vec<SourceFileNode>,
    #[serde(default)]
    pub line_counter: Counter,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: ClassNode) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_source_file(mut self, source_file: SourceFileNode) -> Self {
        self.source_files.push(source_file);
        self
    }

    /// Returns true if the package has neither classes nor source files.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.source_files.is_empty()
    }
}

/// Root of a coverage tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub line_counter: Counter,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_package(mut self, package: Package) -> Self {
        self.packages.push(package);
        self
    }

    /// Recompute every counter from raw line detail.
    ///
    /// Package counters sum their source files when there are any and their
    /// classes otherwise, since both describe the same lines.
    pub fn recompute_counters(&mut self) {
        for package in &mut self.packages {
            for class in &mut package.classes {
                for method in &mut class.methods {
                    method.line_counter = method.lines.counter();
                }
                class.line_counter = class.lines.counter();
            }
            for source_file in &mut package.source_files {
                source_file.line_counter = source_file.lines.counter();
            }
            package.line_counter = package_counter(package);
        }
        self.line_counter = self.packages.iter().map(|p| p.line_counter).sum();
    }

    /// Find a package by slash-separated name.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// Aggregate a package counter from its children.
pub fn package_counter(package: &Package) -> Counter {
    if package.source_files.is_empty() {
        package.classes.iter().map(|c| c.line_counter).sum()
    } else {
        package.source_files.iter().map(|s| s.line_counter).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
