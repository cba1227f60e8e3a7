//! BDD/Cucumber test harness for deltacov.
//!
//! Step definitions for the Gherkin feature files in `bdd/features/`.
//! Changes are served by an in-memory diff provider that renders a
//! full-context diff for every file a scenario declares.
//!
//! Run with: `cargo test --test bdd`

use std::collections::{BTreeMap, BTreeSet};

use cucumber::{World, given, then, when};
use deltacov_app::{
    AppError, ChangeOptions, DiffProvider, SystemClock, build_change_index, filter_coverage,
    resolve_revisions,
};
use deltacov_domain::{ChangeIndex, FilterSummary};
use deltacov_model::{Bundle, LineStatus, Package, SourceFileNode, SourceNode};
use deltacov_types::Report;

/// Scenario state.
#[derive(Debug, Default, World)]
pub struct DeltacovWorld {
    /// Raw name-status listing served by the provider.
    listing: String,
    /// Full-context diff per relative path.
    diffs: BTreeMap<String, String>,
    /// Whether every provider call fails.
    provider_broken: bool,
    /// The coverage tree before filtering.
    bundle: Bundle,
    /// Outcome of the last run.
    outcome: Option<Outcome>,
    /// Error message when the run failed.
    error: Option<String>,
}

#[derive(Debug)]
struct Outcome {
    index: ChangeIndex,
    summary: FilterSummary,
    report: Report,
    bundle: Bundle,
}

struct ScenarioProvider<'a> {
    world: &'a DeltacovWorld,
}

impl DiffProvider for ScenarioProvider<'_> {
    fn name_status(&self, _base: &str, _head: &str) -> Result<String, String> {
        if self.world.provider_broken {
            return Err("failed to execute 'git': No such file or directory".to_string());
        }
        Ok(self.world.listing.clone())
    }

    fn full_context_diff(&self, _base: &str, _head: &str, path: &str) -> Result<String, String> {
        if self.world.provider_broken {
            return Err("failed to execute 'git': No such file or directory".to_string());
        }
        Ok(self.world.diffs.get(path).cloned().unwrap_or_default())
    }

    fn head_revision(&self) -> Result<String, String> {
        Ok("feature\n".to_string())
    }
}

/// Parse `"1-3,7"` into `{1, 2, 3, 7}`.
fn parse_lines(text: &str) -> BTreeSet<u32> {
    let mut lines = BTreeSet::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().unwrap();
                let end: u32 = end.trim().parse().unwrap();
                lines.extend(start..=end);
            }
            None => {
                lines.insert(part.parse().unwrap());
            }
        }
    }
    lines
}

/// Full-context diff of a `total`-line file whose `changed` lines were
/// rewritten.
fn render_diff(path: &str, total: u32, changed: &BTreeSet<u32>) -> String {
    let mut diff = format!(
        "diff --git a/{path} b/{path}\nindex 1111111..2222222 100644\n--- a/{path}\n+++ b/{path}\n@@ -1,{total} +1,{total} @@\n"
    );
    for nr in 1..=total {
        if changed.contains(&nr) {
            diff.push_str(&format!("-old line {nr}\n+new line {nr}\n"));
        } else {
            diff.push_str(&format!(" line {nr}\n"));
        }
    }
    diff
}

fn source_file_mut<'a>(world: &'a mut DeltacovWorld, file: &str) -> &'a mut SourceFileNode {
    let (package, name) = file.rsplit_once('/').unwrap_or(("", file));
    let index = match world.bundle.packages.iter().position(|p| p.name == package) {
        Some(index) => index,
        None => {
            world.bundle.packages.push(Package::new(package));
            world.bundle.packages.len() - 1
        }
    };
    let package_node = &mut world.bundle.packages[index];
    let position = match package_node.source_files.iter().position(|s| s.name == name) {
        Some(position) => position,
        None => {
            package_node
                .source_files
                .push(SourceFileNode::new(package, name));
            package_node.source_files.len() - 1
        }
    };
    &mut package_node.source_files[position]
}

fn find_source_file<'a>(bundle: &'a Bundle, file: &str) -> Option<&'a SourceFileNode> {
    let (package, name) = file.rsplit_once('/').unwrap_or(("", file));
    bundle
        .package(package)?
        .source_files
        .iter()
        .find(|s| s.name == name)
}

fn outcome(world: &DeltacovWorld) -> &Outcome {
    match &world.outcome {
        Some(outcome) => outcome,
        None => panic!("run failed: {:?}", world.error),
    }
}

// ============================================================================
// Given: changes
// ============================================================================

#[given(expr = "the file {string} of {int} lines was modified at lines {string}")]
fn given_modified_file(world: &mut DeltacovWorld, path: String, total: u32, lines: String) {
    world.listing.push_str(&format!("M\t{path}\n"));
    let diff = render_diff(&path, total, &parse_lines(&lines));
    world.diffs.insert(path, diff);
}

#[given(expr = "the file {string} was added with {int} lines")]
fn given_added_file(world: &mut DeltacovWorld, path: String, total: u32) {
    world.listing.push_str(&format!("A\t{path}\n"));
    let mut diff = format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{total} @@\n");
    for nr in 1..=total {
        diff.push_str(&format!("+line {nr}\n"));
    }
    world.diffs.insert(path, diff);
}

#[given(expr = "the file {string} was renamed to {string} changing lines {string} of {int}")]
fn given_renamed_file(world: &mut DeltacovWorld, from: String, to: String, lines: String, total: u32) {
    world.listing.push_str(&format!("R087\t{from}\t{to}\n"));
    let diff = render_diff(&to, total, &parse_lines(&lines));
    world.diffs.insert(to, diff);
}

#[given(expr = "the change listing also contains {string}")]
fn given_listing_entry(world: &mut DeltacovWorld, entry: String) {
    world.listing.push_str(&entry.replace("\\t", "\t"));
    world.listing.push('\n');
}

#[given("the diff provider cannot be started")]
fn given_provider_broken(world: &mut DeltacovWorld) {
    world.provider_broken = true;
}

// ============================================================================
// Given: coverage
// ============================================================================

#[given(expr = "coverage of {string} with missed lines {string} and covered lines {string}")]
fn given_coverage(world: &mut DeltacovWorld, file: String, missed: String, covered: String) {
    let node = source_file_mut(world, &file);
    for nr in parse_lines(&missed) {
        node.lines.insert(nr, LineStatus::NotCovered);
    }
    for nr in parse_lines(&covered) {
        node.lines.insert(nr, LineStatus::FullyCovered);
    }
    world.bundle.recompute_counters();
}

#[given(expr = "line {int} of {string} is partly covered")]
fn given_partly_covered(world: &mut DeltacovWorld, nr: u32, file: String) {
    source_file_mut(world, &file)
        .lines
        .insert(nr, LineStatus::PartlyCovered);
    world.bundle.recompute_counters();
}

// ============================================================================
// When
// ============================================================================

#[when("the coverage is filtered")]
fn when_filtered(world: &mut DeltacovWorld) {
    let provider = ScenarioProvider { world: &*world };
    let result = resolve_revisions(&provider, "main", None).and_then(|revisions| {
        let index = build_change_index(&provider, &revisions, &ChangeOptions::default())?;
        let mut bundle = world.bundle.clone();
        let (summary, report) =
            filter_coverage(&mut bundle, &index, &revisions, vec![], &SystemClock);
        Ok::<_, AppError>(Outcome {
            index,
            summary,
            report,
            bundle,
        })
    });

    match result {
        Ok(outcome) => {
            world.outcome = Some(outcome);
            world.error = None;
        }
        Err(e) => {
            world.outcome = None;
            world.error = Some(e.to_string());
        }
    }
}

// ============================================================================
// Then
// ============================================================================

#[then(expr = "the filtered counter is {int} missed and {int} covered")]
fn then_counter(world: &mut DeltacovWorld, missed: u32, covered: u32) {
    let outcome = outcome(world);
    assert_eq!(outcome.summary.counter.missed, missed);
    assert_eq!(outcome.summary.counter.covered, covered);
    assert_eq!(outcome.bundle.line_counter, outcome.summary.counter);
}

#[then(expr = "the changed-line coverage is {float} percent")]
fn then_percentage(world: &mut DeltacovWorld, pct: f64) {
    let actual = outcome(world).report.data.coverage_pct().unwrap();
    assert!((actual - pct).abs() < 0.01, "expected {pct}, got {actual}");
}

#[then("the changed-line coverage is undefined")]
fn then_no_percentage(world: &mut DeltacovWorld) {
    assert!(outcome(world).report.data.coverage_pct().is_none());
}

#[then(expr = "line {int} of {string} has no coverage detail")]
fn then_line_erased(world: &mut DeltacovWorld, nr: u32, file: String) {
    let node = find_source_file(&outcome(world).bundle, &file).unwrap();
    assert_eq!(node.line(nr), LineStatus::Empty);
}

#[then(expr = "line {int} of {string} keeps its coverage detail")]
fn then_line_kept(world: &mut DeltacovWorld, nr: u32, file: String) {
    let node = find_source_file(&outcome(world).bundle, &file).unwrap();
    assert_ne!(node.line(nr), LineStatus::Empty);
}

#[then(expr = "{string} is removed from the filtered coverage")]
fn then_file_removed(world: &mut DeltacovWorld, file: String) {
    assert!(find_source_file(&outcome(world).bundle, &file).is_none());
}

#[then(expr = "{string} is kept in the filtered coverage")]
fn then_file_kept(world: &mut DeltacovWorld, file: String) {
    assert!(find_source_file(&outcome(world).bundle, &file).is_some());
}

#[then(expr = "the package {string} is removed")]
fn then_package_removed(world: &mut DeltacovWorld, package: String) {
    assert!(outcome(world).bundle.package(&package).is_none());
}

#[then(expr = "the change index lists {string} with lines {string}")]
fn then_index_lines(world: &mut DeltacovWorld, name: String, lines: String) {
    let record = outcome(world).index.lookup(&name).unwrap();
    assert_eq!(record.changed_lines(), &parse_lines(&lines));
}

#[then(expr = "the change index has {int} entries")]
fn then_index_len(world: &mut DeltacovWorld, count: usize) {
    assert_eq!(outcome(world).index.len(), count);
}

#[then(expr = "the report reason is {string}")]
fn then_reason(world: &mut DeltacovWorld, reason: String) {
    assert_eq!(outcome(world).report.reasons, vec![reason]);
}

#[then(expr = "the report head revision is {string}")]
fn then_head(world: &mut DeltacovWorld, head: String) {
    assert_eq!(outcome(world).report.inputs.head, head);
}

#[then("the run fails with an environment error")]
fn then_environment_error(world: &mut DeltacovWorld) {
    assert!(world.outcome.is_none());
    let error = world.error.as_deref().unwrap_or_default();
    assert!(error.contains("diff provider failed"), "unexpected error: {error}");
}

fn main() {
    // Run cucumber tests from the bdd/features directory
    futures::executor::block_on(DeltacovWorld::cucumber().run("../../bdd/features"));
}
