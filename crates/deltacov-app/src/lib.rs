//! Application orchestration for deltacov.
//!
//! This crate wires the parsers, the change index and the coverage filter
//! into the pipeline a run executes:
//!
//! 1. Resolve the base/head revision pair (asking the provider for the
//!    head when none is configured)
//! 2. List changed files and compute each file's changed lines
//! 3. Build the [`ChangeIndex`], at most once per revision pair
//! 4. Load the coverage tree (JSON or LCOV)
//! 5. Filter the tree and build a [`Report`]
//!
//! Any failure to talk to the diff provider aborts the run with
//! [`AppError::Environment`]; it is never treated as "no changes".
//!
//! # Example
//!
//! ```rust,ignore
//! use deltacov_app::{ChangeOptions, CoverageInput, FilterRequest, run_filter};
//!
//! let request = FilterRequest {
//!     base: "origin/main".to_string(),
//!     head: None,
//!     options: ChangeOptions::default(),
//!     coverage: CoverageInput::Json("build/coverage.json".into()),
//! };
//! let result = run_filter(&request, &provider, &SystemClock)?;
//! println!("{:?}", result.report.data.coverage_pct());
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use deltacov_adapters_coverage::{
    CoverageError, LcovMap, bundle_from_lcov, load_bundle_json, merge_lcov, parse_lcov,
};
use deltacov_adapters_diff::{
    NameStatusOptions, SkippedEntry, collapse_lines, parse_changed_lines,
    parse_name_status_with_meta,
};
use deltacov_config::{ConfigError, EffectiveConfig, should_include_path};
use deltacov_domain::{ChangeIndex, FilterSummary, filter_bundle};
use deltacov_model::Bundle;
pub use deltacov_ports::{Clock, DiffProvider};
use deltacov_types::{
    ChangeRecord, Inputs, REASON_CHANGED_LINES, REASON_NO_CHANGED_FILES,
    REASON_NO_CHANGED_UNITS, Report, ReportData, RevisionPair, Run, Tool,
};
use serde_json::json;
use thiserror::Error;

// ============================================================================
// Clock
// ============================================================================

/// System clock implementation that returns the actual current time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum AppError {
    /// The diff provider could not be run or its output could not be read.
    #[error("diff provider failed: {0}")]
    Environment(String),

    /// The coverage input could not be loaded.
    #[error(transparent)]
    Coverage(#[from] CoverageError),

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Change Detection
// ============================================================================

/// Settings that decide which changed files enter the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChangeOptions {
    pub name_status: NameStatusOptions,
    /// Glob allowlist on relative paths; empty admits everything.
    pub include_patterns: Vec<String>,
    /// Glob denylist on relative paths.
    pub exclude_patterns: Vec<String>,
}

impl ChangeOptions {
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self {
            name_status: NameStatusOptions {
                source_root_marker: config.source_root_marker.clone(),
                source_extension: config.source_extension.clone(),
            },
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
        }
    }
}

/// Resolve the revision pair, asking the provider for the head revision
/// when `head` is absent.
pub fn resolve_revisions<P: DiffProvider + ?Sized>(
    provider: &P,
    base: &str,
    head: Option<&str>,
) -> Result<RevisionPair, AppError> {
    let head = match head.map(str::trim).filter(|h| !h.is_empty()) {
        Some(head) => head.to_string(),
        None => {
            let head = provider
                .head_revision()
                .map_err(AppError::Environment)?
                .trim()
                .to_string();
            if head.is_empty() {
                return Err(AppError::Environment(
                    "head revision lookup returned nothing".to_string(),
                ));
            }
            log::info!("resolved head revision {}", head);
            head
        }
    };
    Ok(RevisionPair::new(base, head))
}

/// Outcome of change detection, with the entries that were left out.
#[derive(Debug, Clone, Default)]
pub struct ChangeScan {
    pub index: ChangeIndex,
    /// Name-status entries the parser skipped.
    pub skipped: Vec<SkippedEntry>,
    /// Changed source files dropped by include/exclude patterns.
    pub excluded: Vec<String>,
}

/// List changed files between `revisions` and compute each one's changed
/// lines.
///
/// Provider failures propagate as [`AppError::Environment`]. Skipped and
/// excluded entries are reported alongside the index.
pub fn scan_changes<P: DiffProvider + ?Sized>(
    provider: &P,
    revisions: &RevisionPair,
    options: &ChangeOptions,
) -> Result<ChangeScan, AppError> {
    let RevisionPair { base, head } = revisions;
    log::info!("computing changes between {} and {}", base, head);

    let listing = provider
        .name_status(base, head)
        .map_err(AppError::Environment)?;
    let parsed = parse_name_status_with_meta(&listing, &options.name_status);

    let mut records = Vec::with_capacity(parsed.files.len());
    let mut excluded = Vec::new();
    for file in parsed.files {
        if !should_include_path(
            &file.relative_path,
            &options.include_patterns,
            &options.exclude_patterns,
        ) {
            log::debug!("excluding {} by path pattern", file.relative_path);
            excluded.push(file.relative_path);
            continue;
        }

        let diff = match &file.previous_path {
            Some(from) => provider.renamed_full_context_diff(base, head, from, &file.relative_path),
            None => provider.full_context_diff(base, head, &file.relative_path),
        }
        .map_err(AppError::Environment)?;
        let lines = parse_changed_lines(&diff);
        if lines.is_empty() {
            log::debug!("{} has no changed lines", file.relative_path);
        }
        records.push(ChangeRecord::new(file, lines));
    }

    let index = ChangeIndex::from_records(records);
    log::info!(
        "{} changed files, {} changed lines",
        index.len(),
        index.changed_line_count()
    );

    Ok(ChangeScan {
        index,
        skipped: parsed.skipped,
        excluded,
    })
}

/// Build the change index for `revisions`.
pub fn build_change_index<P: DiffProvider + ?Sized>(
    provider: &P,
    revisions: &RevisionPair,
    options: &ChangeOptions,
) -> Result<ChangeIndex, AppError> {
    scan_changes(provider, revisions, options).map(|scan| scan.index)
}

// ============================================================================
// Change Index Cache
// ============================================================================

/// Change indexes shared per revision pair and change options.
///
/// An index depends on the options it was built with as much as on the
/// revisions, so both form the key. Lookup and build happen under one lock,
/// so concurrent callers asking for the same key wait for the first build
/// instead of running the diff provider again. Failed builds are not cached.
#[derive(Debug, Default)]
pub struct ChangeIndexCache {
    entries: Mutex<HashMap<(RevisionPair, ChangeOptions), Arc<ChangeIndex>>>,
}

impl ChangeIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached index for `revisions` under `options`, or build and
    /// cache it.
    pub fn get_or_build<F>(
        &self,
        revisions: &RevisionPair,
        options: &ChangeOptions,
        build: F,
    ) -> Result<Arc<ChangeIndex>, AppError>
    where
        F: FnOnce() -> Result<ChangeIndex, AppError>,
    {
        let key = (revisions.clone(), options.clone());
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(index) = entries.get(&key) {
            log::debug!("reusing change index for {}", revisions);
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(build()?);
        entries.insert(key, Arc::clone(&index));
        Ok(index)
    }

    /// Cached index for `revisions` under `options`, if one was built.
    pub fn get(&self, revisions: &RevisionPair, options: &ChangeOptions) -> Option<Arc<ChangeIndex>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(revisions.clone(), options.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Coverage Input
// ============================================================================

/// Where the coverage tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageInput {
    /// A serialized coverage tree.
    Json(PathBuf),
    /// One or more LCOV tracefiles, merged.
    Lcov(Vec<PathBuf>),
}

impl CoverageInput {
    pub fn paths(&self) -> Vec<String> {
        match self {
            CoverageInput::Json(path) => vec![path.display().to_string()],
            CoverageInput::Lcov(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
        }
    }
}

/// Load the coverage tree described by `input`.
pub fn load_coverage(input: &CoverageInput, source_root_marker: &str) -> Result<Bundle, AppError> {
    match input {
        CoverageInput::Json(path) => Ok(load_bundle_json(path)?),
        CoverageInput::Lcov(paths) => {
            let mut maps: Vec<LcovMap> = Vec::with_capacity(paths.len());
            for path in paths {
                let text = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                maps.push(parse_lcov(&text)?);
            }
            Ok(bundle_from_lcov(&merge_lcov(maps), "lcov", source_root_marker))
        }
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Filter `bundle` in place and describe the pass as a [`Report`].
pub fn filter_coverage<C: Clock>(
    bundle: &mut Bundle,
    index: &ChangeIndex,
    revisions: &RevisionPair,
    coverage_paths: Vec<String>,
    clock: &C,
) -> (FilterSummary, Report) {
    let started_at = clock.now();
    let summary = filter_bundle(bundle, index);
    let ended_at = clock.now();

    log::info!(
        "retained {} packages, {} classes, {} source files; removed {} packages, {} classes, {} source files; {} missed, {} covered",
        summary.packages_retained,
        summary.classes_retained,
        summary.source_files_retained,
        summary.packages_removed,
        summary.classes_removed,
        summary.source_files_removed,
        summary.counter.missed,
        summary.counter.covered
    );

    let data = ReportData {
        changed_files: count(index.len()),
        changed_lines: count(index.changed_line_count()),
        packages_retained: summary.packages_retained,
        packages_removed: summary.packages_removed,
        classes_retained: summary.classes_retained,
        classes_removed: summary.classes_removed,
        source_files_retained: summary.source_files_retained,
        source_files_removed: summary.source_files_removed,
        lines_erased: summary.lines_erased,
        missed_lines: summary.counter.missed,
        covered_lines: summary.counter.covered,
    };

    let reason = if index.is_empty() {
        REASON_NO_CHANGED_FILES
    } else if summary.packages_retained == 0 {
        REASON_NO_CHANGED_UNITS
    } else {
        REASON_CHANGED_LINES
    };

    let report = Report {
        tool: Tool::default(),
        run: Run {
            started_at: started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ended_at: Some(ended_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            duration_ms: Some((ended_at - started_at).num_milliseconds().max(0) as u64),
        },
        inputs: Inputs {
            base: revisions.base.clone(),
            head: revisions.head.clone(),
            coverage_paths,
        },
        data,
        reasons: vec![reason.to_string()],
        ..Default::default()
    };

    (summary, report)
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// A complete filter run.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub base: String,
    /// Head revision; looked up from the provider when `None`.
    pub head: Option<String>,
    pub options: ChangeOptions,
    pub coverage: CoverageInput,
}

/// Result of [`run_filter`].
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// The filtered coverage tree.
    pub bundle: Bundle,
    pub summary: FilterSummary,
    pub report: Report,
}

/// Resolve revisions, build the change index, load coverage and filter it.
pub fn run_filter<P: DiffProvider + ?Sized, C: Clock>(
    request: &FilterRequest,
    provider: &P,
    clock: &C,
) -> Result<FilterResult, AppError> {
    run_filter_cached(request, provider, &ChangeIndexCache::new(), clock)
}

/// [`run_filter`] reusing indexes held in `cache`.
pub fn run_filter_cached<P: DiffProvider + ?Sized, C: Clock>(
    request: &FilterRequest,
    provider: &P,
    cache: &ChangeIndexCache,
    clock: &C,
) -> Result<FilterResult, AppError> {
    let revisions = resolve_revisions(provider, &request.base, request.head.as_deref())?;
    let index = cache.get_or_build(&revisions, &request.options, || {
        build_change_index(provider, &revisions, &request.options)
    })?;

    let mut bundle = load_coverage(
        &request.coverage,
        &request.options.name_status.source_root_marker,
    )?;
    let (summary, report) = filter_coverage(
        &mut bundle,
        &index,
        &revisions,
        request.coverage.paths(),
        clock,
    );

    Ok(FilterResult {
        bundle,
        summary,
        report,
    })
}

// ============================================================================
// Change Listing
// ============================================================================

/// Render line numbers as `"3"` / `"5-9"` ranges.
pub fn format_ranges(lines: &std::collections::BTreeSet<u32>) -> Vec<String> {
    collapse_lines(lines)
        .into_iter()
        .map(|range| {
            if range.start() == range.end() {
                range.start().to_string()
            } else {
                format!("{}-{}", range.start(), range.end())
            }
        })
        .collect()
}

/// JSON description of a change index.
pub fn change_listing(index: &ChangeIndex, revisions: &RevisionPair) -> serde_json::Value {
    let files: Vec<serde_json::Value> = index
        .iter()
        .map(|record| {
            json!({
                "qualified_name": record.qualified_name(),
                "path": record.relative_path(),
                "change_type": record.change_type().as_str(),
                "lines": format_ranges(record.changed_lines()),
            })
        })
        .collect();

    json!({
        "base": revisions.base,
        "head": revisions.head,
        "changed_lines": index.changed_line_count(),
        "files": files,
    })
}

// ============================================================================
// Tests
// ============================================================================
