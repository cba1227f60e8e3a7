//! Git command-line adapter for deltacov.
//!
//! [`GitCli`] implements the [`DiffProvider`] port by running the `git`
//! executable with explicit argument vectors (never a shell string) in the
//! project root. Output is captured to completion before the exit status is
//! inspected, so a full pipe can never stall the child.

use std::path::{Path, PathBuf};
use std::process::Command;

use deltacov_ports::DiffProvider;
use thiserror::Error;

/// Context lines requested for per-file diffs. Larger files are split into
/// several hunks, which the line parser re-bases on.
pub const FULL_CONTEXT_LINES: u32 = 100_000;

/// Default executable name, resolved through `PATH`.
pub const DEFAULT_GIT: &str = "git";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while running git.
#[derive(Debug, Error)]
pub enum GitError {
    /// The executable could not be started.
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("'{command}' failed (exit code {code}): {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The command succeeded but printed nothing where output is required.
    #[error("'{command}' produced no output")]
    EmptyOutput { command: String },
}

// ============================================================================
// Git Command Runner
// ============================================================================

/// Diff provider backed by the git command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    executable: PathBuf,
    root: PathBuf,
}

impl GitCli {
    /// Create a provider running `git` from `PATH` in `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_executable(DEFAULT_GIT, root)
    }

    /// Create a provider running a specific git executable in `root`.
    pub fn with_executable(executable: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            root: root.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git with `args` and return its complete standard output.
    pub fn run(&self, args: &[String]) -> Result<String, GitError> {
        let command = self.describe(args);
        log::info!("running {}", command);

        let output = Command::new(&self.executable)
            .current_dir(&self.root)
            .args(args)
            .output()
            .map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::Failed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Name-status listing between two revisions.
    pub fn diff_name_status(&self, base: &str, head: &str) -> Result<String, GitError> {
        self.run(&name_status_args(base, head))
    }

    /// Whole-file unified diff of `path` between two revisions.
    pub fn diff_full_context(&self, base: &str, head: &str, path: &str) -> Result<String, GitError> {
        self.run(&full_context_args(base, head, path))
    }

    /// Whole-file diff of a file moved or copied from `from` to `to`, with
    /// rename and copy detection pairing the two paths.
    pub fn diff_full_context_renamed(
        &self,
        base: &str,
        head: &str,
        from: &str,
        to: &str,
    ) -> Result<String, GitError> {
        let diff = self.run(&renamed_full_context_args(base, head, from, to))?;
        Ok(destination_section(&diff, to).to_string())
    }

    /// Current `HEAD` revision, trimmed.
    pub fn rev_parse_head(&self) -> Result<String, GitError> {
        let args = head_revision_args();
        let revision = self.run(&args)?.trim().to_string();
        if revision.is_empty() {
            return Err(GitError::EmptyOutput {
                command: self.describe(&args),
            });
        }
        Ok(revision)
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

impl DiffProvider for GitCli {
    fn name_status(&self, base: &str, head: &str) -> Result<String, String> {
        self.diff_name_status(base, head).map_err(|e| e.to_string())
    }

    fn full_context_diff(&self, base: &str, head: &str, path: &str) -> Result<String, String> {
        self.diff_full_context(base, head, path)
            .map_err(|e| e.to_string())
    }

    fn renamed_full_context_diff(
        &self,
        base: &str,
        head: &str,
        from: &str,
        to: &str,
    ) -> Result<String, String> {
        self.diff_full_context_renamed(base, head, from, to)
            .map_err(|e| e.to_string())
    }

    fn head_revision(&self) -> Result<String, String> {
        self.rev_parse_head().map_err(|e| e.to_string())
    }
}

// ============================================================================
// Argument Vectors
// ============================================================================

fn common_diff_args() -> Vec<String> {
    ["-c", "core.quotePath=false", "diff", "--no-color", "--no-ext-diff"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Arguments for `git diff --name-status <base> <head>`.
pub fn name_status_args(base: &str, head: &str) -> Vec<String> {
    let mut args = common_diff_args();
    args.push("--name-status".to_string());
    args.push(base.to_string());
    args.push(head.to_string());
    args
}

/// Arguments for a whole-file diff of one path between two revisions.
pub fn full_context_args(base: &str, head: &str, path: &str) -> Vec<String> {
    let mut args = common_diff_args();
    args.push(format!("--unified={FULL_CONTEXT_LINES}"));
    args.push(base.to_string());
    args.push(head.to_string());
    args.push("--".to_string());
    args.push(path.to_string());
    args
}

/// Arguments for a whole-file diff of a renamed or copied file.
///
/// Both paths go into the pathspec and copy detection (which implies rename
/// detection) is forced, so git emits one paired entry whose hunks hold only
/// the edits. `--find-copies-harder` lets an unmodified source pair with its
/// copy.
pub fn renamed_full_context_args(base: &str, head: &str, from: &str, to: &str) -> Vec<String> {
    let mut args = common_diff_args();
    args.push(format!("--unified={FULL_CONTEXT_LINES}"));
    args.push("-C".to_string());
    args.push("--find-copies-harder".to_string());
    args.push(base.to_string());
    args.push(head.to_string());
    args.push("--".to_string());
    args.push(from.to_string());
    args.push(to.to_string());
    args
}

/// The per-file section of a multi-file diff that ends at `to`.
///
/// A copy whose source was also edited yields two sections; only the one
/// leading to the destination describes its lines. Output without a
/// matching section is returned unchanged.
pub fn destination_section<'a>(diff: &'a str, to: &str) -> &'a str {
    let markers = [
        format!("+++ b/{to}"),
        format!("rename to {to}"),
        format!("copy to {to}"),
    ];
    let mut starts: Vec<usize> = diff
        .match_indices("diff --git ")
        .map(|(at, _)| at)
        .filter(|&at| at == 0 || diff[..at].ends_with('\n'))
        .collect();
    starts.push(diff.len());

    starts
        .windows(2)
        .map(|w| &diff[w[0]..w[1]])
        .find(|section| {
            section
                .lines()
                .take_while(|line| !line.starts_with("@@"))
                .any(|line| markers.iter().any(|m| line == m))
        })
        .unwrap_or(diff)
}

/// Arguments for `git rev-parse HEAD`.
pub fn head_revision_args() -> Vec<String> {
    vec!["rev-parse".to_string(), "HEAD".to_string()]
}

// ============================================================================
// Tests
// ============================================================================
