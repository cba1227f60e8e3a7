//! Configuration parsing and management for deltacov.
//!
//! This crate provides:
//! - The `deltacov.toml` schema (`Config`, `PathConfig`)
//! - TOML parsing and validation
//! - Config discovery from a directory upward
//! - Precedence handling (CLI > config file > defaults)
//! - Include/exclude glob matching for changed paths

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "deltacov.toml";

pub const DEFAULT_DIFF_EXECUTABLE: &str = "git";
pub const DEFAULT_SOURCE_ROOT_MARKER: &str = "src/main/java/";
pub const DEFAULT_SOURCE_EXTENSION: &str = "java";

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Path filtering configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    /// Glob patterns for changed files to exclude.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Glob patterns for changed files to include (allowlist).
    /// If empty, all files are included.
    #[serde(default)]
    pub include: Vec<String>,
}

/// Contents of a `deltacov.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Diff tool executable.
    #[serde(default)]
    pub diff_executable: Option<String>,

    /// Base revision of the comparison.
    #[serde(default)]
    pub base_revision: Option<String>,

    /// Head revision; resolved from the working copy when absent.
    #[serde(default)]
    pub head_revision: Option<String>,

    /// Path segment marking the start of the package directory.
    #[serde(default)]
    pub source_root_marker: Option<String>,

    /// Extension of source files, with or without a leading dot.
    #[serde(default)]
    pub source_extension: Option<String>,

    /// Path filtering configuration.
    #[serde(default)]
    pub paths: PathConfig,
}

// ============================================================================
// Effective Configuration
// ============================================================================

/// Effective configuration with all values resolved.
///
/// This represents the final configuration after applying:
/// 1. Built-in defaults
/// 2. Config file values
/// 3. CLI overrides
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub diff_executable: String,
    pub base_revision: Option<String>,
    pub head_revision: Option<String>,
    pub source_root_marker: String,
    /// Extension without the leading dot.
    pub source_extension: String,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            diff_executable: DEFAULT_DIFF_EXECUTABLE.to_string(),
            base_revision: None,
            head_revision: None,
            source_root_marker: DEFAULT_SOURCE_ROOT_MARKER.to_string(),
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }
}

impl EffectiveConfig {
    /// Check that the resolved values are usable for a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.diff_executable.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "diff_executable must not be empty".to_string(),
            ));
        }
        if self.source_root_marker.is_empty() {
            return Err(ConfigError::InvalidValue(
                "source_root_marker must not be empty".to_string(),
            ));
        }
        if self.source_extension.is_empty() {
            return Err(ConfigError::InvalidValue(
                "source_extension must not be empty".to_string(),
            ));
        }
        validate_patterns(&self.include_patterns)?;
        validate_patterns(&self.exclude_patterns)?;
        Ok(())
    }

    /// Base revision, or an error naming the missing setting.
    pub fn require_base(&self) -> Result<&str, ConfigError> {
        self.base_revision
            .as_deref()
            .filter(|base| !base.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "base_revision is required (set it in deltacov.toml or pass --base)"
                        .to_string(),
                )
            })
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if let Some(marker) = &config.source_root_marker
        && marker.is_empty()
    {
        return Err(ConfigError::InvalidValue(
            "source_root_marker must not be empty".to_string(),
        ));
    }
    if let Some(ext) = &config.source_extension
        && normalize_extension(ext).is_empty()
    {
        return Err(ConfigError::InvalidValue(format!(
            "source_extension must name an extension, got '{}'",
            ext
        )));
    }
    validate_patterns(&config.paths.include)?;
    validate_patterns(&config.paths.exclude)?;
    Ok(())
}

fn validate_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        glob::Pattern::new(pattern).map_err(|e| {
            ConfigError::InvalidValue(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
    }
    Ok(())
}

/// Strip one leading dot from an extension.
pub fn normalize_extension(ext: &str) -> &str {
    ext.strip_prefix('.').unwrap_or(ext)
}

/// Find and load `deltacov.toml` in `start` or its nearest ancestor.
///
/// A file that exists but fails to load is returned as an error rather
/// than skipped.
pub fn discover_config_from(start: &Path) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            let config = load_config(&config_path)?;
            return Ok(Some((config_path, config)));
        }

        if !current.pop() {
            return Ok(None);
        }
    }
}

/// Find and load `deltacov.toml` starting from the current directory.
pub fn discover_config() -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let cwd = std::env::current_dir()?;
    discover_config_from(&cwd)
}

// ============================================================================
// Precedence Resolution
// ============================================================================

/// CLI override options.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub diff_executable: Option<String>,
    pub base_revision: Option<String>,
    pub head_revision: Option<String>,
    pub source_root_marker: Option<String>,
    pub source_extension: Option<String>,
}

/// Resolve effective configuration from the config file and CLI overrides.
///
/// Precedence: CLI > config file > built-in defaults
pub fn resolve_config(config: Option<&Config>, cli: &CliOverrides) -> EffectiveConfig {
    let mut effective = EffectiveConfig::default();

    if let Some(config) = config {
        if let Some(exe) = &config.diff_executable {
            effective.diff_executable = exe.clone();
        }
        if let Some(base) = &config.base_revision {
            effective.base_revision = Some(base.clone());
        }
        if let Some(head) = &config.head_revision {
            effective.head_revision = Some(head.clone());
        }
        if let Some(marker) = &config.source_root_marker {
            effective.source_root_marker = marker.clone();
        }
        if let Some(ext) = &config.source_extension {
            effective.source_extension = normalize_extension(ext).to_string();
        }
        effective.include_patterns = config.paths.include.clone();
        effective.exclude_patterns = config.paths.exclude.clone();
    }

    if let Some(exe) = &cli.diff_executable {
        effective.diff_executable = exe.clone();
    }
    if let Some(base) = &cli.base_revision {
        effective.base_revision = Some(base.clone());
    }
    if let Some(head) = &cli.head_revision {
        effective.head_revision = Some(head.clone());
    }
    if let Some(marker) = &cli.source_root_marker {
        effective.source_root_marker = marker.clone();
    }
    if let Some(ext) = &cli.source_extension {
        effective.source_extension = normalize_extension(ext).to_string();
    }

    effective
}

// ============================================================================
// Path Filtering
// ============================================================================

/// Check if a path matches any of the given glob patterns.
pub fn matches_any_pattern(path: &str, patterns: &[String]) -> bool {
    for pattern in patterns {
        if let Ok(glob_pattern) = glob::Pattern::new(pattern)
            && glob_pattern.matches(path)
        {
            return true;
        }
    }
    false
}

/// Filter a path based on include/exclude patterns.
///
/// Returns `true` if the path should be considered for change detection.
pub fn should_include_path(
    path: &str,
    include_patterns: &[String],
    exclude_patterns: &[String],
) -> bool {
    if !include_patterns.is_empty() && !matches_any_pattern(path, include_patterns) {
        return false;
    }

    !matches_any_pattern(path, exclude_patterns)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config("").unwrap();
        assert!(config.base_revision.is_none());
        assert!(config.paths.include.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
diff_executable = "/usr/local/bin/git"
base_revision = "origin/main"
head_revision = "feature"
source_root_marker = "src/"
source_extension = ".kt"

[paths]
include = ["src/main/**"]
exclude = ["**/generated/**"]
"#;
        let config = parse_config(toml).unwrap();

        assert_eq!(config.diff_executable.as_deref(), Some("/usr/local/bin/git"));
        assert_eq!(config.base_revision.as_deref(), Some("origin/main"));
        assert_eq!(config.head_revision.as_deref(), Some("feature"));
        assert_eq!(config.source_root_marker.as_deref(), Some("src/"));
        assert_eq!(config.source_extension.as_deref(), Some(".kt"));
        assert_eq!(config.paths.include, vec!["src/main/**"]);
        assert_eq!(config.paths.exclude, vec!["**/generated/**"]);
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let err = parse_config("base = \"main\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_empty_marker_is_invalid() {
        let err = parse_config("source_root_marker = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_dot_only_extension_is_invalid() {
        assert!(parse_config("source_extension = \".\"").is_err());
        assert!(parse_config("source_extension = \"\"").is_err());
    }

    #[test]
    fn test_bad_glob_is_invalid() {
        let err = parse_config("[paths]\nexclude = [\"src/[\"]").unwrap_err();
        assert!(err.to_string().contains("src/["));
    }

    #[test]
    fn test_resolve_config_defaults() {
        let effective = resolve_config(None, &CliOverrides::default());
        assert_eq!(effective, EffectiveConfig::default());
        assert_eq!(effective.diff_executable, "git");
        assert_eq!(effective.source_root_marker, "src/main/java/");
        assert_eq!(effective.source_extension, "java");
        assert!(effective.require_base().is_err());
    }

    #[test]
    fn test_resolve_config_file_then_cli() {
        let config = parse_config(
            "base_revision = \"v1\"\nhead_revision = \"v2\"\nsource_extension = \".kt\"",
        )
        .unwrap();
        let cli = CliOverrides {
            base_revision: Some("v0".to_string()),
            ..Default::default()
        };

        let effective = resolve_config(Some(&config), &cli);

        assert_eq!(effective.base_revision.as_deref(), Some("v0"));
        assert_eq!(effective.head_revision.as_deref(), Some("v2"));
        assert_eq!(effective.source_extension, "kt");
        assert_eq!(effective.require_base().unwrap(), "v0");
    }

    #[test]
    fn test_validate_rejects_empty_cli_values() {
        let cli = CliOverrides {
            source_root_marker: Some(String::new()),
            ..Default::default()
        };
        let effective = resolve_config(None, &cli);
        assert!(effective.validate().is_err());

        let cli = CliOverrides {
            source_extension: Some(".".to_string()),
            ..Default::default()
        };
        assert!(resolve_config(None, &cli).validate().is_err());
    }

    #[test]
    fn test_blank_base_is_missing() {
        let effective = EffectiveConfig {
            base_revision: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(effective.require_base().is_err());
    }

    #[test]
    fn test_discover_config_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "base_revision = \"main\"\n").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let (path, config) = discover_config_from(&nested).unwrap().unwrap();

        assert_eq!(path, dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(config.base_revision.as_deref(), Some("main"));
    }

    #[test]
    fn test_discover_config_reports_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "base_revision = [").unwrap();
        assert!(discover_config_from(dir.path()).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_matches_any_pattern() {
        let patterns = vec!["**/generated/**".to_string()];
        assert!(matches_any_pattern(
            "src/main/java/com/x/generated/Foo.java",
            &patterns
        ));
        assert!(!matches_any_pattern("src/main/java/com/x/Foo.java", &patterns));
    }

    #[test]
    fn test_should_include_path() {
        let include = vec!["src/main/**".to_string()];
        let exclude = vec!["**/Legacy*.java".to_string()];

        assert!(should_include_path(
            "src/main/java/com/x/Foo.java",
            &include,
            &exclude
        ));
        assert!(!should_include_path(
            "src/main/java/com/x/LegacyFoo.java",
            &include,
            &exclude
        ));
        assert!(!should_include_path("lib/src/main/java/A.java", &include, &exclude));
        assert!(should_include_path("anything/at/all.java", &[], &[]));
    }
}
