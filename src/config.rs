//! Organizer configuration.
//!
//! This module loads the organizer configuration from a TOML or YAML file,
//! validates it, and compiles it into a [`CompiledConfig`] with pre-built
//! regexes and glob patterns. The compiled value is immutable for the run and
//! is passed by reference into every component.
//!
//! # Configuration File Format
//!
//! ```toml
//! source_dir = "~/Downloads"
//! target_dir = "~/Sorted"
//! bucket_mode = "year_month"      # none | year | year_month
//! unknown_category = "Other"
//! exclude_regex = ["\\.part$", "\\.crdownload$"]
//! exclude_globs = ["~$*"]
//!
//! [extensions]
//! Images = ["jpg", "png"]
//! Documents = ["pdf", "docx"]
//!
//! [[rules]]
//! name = "invoices"
//! if_name_regex = "(?i)invoice"
//! if_ext_in = ["pdf"]
//! to_category = "Finance"
//!
//! [[rules]]
//! name = "big videos"
//! if_ext_in = ["mp4", "mkv"]
//! min_size_mb = 500
//! to_category = "Videos/Large"
//! ```
//!
//! The same keys are accepted in YAML when the file ends in `.yaml` or `.yml`.

use glob::Pattern;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::move_log::MOVE_LOG_FILE;

/// Bytes per megabyte used by the size conditions.
pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML/YAML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// A rule declares no condition at all.
    #[error("Rule '{0}' has no conditions")]
    EmptyRule(String),
    /// A rule has a negative size bound or `min_size_mb > max_size_mb`.
    #[error("Rule '{0}' has an invalid size range")]
    InvalidSizeRange(String),
    /// A category name is empty or tries to escape the target directory.
    #[error("Invalid category name '{0}'")]
    InvalidCategory(String),
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// How destination folders are grouped by modification date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketMode {
    /// `target/category/name`
    #[default]
    None,
    /// `target/category/YYYY/name`
    Year,
    /// `target/category/YYYY/MM/name`
    YearMonth,
}

/// Raw configuration as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizerConfig {
    /// Directory whose files get organized.
    pub source_dir: PathBuf,

    /// Root under which category folders are created.
    pub target_dir: PathBuf,

    #[serde(default)]
    pub bucket_mode: BucketMode,

    /// Category used when neither a rule nor the extension table matches.
    #[serde(default = "default_unknown_category")]
    pub unknown_category: String,

    /// Category to extension list, evaluated in declared order.
    #[serde(default)]
    pub extensions: IndexMap<String, Vec<String>>,

    /// Ordered rules; the first match wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Basename regexes (search semantics) that exclude a file.
    #[serde(default)]
    pub exclude_regex: Vec<String>,

    /// Basename glob patterns that exclude a file.
    #[serde(default)]
    pub exclude_globs: Vec<String>,

    /// Sniff content to find an extension for files that have none.
    #[serde(default = "default_detect_extension")]
    pub detect_extension: bool,

    /// Quiet interval a file must stay unchanged before watch mode moves it.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    /// Record watch-mode moves in the undoable move log.
    #[serde(default)]
    pub watch_log_moves: bool,
}

/// A single classification rule as written in the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub if_name_regex: Option<String>,
    #[serde(default)]
    pub if_ext_in: Option<Vec<String>>,
    #[serde(default)]
    pub min_size_mb: Option<f64>,
    #[serde(default)]
    pub max_size_mb: Option<f64>,
    pub to_category: String,
}

fn default_unknown_category() -> String {
    "Other".to_string()
}

fn default_detect_extension() -> bool {
    true
}

fn default_settle_interval_ms() -> u64 {
    1000
}

impl OrganizerConfig {
    /// Load configuration from a file.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. `.dirsortrc.toml` in the current directory
    /// 3. `config.yaml` in the current directory
    /// 4. `~/.config/dirsort/config.toml`
    ///
    /// There is no built-in default: source and target directories must be
    /// configured, so a missing file is an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        for candidate in [".dirsortrc.toml", "config.yaml"] {
            let local_config = PathBuf::from(candidate);
            if local_config.exists() {
                return Self::load_from_file(&local_config);
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("dirsort")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Err(ConfigError::ConfigNotFound(PathBuf::from(".dirsortrc.toml")))
    }

    /// Load configuration from a specific file, choosing the parser by extension.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let is_yaml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Validate and compile into the structure the organizer runs on.
    pub fn compile(self) -> Result<CompiledConfig, ConfigError> {
        CompiledConfig::new(self)
    }
}

/// A validated rule with its regex compiled and extensions normalized.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub name_regex: Option<Regex>,
    pub extensions: Option<HashSet<String>>,
    pub min_size_bytes: Option<f64>,
    pub max_size_bytes: Option<f64>,
    pub to_category: String,
}

/// Compiled configuration, ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub bucket_mode: BucketMode,
    pub unknown_category: String,
    pub extensions: Vec<(String, HashSet<String>)>,
    pub rules: Vec<CompiledRule>,
    pub exclude_regex: Vec<Regex>,
    pub exclude_globs: Vec<Pattern>,
    pub detect_extension: bool,
    pub settle_interval: Duration,
    pub watch_log_moves: bool,
}

impl CompiledConfig {
    fn new(raw: OrganizerConfig) -> Result<Self, ConfigError> {
        let exclude_regex = raw
            .exclude_regex
            .iter()
            .map(|pattern| compile_regex(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let exclude_globs = raw
            .exclude_globs
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rules = raw
            .rules
            .into_iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;

        let mut extensions = Vec::with_capacity(raw.extensions.len());
        for (category, exts) in raw.extensions {
            validate_category(&category)?;
            extensions.push((category, exts.iter().map(|e| normalize_extension(e)).collect()));
        }

        validate_category(&raw.unknown_category)?;

        Ok(Self {
            source_dir: expand_home(&raw.source_dir),
            target_dir: expand_home(&raw.target_dir),
            bucket_mode: raw.bucket_mode,
            unknown_category: raw.unknown_category,
            extensions,
            rules,
            exclude_regex,
            exclude_globs,
            detect_extension: raw.detect_extension,
            settle_interval: Duration::from_millis(raw.settle_interval_ms),
            watch_log_moves: raw.watch_log_moves,
        })
    }

    /// Check whether a basename matches any exclude regex or glob.
    pub fn is_excluded(&self, basename: &str) -> bool {
        self.exclude_regex.iter().any(|regex| regex.is_match(basename))
            || self
                .exclude_globs
                .iter()
                .any(|pattern| pattern.matches(basename))
    }

    /// Location of the move log for this configuration.
    pub fn move_log_path(&self) -> PathBuf {
        self.target_dir.join(MOVE_LOG_FILE)
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn compile_rule(rule: RuleConfig) -> Result<CompiledRule, ConfigError> {
    let name = rule.name.unwrap_or_else(|| "unnamed".to_string());

    let name_regex = rule.if_name_regex.as_deref().map(compile_regex).transpose()?;

    // An empty extension list means "no extension condition".
    let extensions = rule
        .if_ext_in
        .filter(|exts| !exts.is_empty())
        .map(|exts| exts.iter().map(|e| normalize_extension(e)).collect::<HashSet<_>>());

    let min_size_bytes = rule.min_size_mb.map(|mb| mb * BYTES_PER_MB);
    let max_size_bytes = rule.max_size_mb.map(|mb| mb * BYTES_PER_MB);

    if name_regex.is_none()
        && extensions.is_none()
        && min_size_bytes.is_none()
        && max_size_bytes.is_none()
    {
        return Err(ConfigError::EmptyRule(name));
    }

    let negative = [min_size_bytes, max_size_bytes]
        .iter()
        .flatten()
        .any(|bytes| bytes.is_nan() || *bytes < 0.0);
    let inverted = matches!((min_size_bytes, max_size_bytes), (Some(min), Some(max)) if min > max);
    if negative || inverted {
        return Err(ConfigError::InvalidSizeRange(name));
    }

    validate_category(&rule.to_category)?;

    Ok(CompiledRule {
        name,
        name_regex,
        extensions,
        min_size_bytes,
        max_size_bytes,
        to_category: rule.to_category,
    })
}

/// Categories are relative folder names; they may nest (`Videos/Large`) but
/// must not be empty, absolute, or contain `..`.
fn validate_category(category: &str) -> Result<(), ConfigError> {
    let path = Path::new(category);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            std::path::Component::ParentDir
                | std::path::Component::RootDir
                | std::path::Component::Prefix(_)
        )
    });
    if category.trim().is_empty() || escapes {
        return Err(ConfigError::InvalidCategory(category.to_string()));
    }
    Ok(())
}

/// Normalize an extension for comparison: lowercase, no leading dot.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
