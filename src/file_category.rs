/// File categorization: describing a file and choosing its category.
///
/// Classification is two-tiered. Explicit rules are tried in declared order
/// and the first one whose conditions all hold wins; otherwise the extension
/// table decides; otherwise the configured unknown category is used. Exclude
/// patterns are checked before anything else and short-circuit to
/// [`MatchOutcome::Skip`].
///
/// # Examples
///
/// ```
/// use dirsort::config::OrganizerConfig;
/// use dirsort::file_category::{FileDescriptor, MatchOutcome, RuleMatcher};
///
/// let config = OrganizerConfig::from_toml_str(r#"
///     source_dir = "/in"
///     target_dir = "/out"
///     [extensions]
///     Images = ["jpg"]
/// "#).unwrap().compile().unwrap();
///
/// let matcher = RuleMatcher::new(&config);
/// let file = FileDescriptor::synthetic("/in/PHOTO.JPG", 10);
/// match matcher.match_file(&file) {
///     MatchOutcome::Category(category) => assert_eq!(category.name, "Images"),
///     MatchOutcome::Skip => unreachable!(),
/// }
/// ```
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::config::{CompiledConfig, CompiledRule, normalize_extension};
use crate::error::{OrganizeError, OrganizeResult};

/// Snapshot of a file taken right before it is classified.
///
/// Never cached: the organizer builds a fresh descriptor for every
/// evaluation because files change between enumeration and move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Final path component, lossily decoded. Used for matching only; moves
    /// keep the name exactly as it is on disk.
    pub basename: String,
    /// Lowercase extension without the dot; empty when there is none.
    pub extension: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileDescriptor {
    /// Reads a descriptor from the filesystem.
    ///
    /// When `detect_extension` is set and the name has no extension, the
    /// content's magic bytes are sniffed to find one.
    pub fn from_path(path: &Path, detect_extension: bool) -> OrganizeResult<Self> {
        let metadata = fs::metadata(path).map_err(|e| source_error(path, e))?;
        let modified = metadata.modified().map_err(|e| source_error(path, e))?;

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut extension = path
            .extension()
            .map(|ext| normalize_extension(&ext.to_string_lossy()))
            .unwrap_or_default();

        if extension.is_empty() && detect_extension {
            match infer::get_from_path(path) {
                Ok(Some(kind)) => {
                    debug!(file = %basename, detected = kind.extension(), "sniffed extension");
                    extension = kind.extension().to_string();
                }
                Ok(None) => {}
                Err(e) => return Err(source_error(path, e)),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            basename,
            extension,
            size: metadata.len(),
            modified,
        })
    }

    /// Builds a descriptor without touching the filesystem, modified "now".
    pub fn synthetic(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| normalize_extension(&ext.to_string_lossy()))
            .unwrap_or_default();
        Self {
            path,
            basename,
            extension,
            size,
            modified: SystemTime::now(),
        }
    }

    /// Modification time in local time, used for date bucketing.
    pub fn modified_local(&self) -> DateTime<Local> {
        DateTime::<Local>::from(self.modified)
    }
}

fn source_error(path: &Path, e: std::io::Error) -> OrganizeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        OrganizeError::SourceVanished {
            path: path.to_path_buf(),
        }
    } else {
        OrganizeError::SourceUnreadable {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

/// Which tier of the classification produced the category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySource {
    /// An explicit rule, by name.
    Rule(String),
    /// The extension table.
    ExtensionTable,
    /// Nothing matched; the unknown category was used.
    Fallback,
}

/// A chosen destination category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Folder name (may contain `/` for nested categories).
    pub name: String,
    pub source: CategorySource,
}

/// Result of classifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The file matched an exclude pattern and must not be touched.
    Skip,
    Category(Category),
}

/// Evaluates the configured rules against file descriptors.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatcher<'a> {
    config: &'a CompiledConfig,
}

impl<'a> RuleMatcher<'a> {
    pub fn new(config: &'a CompiledConfig) -> Self {
        Self { config }
    }

    /// Classifies a file: exclusions, then rules in order, then the extension table.
    pub fn match_file(&self, file: &FileDescriptor) -> MatchOutcome {
        if self.config.is_excluded(&file.basename) {
            debug!(file = %file.basename, "excluded");
            return MatchOutcome::Skip;
        }

        if let Some(rule) = self.config.rules.iter().find(|rule| rule_matches(rule, file)) {
            debug!(file = %file.basename, rule = %rule.name, category = %rule.to_category, "rule matched");
            return MatchOutcome::Category(Category {
                name: rule.to_category.clone(),
                source: CategorySource::Rule(rule.name.clone()),
            });
        }

        if !file.extension.is_empty()
            && let Some((category, _)) = self
                .config
                .extensions
                .iter()
                .find(|(_, exts)| exts.contains(&file.extension))
        {
            debug!(file = %file.basename, category = %category, "extension table matched");
            return MatchOutcome::Category(Category {
                name: category.clone(),
                source: CategorySource::ExtensionTable,
            });
        }

        debug!(file = %file.basename, category = %self.config.unknown_category, "no match, using fallback");
        MatchOutcome::Category(Category {
            name: self.config.unknown_category.clone(),
            source: CategorySource::Fallback,
        })
    }
}

/// A rule matches when every condition it declares holds.
fn rule_matches(rule: &CompiledRule, file: &FileDescriptor) -> bool {
    if let Some(regex) = &rule.name_regex
        && !regex.is_match(&file.basename)
    {
        return false;
    }

    if let Some(exts) = &rule.extensions
        && !exts.contains(&file.extension)
    {
        return false;
    }

    let size = file.size as f64;
    if let Some(min) = rule.min_size_bytes
        && size < min
    {
        return false;
    }
    if let Some(max) = rule.max_size_bytes
        && size > max
    {
        return false;
    }

    true
}
