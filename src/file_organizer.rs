/// The organize pipeline: describe, match, plan and move one file at a time.
///
/// [`FileOrganizer`] owns everything a run needs (matcher, planner, executor
/// and move log) and is shared by one-shot runs and the watch loop. Each file
/// yields a [`FileOutcome`]; outcomes are collected into a [`RunReport`].
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::CompiledConfig;
use crate::error::{OrganizeError, OrganizeResult};
use crate::file_category::{FileDescriptor, MatchOutcome, RuleMatcher};
use crate::move_executor::MoveExecutor;
use crate::move_log::{MoveLog, MoveLogEntry, is_move_log_name};
use crate::output::Reporter;
use crate::path_planner::PathPlanner;

/// How a run treats the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Only report what would happen.
    pub dry_run: bool,
    /// Append executed moves to the move log.
    pub log_moves: bool,
}

impl RunOptions {
    /// Options for a one-shot run: real runs are always logged so they can be undone.
    pub fn one_shot(dry_run: bool) -> Self {
        Self {
            dry_run,
            log_moves: !dry_run,
        }
    }
}

/// What happened to a single file.
#[derive(Debug)]
pub enum FileOutcome {
    /// The file was moved.
    Moved {
        entry: MoveLogEntry,
        category: String,
    },
    /// Dry run: the file would have been moved.
    Planned {
        entry: MoveLogEntry,
        category: String,
    },
    /// The file matched an exclude pattern.
    Excluded { path: PathBuf },
    /// An expected race or conflict; nothing was changed.
    Skipped { path: PathBuf, error: OrganizeError },
    /// The file could not be moved.
    Failed { path: PathBuf, error: OrganizeError },
}

impl FileOutcome {
    fn from_error(path: &Path, error: OrganizeError) -> Self {
        let path = path.to_path_buf();
        if error.is_skip() {
            Self::Skipped { path, error }
        } else {
            Self::Failed { path, error }
        }
    }

    /// The source path this outcome is about.
    pub fn path(&self) -> &Path {
        match self {
            Self::Moved { entry, .. } | Self::Planned { entry, .. } => &entry.source,
            Self::Excluded { path } | Self::Skipped { path, .. } | Self::Failed { path, .. } => path,
        }
    }
}

/// Collected outcomes of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub moved: Vec<MoveLogEntry>,
    pub planned: Vec<MoveLogEntry>,
    pub excluded: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, OrganizeError)>,
    pub failed: Vec<(PathBuf, OrganizeError)>,
    /// Moved or planned files per category.
    pub category_counts: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Moved { entry, category } => {
                *self.category_counts.entry(category).or_default() += 1;
                self.moved.push(entry);
            }
            FileOutcome::Planned { entry, category } => {
                *self.category_counts.entry(category).or_default() += 1;
                self.planned.push(entry);
            }
            FileOutcome::Excluded { path } => self.excluded.push(path),
            FileOutcome::Skipped { path, error } => self.skipped.push((path, error)),
            FileOutcome::Failed { path, error } => self.failed.push((path, error)),
        }
    }

    /// Number of files that reached the pipeline.
    pub fn total_processed(&self) -> usize {
        self.moved.len()
            + self.planned.len()
            + self.excluded.len()
            + self.skipped.len()
            + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Lists the regular files directly inside `dir`, sorted by name.
///
/// Subdirectories, symlinks and move logs are left out.
pub fn list_candidates(dir: &Path) -> OrganizeResult<Vec<PathBuf>> {
    let unreadable = |source| OrganizeError::SourceDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() || is_move_log_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// Runs files through the organize pipeline.
pub struct FileOrganizer<'a> {
    config: &'a CompiledConfig,
    matcher: RuleMatcher<'a>,
    planner: PathPlanner,
    executor: MoveExecutor,
    reporter: &'a dyn Reporter,
}

impl<'a> FileOrganizer<'a> {
    pub fn new(config: &'a CompiledConfig, options: RunOptions, reporter: &'a dyn Reporter) -> Self {
        let log = (options.log_moves && !options.dry_run)
            .then(|| MoveLog::new(config.move_log_path()));
        Self {
            config,
            matcher: RuleMatcher::new(config),
            planner: PathPlanner::new(&config.target_dir, config.bucket_mode),
            executor: MoveExecutor::new(options.dry_run, log),
            reporter,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    /// Organizes a single file and reports the outcome.
    ///
    /// Per-file problems come back as [`FileOutcome::Skipped`] or
    /// [`FileOutcome::Failed`]. An `Err` means the run cannot continue
    /// (the move log could not be written).
    pub fn process_file(&mut self, path: &Path) -> OrganizeResult<FileOutcome> {
        let outcome = match self.organize(path) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "file not organized");
                FileOutcome::from_error(path, e)
            }
        };
        self.reporter.file_done(&outcome);
        Ok(outcome)
    }

    fn organize(&mut self, path: &Path) -> OrganizeResult<FileOutcome> {
        // Excluded files are not even read.
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if self.config.is_excluded(&name) {
            debug!(file = %name, "excluded");
            return Ok(FileOutcome::Excluded {
                path: path.to_path_buf(),
            });
        }

        let file = FileDescriptor::from_path(path, self.config.detect_extension)?;
        let category = match self.matcher.match_file(&file) {
            MatchOutcome::Skip => {
                return Ok(FileOutcome::Excluded {
                    path: path.to_path_buf(),
                });
            }
            MatchOutcome::Category(category) => category,
        };

        let planned = self.planner.plan(&file, &category.name);
        let entry = self.executor.execute(&file, &planned, &mut self.planner)?;
        if self.is_dry_run() {
            Ok(FileOutcome::Planned {
                entry,
                category: category.name,
            })
        } else {
            Ok(FileOutcome::Moved {
                entry,
                category: category.name,
            })
        }
    }

    /// Organizes every file currently in the source directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the source directory cannot be listed or the move
    /// log cannot be written; files moved before a log failure stay moved
    /// and recorded.
    pub fn organize_once(&mut self) -> OrganizeResult<RunReport> {
        let source_dir = self.config.source_dir.clone();
        let files = list_candidates(&source_dir)?;
        info!(source = %source_dir.display(), files = files.len(), dry_run = self.is_dry_run(), "organizing");

        self.reporter.run_started(&source_dir, files.len(), self.is_dry_run());

        let mut report = RunReport::default();
        for path in &files {
            let outcome = self.process_file(path)?;
            report.record(outcome);
        }

        self.reporter.run_finished(&report, self.is_dry_run());
        Ok(report)
    }
}
