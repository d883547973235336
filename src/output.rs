//! Output formatting and styling module.
//!
//! All user-facing output goes through the [`Reporter`] trait so the
//! pipelines never print directly. [`ConsoleReporter`] renders colored
//! status lines, a progress bar and summary tables; [`NullReporter`] prints
//! nothing and is what tests and embedders use.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::OrganizeError;
use crate::file_organizer::{FileOutcome, RunReport};
use crate::move_log::MoveLogEntry;
use crate::undo::UndoReport;
use crate::watch::WatchReport;

/// Receives progress and results from the organize, undo and watch pipelines.
///
/// Every method has a no-op default, so implementors only override what
/// they care about.
pub trait Reporter: Send + Sync {
    /// A one-shot run is about to process `total` files.
    fn run_started(&self, _source: &Path, _total: usize, _dry_run: bool) {}

    /// One file went through the pipeline.
    fn file_done(&self, _outcome: &FileOutcome) {}

    /// A one-shot run completed.
    fn run_finished(&self, _report: &RunReport, _dry_run: bool) {}

    /// One move log entry was reversed, or could not be.
    fn entry_undone(&self, _entry: &MoveLogEntry, _result: Result<(), &OrganizeError>) {}

    /// An undo completed.
    fn undo_finished(&self, _report: &UndoReport) {}

    /// Watch mode started on `dir`.
    fn watch_started(&self, _dir: &Path, _dry_run: bool) {}

    /// A watched file disappeared before it settled.
    fn watch_dropped(&self, _path: &Path) {}

    /// Watch mode stopped.
    fn watch_stopped(&self, _report: &WatchReport) {}
}

/// A reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Colored terminal output with a progress bar for one-shot runs.
///
/// Produces:
/// - Success lines (green ✓)
/// - Error lines (red ✗, on stderr)
/// - Warning lines (yellow ⚠)
/// - Info lines (cyan)
/// - Summary tables with per-category counts
pub struct ConsoleReporter {
    verbose: bool,
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    /// Creates a console reporter. `verbose` also lists excluded files.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            progress: Mutex::new(None),
        }
    }

    /// Prints a line without breaking an active progress bar.
    fn line(&self, message: String) {
        match self.progress.lock() {
            Ok(guard) if guard.is_some() => {
                if let Some(pb) = guard.as_ref() {
                    pb.println(message);
                }
            }
            _ => println!("{message}"),
        }
    }

    fn success(&self, message: &str) {
        self.line(format!("{} {}", "✓".green(), message));
    }

    fn error(&self, message: &str) {
        match self.progress.lock() {
            Ok(guard) if guard.is_some() => {
                if let Some(pb) = guard.as_ref() {
                    pb.suspend(|| eprintln!("{} {}", "✗".red(), message));
                }
            }
            _ => eprintln!("{} {}", "✗".red(), message),
        }
    }

    fn warning(&self, message: &str) {
        self.line(format!("{} {}", "⚠".yellow(), message));
    }

    fn info(&self, message: &str) {
        self.line(message.cyan().to_string());
    }

    fn header(&self, header: &str) {
        self.line(format!("\n{}", header.bold()));
    }

    fn dry_run_notice(&self, message: &str) {
        self.line(format!("[DRY RUN] {message}").yellow().to_string());
    }

    fn tick(&self) {
        if let Ok(guard) = self.progress.lock()
            && let Some(pb) = guard.as_ref()
        {
            pb.inc(1);
        }
    }

    /// Creates a progress bar for `total` files.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }

    /// Prints a summary table with file counts per category.
    pub fn summary_table(&self, category_counts: &BTreeMap<String, usize>, total_files: usize) {
        self.header("SUMMARY");

        let width = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8); // "Category"

        self.line(format!("{:<width$} | {}", "Category".bold(), "Files".bold()));
        self.line("-".repeat(width + 10));

        for (category, count) in category_counts {
            self.line(format!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                file_word(*count)
            ));
        }

        self.line("-".repeat(width + 10));
        self.line(format!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            file_word(total_files)
        ));
    }

    fn problem_list(&self, title: &str, problems: &[(std::path::PathBuf, OrganizeError)]) {
        if problems.is_empty() {
            return;
        }
        self.header(title);
        for (path, error) in problems {
            self.line(format!("  {}: {}", path.display(), error));
        }
    }
}

fn file_word(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

impl Reporter for ConsoleReporter {
    fn run_started(&self, source: &Path, total: usize, dry_run: bool) {
        if dry_run {
            self.dry_run_notice(&format!("Previewing {}", source.display()));
        } else {
            self.info(&format!("Organizing {}", source.display()));
        }
        if total > 0
            && let Ok(mut guard) = self.progress.lock()
        {
            *guard = Some(Self::create_progress_bar(total as u64));
        }
    }

    fn file_done(&self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Moved { entry, .. } => self.success(&format!(
                "{} → {}",
                entry.source.display(),
                entry.destination.display()
            )),
            FileOutcome::Planned { entry, .. } => self.dry_run_notice(&format!(
                "{} → {}",
                entry.source.display(),
                entry.destination.display()
            )),
            FileOutcome::Excluded { path } => {
                if self.verbose {
                    self.line(format!("  excluded {}", path.display()).dimmed().to_string());
                }
            }
            FileOutcome::Skipped { error, .. } => self.warning(&error.to_string()),
            FileOutcome::Failed { error, .. } => self.error(&error.to_string()),
        }
        self.tick();
    }

    fn run_finished(&self, report: &RunReport, dry_run: bool) {
        if let Ok(mut guard) = self.progress.lock()
            && let Some(pb) = guard.take()
        {
            pb.finish_and_clear();
        }

        let total = report.moved.len() + report.planned.len();
        if total > 0 {
            self.summary_table(&report.category_counts, total);
        } else {
            self.info("Nothing to organize.");
        }
        self.problem_list("SKIPPED", &report.skipped);
        self.problem_list("FAILED", &report.failed);
        if dry_run {
            self.dry_run_notice("No files were moved.");
        }
    }

    fn entry_undone(&self, entry: &MoveLogEntry, result: Result<(), &OrganizeError>) {
        match result {
            Ok(()) => self.success(&format!(
                "{} → {}",
                entry.destination.display(),
                entry.source.display()
            )),
            Err(error) if error.is_skip() => self.warning(&error.to_string()),
            Err(error) => self.error(&error.to_string()),
        }
    }

    fn undo_finished(&self, report: &UndoReport) {
        self.header("UNDO SUMMARY");
        self.success(&format!(
            "Restored: {} {}",
            report.restored.len(),
            file_word(report.restored.len())
        ));
        self.problem_list("SKIPPED", &report.skipped);
        self.problem_list("FAILED", &report.failed);
        if let Some(archive) = &report.archived_log {
            self.info(&format!("Move log archived to {}", archive.display()));
        }
    }

    fn watch_started(&self, dir: &Path, dry_run: bool) {
        if dry_run {
            self.dry_run_notice(&format!("Watching {} (Ctrl+C to stop)", dir.display()));
        } else {
            self.info(&format!("Watching {} (Ctrl+C to stop)", dir.display()));
        }
    }

    fn watch_dropped(&self, path: &Path) {
        self.warning(&format!("{} vanished before it settled", path.display()));
    }

    fn watch_stopped(&self, report: &WatchReport) {
        let total = report.run.moved.len() + report.run.planned.len();
        if total > 0 {
            self.summary_table(&report.run.category_counts, total);
        }
        self.problem_list("FAILED", &report.run.failed);
        if report.abandoned > 0 {
            self.warning(&format!(
                "{} {} still settling at shutdown were left in place",
                report.abandoned,
                file_word(report.abandoned)
            ));
        }
        self.info("Watch stopped.");
    }
}
