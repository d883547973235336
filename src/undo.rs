/// Undo functionality for reverting an organize run.
///
/// This module reverses the moves recorded in the move log, newest first,
/// and then archives the log so the same run cannot be undone twice.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{OrganizeError, OrganizeResult};
use crate::move_executor::move_file;
use crate::move_log::{MoveLog, MoveLogEntry, MoveOutcome};
use crate::output::Reporter;
use crate::path_planner::ClaimedPath;

/// Represents the result of an undo operation.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Entries moved back to their source.
    pub restored: Vec<MoveLogEntry>,
    /// Entries left alone because reversing them was unsafe.
    pub skipped: Vec<(PathBuf, OrganizeError)>,
    /// Entries whose reversal failed.
    pub failed: Vec<(PathBuf, OrganizeError)>,
    /// Where the log was archived, if there was one.
    pub archived_log: Option<PathBuf>,
}

impl UndoReport {
    /// Returns the total number of entries processed.
    pub fn total_processed(&self) -> usize {
        self.restored.len() + self.failed.len() + self.skipped.len()
    }

    /// Returns true if every entry was reversed.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Reverses the moves recorded in a move log.
pub struct UndoEngine;

impl UndoEngine {
    /// Undoes the run recorded in the log at `log_path`.
    ///
    /// Executed entries are reversed in descending sequence order. Entries
    /// whose destination is gone or whose source path is taken again are
    /// skipped. Afterwards the log is archived as
    /// `.dirsort_moves.<timestamp>.undone.jsonl`, so a second undo finds
    /// nothing to do.
    ///
    /// # Edge Cases Handled
    ///
    /// * **Missing log**: not an error; nothing is reversed
    /// * **Destination missing**: skipped with `UndoConflict`
    /// * **Source occupied**: skipped with `UndoConflict`; the occupying file is not touched
    /// * **Source directory removed**: recreated
    /// * **Truncated last line**: ignored with a warning
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dirsort::output::NullReporter;
    /// use dirsort::undo::UndoEngine;
    /// use std::path::Path;
    ///
    /// let log = Path::new("/home/me/Sorted/.dirsort_moves.jsonl");
    /// match UndoEngine::undo(log, &NullReporter) {
    ///     Ok(report) => println!("Restored {} files", report.restored.len()),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo(log_path: &Path, reporter: &dyn Reporter) -> OrganizeResult<UndoReport> {
        let mut entries: Vec<MoveLogEntry> = MoveLog::read_entries(log_path)?
            .into_iter()
            .filter(|entry| entry.outcome == MoveOutcome::Executed)
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        info!(log = %log_path.display(), entries = entries.len(), "undoing");

        let mut report = UndoReport::default();
        for entry in entries {
            match Self::restore_entry(&entry) {
                Ok(()) => {
                    info!(src = %entry.destination.display(), dest = %entry.source.display(), "restored");
                    reporter.entry_undone(&entry, Ok(()));
                    report.restored.push(entry);
                }
                Err(error) => {
                    warn!(file = %entry.destination.display(), error = %error, "not restored");
                    reporter.entry_undone(&entry, Err(&error));
                    if error.is_skip() {
                        report.skipped.push((entry.destination, error));
                    } else {
                        report.failed.push((entry.destination, error));
                    }
                }
            }
        }

        report.archived_log = MoveLog::archive(log_path)?;
        reporter.undo_finished(&report);
        Ok(report)
    }

    /// Moves one file back to where it came from.
    fn restore_entry(entry: &MoveLogEntry) -> OrganizeResult<()> {
        if !entry.destination.exists() {
            return Err(OrganizeError::UndoConflict {
                path: entry.destination.clone(),
                reason: "file is no longer at its organized location".to_string(),
            });
        }

        if let Some(parent) = entry.source.parent() {
            fs::create_dir_all(parent).map_err(|source| OrganizeError::DestinationUnwritable {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let claim = ClaimedPath::create(&entry.source).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                OrganizeError::UndoConflict {
                    path: entry.source.clone(),
                    reason: "original location is occupied".to_string(),
                }
            } else {
                OrganizeError::DestinationUnwritable {
                    path: entry.source.clone(),
                    source: e,
                }
            }
        })?;

        move_file(&entry.destination, claim.path()).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                OrganizeError::UndoConflict {
                    path: entry.destination.clone(),
                    reason: "file is no longer at its organized location".to_string(),
                }
            } else {
                OrganizeError::DestinationUnwritable {
                    path: entry.source.clone(),
                    source: e,
                }
            }
        })?;
        claim.commit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::move_log::MOVE_LOG_FILE;
    use crate::output::NullReporter;
    use chrono::Utc;
    use tempfile::TempDir;

    /// Simulates an organize run: moves `name` into `category` and logs it.
    /// Files land under the directory holding the log.
    fn organized(source_dir: &Path, log: &mut MoveLog, seq: u64, name: &str, category: &str) -> MoveLogEntry {
        let target = log.path().parent().unwrap().to_path_buf();
        let source = source_dir.join(name);
        let destination = target.join(category).join(name);
        fs::write(&source, format!("{name} content")).expect("Failed to write test file");
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::rename(&source, &destination).expect("Failed to move file");

        let entry = MoveLogEntry {
            seq,
            source,
            destination,
            timestamp: Utc::now(),
            outcome: MoveOutcome::Executed,
        };
        log.append(&entry).expect("Failed to log move");
        entry
    }

    #[test]
    fn test_undo_no_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join(MOVE_LOG_FILE);

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");
        assert_eq!(report.total_processed(), 0);
        assert!(report.archived_log.is_none());
    }

    #[test]
    fn test_undo_single_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());

        let entry = organized(base_path, &mut log, 1, "test.txt", "Documents");
        assert!(!entry.source.exists());

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");

        assert_eq!(report.restored.len(), 1);
        assert!(report.is_complete_success());
        assert_eq!(fs::read_to_string(&entry.source).unwrap(), "test.txt content");
        assert!(!entry.destination.exists());
        assert!(!log_path.exists());
        assert!(report.archived_log.unwrap().exists());
    }

    #[test]
    fn test_undo_multiple_files_newest_first() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());

        organized(base_path, &mut log, 1, "image.png", "Images");
        organized(base_path, &mut log, 2, "document.pdf", "Documents");

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");

        let order: Vec<u64> = report.restored.iter().map(|e| e.seq).collect();
        assert_eq!(order, vec![2, 1]);
        assert!(base_path.join("image.png").exists());
        assert!(base_path.join("document.pdf").exists());
    }

    #[test]
    fn test_second_undo_reverses_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());
        organized(base_path, &mut log, 1, "a.txt", "Text");

        let first = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");
        let second = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");

        assert_eq!(first.restored.len(), 1);
        assert_eq!(second.restored.len(), 0);
        assert!(base_path.join("a.txt").exists());
    }

    #[test]
    fn test_undo_with_occupied_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());

        let entry = organized(base_path, &mut log, 1, "test.txt", "Documents");
        fs::write(&entry.source, "new content").expect("Failed to create conflict");

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");

        assert_eq!(report.restored.len(), 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0].1, OrganizeError::UndoConflict { .. }));
        assert_eq!(fs::read_to_string(&entry.source).unwrap(), "new content");
        assert_eq!(fs::read_to_string(&entry.destination).unwrap(), "test.txt content");
    }

    #[test]
    fn test_undo_with_missing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());

        let entry = organized(base_path, &mut log, 1, "gone.txt", "Text");
        fs::remove_file(&entry.destination).unwrap();

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");

        assert_eq!(report.restored.len(), 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(!entry.source.exists());
    }

    #[test]
    fn test_undo_recreates_source_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base_path = temp_dir.path();
        let inbox = base_path.join("inbox");
        fs::create_dir(&inbox).unwrap();
        let log_path = base_path.join("out").join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());

        let entry = organized(&inbox, &mut log, 1, "a.txt", "Text");
        fs::remove_dir(&inbox).unwrap();

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");
        assert_eq!(report.restored.len(), 1);
        assert!(entry.source.exists());
    }

    #[test]
    fn test_dry_run_entries_are_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join(MOVE_LOG_FILE);
        let mut log = MoveLog::new(log_path.clone());
        log.append(&MoveLogEntry {
            seq: 1,
            source: temp_dir.path().join("a.txt"),
            destination: temp_dir.path().join("Text").join("a.txt"),
            timestamp: Utc::now(),
            outcome: MoveOutcome::DryRunSkipped,
        })
        .unwrap();

        let report = UndoEngine::undo(&log_path, &NullReporter).expect("Undo failed");
        assert_eq!(report.total_processed(), 0);
    }
}
