//! Executes planned moves and records them in the move log.
//!
//! A real move is: create the destination directories, claim a free name,
//! render the log entry and open the log, rename the source over the claimed
//! placeholder, then append the entry. A rename that would cross filesystems falls back to copy and
//! delete, keeping the modification time. Dry runs only look.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{OrganizeError, OrganizeResult};
use crate::file_category::FileDescriptor;
use crate::move_log::{MoveLog, MoveLogEntry, MoveOutcome};
use crate::path_planner::PathPlanner;

/// Moves `src` to `dest`, replacing whatever is at `dest`.
///
/// Tries a rename first and falls back to copy then delete when the two
/// paths are on different filesystems.
pub fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(src = %src.display(), dest = %dest.display(), "rename crosses filesystems, copying");
            copy_then_remove(src, dest)
        }
        Err(e) => Err(e),
    }
}

fn copy_then_remove(src: &Path, dest: &Path) -> std::io::Result<()> {
    let modified = fs::metadata(src)?.modified()?;
    fs::copy(src, dest)?;
    OpenOptions::new()
        .write(true)
        .open(dest)?
        .set_modified(modified)?;
    fs::remove_file(src)
}

/// Turns a failed move into the matching per-file error.
fn move_error(src: &Path, dest: &Path, e: std::io::Error) -> OrganizeError {
    if e.kind() == ErrorKind::NotFound && !src.exists() {
        OrganizeError::SourceVanished {
            path: src.to_path_buf(),
        }
    } else {
        OrganizeError::DestinationUnwritable {
            path: dest.to_path_buf(),
            source: e,
        }
    }
}

/// Performs (or previews) moves for one run.
#[derive(Debug)]
pub struct MoveExecutor {
    dry_run: bool,
    log: Option<MoveLog>,
    next_seq: u64,
}

impl MoveExecutor {
    /// Creates an executor. Executed moves are appended to `log` when one is given.
    pub fn new(dry_run: bool, log: Option<MoveLog>) -> Self {
        Self {
            dry_run,
            log,
            next_seq: 1,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Moves `file` to the first free name derived from `planned`.
    ///
    /// # Errors
    ///
    /// * `SourceVanished` - the file disappeared before it could be moved
    /// * `DestinationUnwritable` - directories or the file could not be created
    /// * `CollisionExhausted` - no free suffix was found
    /// * `MoveLogWrite` - the log could not be opened (nothing was moved) or
    ///   the move happened but could not be recorded; either way the caller
    ///   must stop issuing moves
    pub fn execute(
        &mut self,
        file: &FileDescriptor,
        planned: &Path,
        planner: &mut PathPlanner,
    ) -> OrganizeResult<MoveLogEntry> {
        if self.dry_run {
            let destination = planner.preview(planned, &file.path)?;
            let entry = self.entry(file, destination, MoveOutcome::DryRunSkipped);
            self.next_seq += 1;
            return Ok(entry);
        }

        if let Some(parent) = planned.parent() {
            fs::create_dir_all(parent).map_err(|source| OrganizeError::DestinationUnwritable {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let claim = planner.claim(planned)?;
        let entry = self.entry(file, claim.path().to_path_buf(), MoveOutcome::Executed);

        // Nothing may move unless its record can be written afterwards.
        let line = match self.log.as_mut() {
            Some(log) => {
                let line = log.encode(&entry)?;
                log.ensure_open()?;
                Some(line)
            }
            None => None,
        };

        move_file(&file.path, claim.path()).map_err(|e| move_error(&file.path, claim.path(), e))?;
        claim.commit();
        self.next_seq += 1;
        info!(src = %file.path.display(), dest = %entry.destination.display(), "moved");

        if let (Some(log), Some(line)) = (self.log.as_mut(), line) {
            log.append_line(&line)?;
        }
        Ok(entry)
    }

    /// Builds the entry for the next sequence number without consuming it.
    fn entry(&self, file: &FileDescriptor, destination: PathBuf, outcome: MoveOutcome) -> MoveLogEntry {
        MoveLogEntry {
            seq: self.next_seq,
            source: file.path.clone(),
            destination,
            timestamp: Utc::now(),
            outcome,
        }
    }
}
