//! Error types shared by the organize, undo and watch pipelines.
//!
//! Everything here except [`OrganizeError::MoveLogWrite`],
//! [`OrganizeError::SourceDirUnreadable`] and [`OrganizeError::WatchSetup`]
//! is a per-file error: it is recorded in a report and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while organizing, undoing or watching.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// The file disappeared between enumeration and the move.
    #[error("source file vanished: {}", path.display())]
    SourceVanished { path: PathBuf },

    /// The file exists but its metadata could not be read.
    #[error("cannot read {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination could not be created or written (permissions, disk full, name too long).
    #[error("cannot write {}: {source}", path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No free collision suffix was found within the attempt limit.
    #[error("no free name for {} after {attempts} attempts", path.display())]
    CollisionExhausted { path: PathBuf, attempts: u32 },

    /// An undo entry could not be reversed safely.
    #[error("cannot undo {}: {reason}", path.display())]
    UndoConflict { path: PathBuf, reason: String },

    /// Appending to the move log failed.
    #[error("failed to write move log {}: {source}", path.display())]
    MoveLogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the move log failed.
    #[error("failed to read move log {}: {source}", path.display())]
    MoveLogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A move log line could not be parsed.
    #[error("invalid move log {} at line {line}: {reason}", path.display())]
    InvalidMoveLog {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The source directory could not be listed.
    #[error("cannot read source directory {}: {source}", path.display())]
    SourceDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The filesystem watcher could not be started.
    #[error("failed to watch {}: {reason}", path.display())]
    WatchSetup { path: PathBuf, reason: String },
}

impl OrganizeError {
    /// Whether this error should be counted as a skip rather than a failure.
    ///
    /// Skips are expected races or conflicts; failures mean the user should look.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::SourceVanished { .. } | Self::CollisionExhausted { .. } | Self::UndoConflict { .. }
        )
    }

    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MoveLogWrite { .. } | Self::SourceDirUnreadable { .. } | Self::WatchSetup { .. }
        )
    }
}

/// Result type for organize operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;
