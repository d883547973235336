//! Durable, append-only record of executed moves.
//!
//! The log lives next to the organized tree as JSON Lines, one
//! [`MoveLogEntry`] per line, so it can be inspected with any text tool.
//! Every append is flushed to disk before the move is reported as done. The
//! file is opened lazily on the first executed move, so a run that moves
//! nothing leaves the previous run's log (and its undo) untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{OrganizeError, OrganizeResult};

/// File name of the active move log inside the target directory.
pub const MOVE_LOG_FILE: &str = ".dirsort_moves.jsonl";

/// Prefix shared by the active log and its archives.
const MOVE_LOG_PREFIX: &str = ".dirsort_moves";

/// What happened to a planned move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Executed,
    DryRunSkipped,
}

/// A single recorded move.
///
/// Paths are written as plain strings when they are valid UTF-8 and as raw
/// platform units otherwise, so every name that can be moved can be undone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLogEntry {
    pub seq: u64,
    #[serde(with = "stored_path")]
    pub source: PathBuf,
    #[serde(with = "stored_path")]
    pub destination: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub outcome: MoveOutcome,
}

mod stored_path {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::path::{Path, PathBuf};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum StoredPath {
        Text(String),
        #[cfg(unix)]
        Bytes { bytes: Vec<u8> },
        #[cfg(windows)]
        Wide { wide: Vec<u16> },
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        if let Some(text) = path.to_str() {
            return StoredPath::Text(text.to_string()).serialize(serializer);
        }
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            StoredPath::Bytes {
                bytes: path.as_os_str().as_bytes().to_vec(),
            }
            .serialize(serializer)
        }
        #[cfg(windows)]
        {
            use std::os::windows::ffi::OsStrExt;
            StoredPath::Wide {
                wide: path.as_os_str().encode_wide().collect(),
            }
            .serialize(serializer)
        }
        #[cfg(not(any(unix, windows)))]
        {
            Err(serde::ser::Error::custom("path is not valid UTF-8"))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        match StoredPath::deserialize(deserializer)? {
            StoredPath::Text(text) => Ok(PathBuf::from(text)),
            #[cfg(unix)]
            StoredPath::Bytes { bytes } => {
                use std::os::unix::ffi::OsStringExt;
                Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
            }
            #[cfg(windows)]
            StoredPath::Wide { wide } => {
                use std::os::windows::ffi::OsStringExt;
                Ok(PathBuf::from(std::ffi::OsString::from_wide(&wide)))
            }
        }
    }
}

/// Returns true for the move log and its archives, which are never organized.
pub fn is_move_log_name(file_name: &str) -> bool {
    file_name.starts_with(MOVE_LOG_PREFIX)
}

/// Single writer for the move log of one run.
#[derive(Debug)]
pub struct MoveLog {
    path: PathBuf,
    file: Option<File>,
}

impl MoveLog {
    /// Prepares a log at `path`. Nothing is written until the first append.
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and syncs it to disk.
    ///
    /// The first append of a run truncates any log left by a previous run.
    pub fn append(&mut self, entry: &MoveLogEntry) -> OrganizeResult<()> {
        let line = self.encode(entry)?;
        self.append_line(&line)
    }

    /// Renders `entry` as one log line, newline included.
    pub fn encode(&self, entry: &MoveLogEntry) -> OrganizeResult<String> {
        let mut line = serde_json::to_string(entry).map_err(|e| {
            self.write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        line.push('\n');
        Ok(line)
    }

    /// Opens the log for this run if that has not happened yet.
    ///
    /// Opening truncates any log left by a previous run.
    pub fn ensure_open(&mut self) -> OrganizeResult<()> {
        if self.file.is_none() {
            self.file = Some(self.open()?);
        }
        Ok(())
    }

    /// Appends a line produced by [`MoveLog::encode`] and syncs it to disk.
    pub fn append_line(&mut self, line: &str) -> OrganizeResult<()> {
        self.ensure_open()?;
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let result = file
            .write_all(line.as_bytes())
            .and_then(|()| file.sync_data());
        result.map_err(|source| self.write_error(source))
    }

    fn open(&self) -> OrganizeResult<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.write_error(source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|source| self.write_error(source))?;
        debug!(path = %self.path.display(), "started move log");
        Ok(file)
    }

    fn write_error(&self, source: std::io::Error) -> OrganizeError {
        OrganizeError::MoveLogWrite {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads every entry of the log at `path`. A missing log reads as empty.
    ///
    /// A final line without its terminating newline is the trace of a crash
    /// mid-append; it is ignored with a warning. Any other malformed line is
    /// an error.
    pub fn read_entries(path: &Path) -> OrganizeResult<Vec<MoveLogEntry>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(OrganizeError::MoveLogRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let complete_tail = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        let mut entries = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MoveLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if index + 1 == lines.len() && !complete_tail => {
                    warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %e,
                        "ignoring truncated move log entry"
                    );
                }
                Err(e) => {
                    return Err(OrganizeError::InvalidMoveLog {
                        path: path.to_path_buf(),
                        line: index + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(entries)
    }

    /// Renames the log at `path` to a timestamped archive next to it.
    ///
    /// Returns the archive path, or `None` when there was no log.
    pub fn archive(path: &Path) -> OrganizeResult<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let archive_name = format!("{MOVE_LOG_PREFIX}.{stamp}.undone.jsonl");
        let archive_path = match path.parent() {
            Some(parent) => parent.join(archive_name),
            None => PathBuf::from(archive_name),
        };

        fs::rename(path, &archive_path).map_err(|source| OrganizeError::MoveLogWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(archive_path))
    }
}
