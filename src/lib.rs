//! dirsort - sort files into category folders
//!
//! This library classifies files by ordered rules and an extension table,
//! moves them into `target/category[/YYYY[/MM]]` folders without ever
//! overwriting, records every move in an append-only log so a run can be
//! undone, and can keep watching a directory, moving files once they have
//! stopped changing.

pub mod cli;
pub mod config;
pub mod error;
pub mod file_category;
pub mod file_organizer;
pub mod logging;
pub mod move_executor;
pub mod move_log;
pub mod output;
pub mod path_planner;
pub mod undo;
pub mod watch;

pub use config::{BucketMode, CompiledConfig, ConfigError, OrganizerConfig};
pub use error::{OrganizeError, OrganizeResult};
pub use file_category::{Category, FileDescriptor, MatchOutcome, RuleMatcher};
pub use file_organizer::{FileOrganizer, FileOutcome, RunOptions, RunReport};
pub use move_executor::MoveExecutor;
pub use move_log::{MoveLog, MoveLogEntry, MoveOutcome};
pub use output::{ConsoleReporter, NullReporter, Reporter};
pub use path_planner::PathPlanner;
pub use undo::{UndoEngine, UndoReport};
pub use watch::{
    ChannelSource, FsEvent, FsEventKind, NotificationSource, NotifySource, ShutdownSignal,
    WatchLoop, WatchReport,
};

pub use cli::{CommandReport, OrganizeCommand, run_cli};
