//! Command-line interface module for dirsort.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Choosing between organize, undo and watch
//! - Dispatching to the matching pipeline

use clap::Parser;
use std::path::PathBuf;

use crate::config::CompiledConfig;
use crate::error::OrganizeResult;
use crate::file_organizer::{FileOrganizer, RunOptions, RunReport};
use crate::output::Reporter;
use crate::undo::{UndoEngine, UndoReport};
use crate::watch::{NotifySource, ShutdownSignal, WatchLoop, WatchReport};

/// Sort files into category folders by rules and extension.
#[derive(Debug, Parser)]
#[command(name = "dirsort", version, about)]
pub struct Cli {
    /// Configuration file (TOML, or YAML for .yaml/.yml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show what would be moved without touching anything
    #[arg(long, alias = "dry-run")]
    pub dry: bool,

    /// Reverse the last organize run
    #[arg(long, conflicts_with_all = ["dry", "watch"])]
    pub undo: bool,

    /// Keep running and organize files as they arrive
    #[arg(long)]
    pub watch: bool,

    /// Debug logging and list excluded files
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The command selected by the flags.
    pub fn selected_command(&self) -> OrganizeCommand {
        if self.undo {
            OrganizeCommand::Undo
        } else if self.watch {
            OrganizeCommand::Watch { dry_run: self.dry }
        } else {
            OrganizeCommand::Organize { dry_run: self.dry }
        }
    }
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizeCommand {
    /// Organize the source directory once.
    Organize {
        /// If true, simulate the operation without making changes.
        dry_run: bool,
    },
    /// Undo the previous organization.
    Undo,
    /// Organize new files until interrupted.
    Watch {
        /// If true, only report what would be moved.
        dry_run: bool,
    },
}

/// The report produced by whichever command ran.
#[derive(Debug)]
pub enum CommandReport {
    Organize(RunReport),
    Undo(UndoReport),
    Watch(WatchReport),
}

impl CommandReport {
    /// True when at least one file could not be handled.
    pub fn has_failures(&self) -> bool {
        match self {
            Self::Organize(report) => report.has_failures(),
            Self::Undo(report) => report.has_failures(),
            Self::Watch(report) => report.has_failures(),
        }
    }
}

/// Runs the given command against a compiled configuration.
///
/// # Arguments
///
/// * `command` - What to do
/// * `config` - The validated configuration
/// * `reporter` - Receives all user-facing output
/// * `shutdown` - Stops watch mode when triggered
///
/// # Examples
///
/// ```no_run
/// use dirsort::cli::{OrganizeCommand, run_cli};
/// use dirsort::config::OrganizerConfig;
/// use dirsort::output::NullReporter;
/// use dirsort::watch::ShutdownSignal;
/// use std::path::Path;
///
/// let config = OrganizerConfig::load(Some(Path::new("dirsort.toml")))
///     .and_then(|c| c.compile())
///     .expect("valid configuration");
/// let result = run_cli(
///     OrganizeCommand::Organize { dry_run: true },
///     &config,
///     &NullReporter,
///     ShutdownSignal::new(),
/// );
/// match result {
///     Ok(report) => println!("failures: {}", report.has_failures()),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub fn run_cli(
    command: OrganizeCommand,
    config: &CompiledConfig,
    reporter: &dyn Reporter,
    shutdown: ShutdownSignal,
) -> OrganizeResult<CommandReport> {
    match command {
        OrganizeCommand::Organize { dry_run } => {
            let mut organizer = FileOrganizer::new(config, RunOptions::one_shot(dry_run), reporter);
            organizer.organize_once().map(CommandReport::Organize)
        }
        OrganizeCommand::Undo => {
            UndoEngine::undo(&config.move_log_path(), reporter).map(CommandReport::Undo)
        }
        OrganizeCommand::Watch { dry_run } => {
            let source = NotifySource::watch(&config.source_dir)?;
            let report = WatchLoop::new(source, config, dry_run, reporter, shutdown).run();
            Ok(CommandReport::Watch(report))
        }
    }
}
