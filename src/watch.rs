//! Watch mode: organize files as they arrive.
//!
//! Notifications come from a [`NotificationSource`]. A file is not moved on
//! its first notification: it enters a settling phase and is only organized
//! once its size and modification time stayed the same for a full quiet
//! interval, so files still being downloaded or copied are left alone.
//! Further notifications for a file already in flight are dropped.
//!
//! ```text
//!   Idle ──event──▶ Settling ──unchanged after quiet──▶ Processing ──▶ Idle
//!                     │  ▲
//!                     └──┘ changed: take new snapshot, wait again
//! ```
//!
//! The loop runs on a single thread which owns all in-flight state, the
//! planner and the move log.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

use crate::config::CompiledConfig;
use crate::error::{OrganizeError, OrganizeResult};
use crate::file_organizer::{FileOrganizer, FileOutcome, RunOptions, RunReport};
use crate::move_log::is_move_log_name;
use crate::output::Reporter;

/// Shortest and longest wait between settle checks.
const MIN_TICK: Duration = Duration::from_millis(10);
const MAX_TICK: Duration = Duration::from_millis(250);

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
}

/// A change to a path in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsEventKind::Created,
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsEventKind::Modified,
        }
    }
}

/// Result of waiting on a [`NotificationSource`].
#[derive(Debug)]
pub enum SourcePoll {
    Event(FsEvent),
    /// Nothing arrived before the timeout.
    Idle,
    /// The source will never deliver again.
    Closed,
}

/// Something that yields filesystem events.
pub trait NotificationSource {
    /// Waits up to `timeout` for the next event.
    fn poll(&mut self, timeout: Duration) -> SourcePoll;
}

/// Events fed through a channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<FsEvent>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<FsEvent>) -> Self {
        Self { rx }
    }
}

impl NotificationSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> SourcePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => SourcePoll::Event(event),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Closed,
        }
    }
}

/// Native filesystem notifications for one directory (not recursive).
pub struct NotifySource {
    rx: Receiver<notify::Result<Event>>,
    pending: VecDeque<FsEvent>,
    _watcher: RecommendedWatcher,
}

impl NotifySource {
    /// Starts watching `dir`.
    pub fn watch(dir: &Path) -> OrganizeResult<Self> {
        let setup_error = |e: notify::Error| OrganizeError::WatchSetup {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        };

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx).map_err(setup_error)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(setup_error)?;
        info!(dir = %dir.display(), "watching");

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            _watcher: watcher,
        })
    }
}

/// Maps a native event to the events the loop cares about.
fn translate(event: Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::created).collect(),
        // Old and new name; only the new one is interesting.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().map(FsEvent::created).into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => {
            event.paths.into_iter().map(FsEvent::created).collect()
        }
        EventKind::Modify(_) => event.paths.into_iter().map(FsEvent::modified).collect(),
        _ => Vec::new(),
    }
}

impl NotificationSource for NotifySource {
    fn poll(&mut self, timeout: Duration) -> SourcePoll {
        if let Some(event) = self.pending.pop_front() {
            return SourcePoll::Event(event);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                self.pending.extend(translate(event));
                match self.pending.pop_front() {
                    Some(event) => SourcePoll::Event(event),
                    None => SourcePoll::Idle,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "watcher error");
                SourcePoll::Idle
            }
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Closed,
        }
    }
}

/// Cooperative stop flag shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a watch session did.
#[derive(Debug, Default)]
pub struct WatchReport {
    /// Outcomes of every file that reached the pipeline.
    pub run: RunReport,
    /// Notifications dropped because the file was already in flight.
    pub coalesced: usize,
    /// Files that disappeared while settling.
    pub vanished: usize,
    /// Files still settling when shutdown was requested.
    pub abandoned: usize,
}

impl WatchReport {
    pub fn has_failures(&self) -> bool {
        self.run.has_failures()
    }
}

/// Size and modification time seen at the last settle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    size: u64,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn read(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug)]
enum Phase {
    Settling { snapshot: Snapshot, checked_at: Instant },
    Processing,
}

/// Event loop that settles and organizes files in the source directory.
pub struct WatchLoop<'a, S: NotificationSource> {
    source: S,
    organizer: FileOrganizer<'a>,
    config: &'a CompiledConfig,
    reporter: &'a dyn Reporter,
    shutdown: ShutdownSignal,
    in_flight: HashMap<PathBuf, Phase>,
    report: WatchReport,
    closed: bool,
}

impl<'a, S: NotificationSource> WatchLoop<'a, S> {
    /// Builds a loop over `source`. Executed moves are logged only when
    /// `watch_log_moves` is enabled.
    pub fn new(
        source: S,
        config: &'a CompiledConfig,
        dry_run: bool,
        reporter: &'a dyn Reporter,
        shutdown: ShutdownSignal,
    ) -> Self {
        let options = RunOptions {
            dry_run,
            log_moves: config.watch_log_moves,
        };
        Self {
            source,
            organizer: FileOrganizer::new(config, options, reporter),
            config,
            reporter,
            shutdown,
            in_flight: HashMap::new(),
            report: WatchReport::default(),
            closed: false,
        }
    }

    /// Runs until shutdown is requested, or until the source closes and
    /// every settling file has been dealt with.
    pub fn run(mut self) -> WatchReport {
        self.reporter
            .watch_started(&self.config.source_dir, self.organizer.is_dry_run());
        let tick = (self.config.settle_interval / 4).clamp(MIN_TICK, MAX_TICK);

        while !self.shutdown.is_triggered() {
            if self.closed {
                if self.in_flight.is_empty() {
                    break;
                }
                std::thread::sleep(tick);
            } else {
                match self.source.poll(tick) {
                    SourcePoll::Event(event) => self.accept(event),
                    SourcePoll::Idle => {}
                    SourcePoll::Closed => {
                        debug!("notification source closed");
                        self.closed = true;
                    }
                }
            }
            self.settle_due(Instant::now());
        }

        self.report.abandoned = self.in_flight.len();
        if self.report.abandoned > 0 {
            info!(files = self.report.abandoned, "left settling files in place");
        }
        self.reporter.watch_stopped(&self.report);
        self.report
    }

    /// Starts settling a newly notified path.
    fn accept(&mut self, event: FsEvent) {
        if self.in_flight.contains_key(&event.path) {
            self.report.coalesced += 1;
            return;
        }

        let is_log = event
            .path
            .file_name()
            .is_some_and(|name| is_move_log_name(&name.to_string_lossy()));
        if is_log {
            return;
        }

        // Gone already, or not a regular file. Symlinks are not followed.
        match fs::symlink_metadata(&event.path) {
            Ok(metadata) if metadata.is_file() => {}
            _ => return,
        }

        let Ok(snapshot) = Snapshot::read(&event.path) else {
            return;
        };
        debug!(file = %event.path.display(), kind = ?event.kind, "settling");
        self.in_flight.insert(
            event.path,
            Phase::Settling {
                snapshot,
                checked_at: Instant::now(),
            },
        );
    }

    /// Re-checks every file whose quiet interval has elapsed.
    fn settle_due(&mut self, now: Instant) {
        let quiet = self.config.settle_interval;
        let mut due: Vec<PathBuf> = self
            .in_flight
            .iter()
            .filter_map(|(path, phase)| match phase {
                Phase::Settling { checked_at, .. } if now.duration_since(*checked_at) >= quiet => {
                    Some(path.clone())
                }
                _ => None,
            })
            .collect();
        due.sort();

        for path in due {
            if self.shutdown.is_triggered() {
                return;
            }
            self.check(path);
        }
    }

    fn check(&mut self, path: PathBuf) {
        let current = match Snapshot::read(&path) {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!(file = %path.display(), "vanished while settling");
                self.in_flight.remove(&path);
                self.report.vanished += 1;
                self.reporter.watch_dropped(&path);
                return;
            }
        };

        let Some(phase) = self.in_flight.get_mut(&path) else {
            return;
        };
        if let Phase::Settling { snapshot, checked_at } = phase
            && *snapshot != current
        {
            debug!(file = %path.display(), size = current.size, "still changing");
            *snapshot = current;
            *checked_at = Instant::now();
            return;
        }

        *phase = Phase::Processing;
        let outcome = match self.organizer.process_file(&path) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(file = %path.display(), error = %e, "watch move failed");
                let outcome = FileOutcome::Failed {
                    path: path.clone(),
                    error: e,
                };
                self.reporter.file_done(&outcome);
                outcome
            }
        };
        self.report.run.record(outcome);
        self.in_flight.remove(&path);
    }
}
