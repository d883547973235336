//! Destination path planning and collision-safe name selection.
//!
//! A destination is `target/category[/YYYY[/MM]]/basename`. When that name is
//! taken, `-1`, `-2`, ... is inserted before the extension until a free name
//! is found. Real runs take a name by creating it exclusively, so checking
//! and taking a name are a single atomic step and two movers can never be
//! handed the same suffix. Dry runs only look, remembering what they already
//! handed out so a preview matches what the real run will do.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::BucketMode;
use crate::error::{OrganizeError, OrganizeResult};
use crate::file_category::FileDescriptor;

/// Upper bound on collision suffixes tried for one file.
pub const MAX_COLLISION_ATTEMPTS: u32 = 10_000;

/// Remembered previews at which stale ones are first dropped.
const PREVIEW_PRUNE_START: usize = 1024;

/// Computes the unsuffixed destination for a file.
pub fn plan_destination(
    file: &FileDescriptor,
    category: &str,
    bucket_mode: BucketMode,
    target_root: &Path,
) -> PathBuf {
    let mut dest = target_root.join(category);
    let modified = file.modified_local();
    match bucket_mode {
        BucketMode::None => {}
        BucketMode::Year => dest.push(modified.format("%Y").to_string()),
        BucketMode::YearMonth => {
            dest.push(modified.format("%Y").to_string());
            dest.push(modified.format("%m").to_string());
        }
    }
    match file.path.file_name() {
        Some(name) => dest.join(name),
        None => dest.join(&file.basename),
    }
}

/// Returns the `attempt`-th candidate name: the path itself for 0, then
/// `stem-N.ext`.
pub fn candidate_path(path: &Path, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return path.to_path_buf();
    }

    let stem = path.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(format!("-{attempt}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// A destination name taken by exclusive creation of an empty placeholder.
///
/// The move replaces the placeholder. If the claim is dropped without
/// [`ClaimedPath::commit`], the placeholder is removed again.
#[derive(Debug)]
#[must_use]
pub struct ClaimedPath {
    path: PathBuf,
    committed: bool,
}

impl ClaimedPath {
    /// Claims exactly `path`, failing with `AlreadyExists` if it is taken.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps whatever now lives at the claimed path.
    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ClaimedPath {
    fn drop(&mut self) {
        if !self.committed
            && let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!(path = %self.path.display(), error = %e, "could not release placeholder");
        }
    }
}

/// Plans destinations for one run.
#[derive(Debug)]
pub struct PathPlanner {
    target_root: PathBuf,
    bucket_mode: BucketMode,
    max_attempts: u32,
    /// Previewed destination to the source it was handed to.
    previewed: HashMap<PathBuf, PathBuf>,
    prune_at: usize,
}

impl PathPlanner {
    pub fn new(target_root: impl Into<PathBuf>, bucket_mode: BucketMode) -> Self {
        Self {
            target_root: target_root.into(),
            bucket_mode,
            max_attempts: MAX_COLLISION_ATTEMPTS,
            previewed: HashMap::new(),
            prune_at: PREVIEW_PRUNE_START,
        }
    }

    /// Overrides the collision attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Unsuffixed destination for `file` in `category`.
    pub fn plan(&self, file: &FileDescriptor, category: &str) -> PathBuf {
        plan_destination(file, category, self.bucket_mode, &self.target_root)
    }

    /// Picks the name a real run would take, without touching the filesystem.
    ///
    /// Previewing the same source twice yields the same name.
    pub fn preview(&mut self, planned: &Path, source: &Path) -> OrganizeResult<PathBuf> {
        if self.previewed.len() >= self.prune_at {
            self.prune_previews();
        }
        for attempt in 0..self.max_attempts {
            let candidate = candidate_path(planned, attempt);
            let free = match self.previewed.get(&candidate) {
                Some(owner) => owner == source,
                None => !candidate.exists(),
            };
            if free {
                self.previewed.insert(candidate.clone(), source.to_path_buf());
                return Ok(candidate);
            }
        }
        Err(OrganizeError::CollisionExhausted {
            path: planned.to_path_buf(),
            attempts: self.max_attempts,
        })
    }

    /// Forgets previews handed to sources that no longer exist, releasing
    /// their names.
    ///
    /// Runs on its own once the number of remembered previews doubles, which
    /// keeps a long dry-run watch session bounded by the files still present.
    pub fn prune_previews(&mut self) {
        let before = self.previewed.len();
        self.previewed.retain(|_, source| source.exists());
        self.prune_at = (self.previewed.len() * 2).max(PREVIEW_PRUNE_START);
        debug!(before, after = self.previewed.len(), "pruned previews");
    }

    /// Number of previewed names currently held.
    pub fn preview_count(&self) -> usize {
        self.previewed.len()
    }

    /// Takes the first free name by creating it exclusively.
    ///
    /// The parent directory must already exist.
    pub fn claim(&self, planned: &Path) -> OrganizeResult<ClaimedPath> {
        for attempt in 0..self.max_attempts {
            let candidate = candidate_path(planned, attempt);
            match ClaimedPath::create(&candidate) {
                Ok(claim) => {
                    if attempt > 0 {
                        debug!(planned = %planned.display(), claimed = %candidate.display(), "resolved name collision");
                    }
                    return Ok(claim);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(OrganizeError::DestinationUnwritable {
                        path: candidate,
                        source,
                    });
                }
            }
        }
        Err(OrganizeError::CollisionExhausted {
            path: planned.to_path_buf(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn march_15_2024() -> SystemTime {
        Local
            .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
            .single()
            .expect("unambiguous local time")
            .into()
    }

    fn descriptor(name: &str) -> FileDescriptor {
        let mut file = FileDescriptor::synthetic(PathBuf::from("/in").join(name), 1);
        file.modified = march_15_2024();
        file
    }

    #[test]
    fn test_plan_bucket_modes() {
        let file = descriptor("report.pdf");
        let root = Path::new("/out");

        assert_eq!(
            plan_destination(&file, "Docs", BucketMode::None, root),
            PathBuf::from("/out/Docs/report.pdf")
        );
        assert_eq!(
            plan_destination(&file, "Docs", BucketMode::Year, root),
            PathBuf::from("/out/Docs/2024/report.pdf")
        );
        assert_eq!(
            plan_destination(&file, "Docs", BucketMode::YearMonth, root),
            PathBuf::from("/out/Docs/2024/03/report.pdf")
        );
    }

    #[test]
    fn test_plan_nested_category() {
        let file = descriptor("clip.mp4");
        let planner = PathPlanner::new("/out", BucketMode::None);
        assert_eq!(
            planner.plan(&file, "Videos/Large"),
            PathBuf::from("/out/Videos/Large/clip.mp4")
        );
    }

    #[test]
    fn test_candidate_path_suffix_before_extension() {
        let path = Path::new("/out/Docs/report.pdf");
        assert_eq!(candidate_path(path, 0), PathBuf::from("/out/Docs/report.pdf"));
        assert_eq!(candidate_path(path, 1), PathBuf::from("/out/Docs/report-1.pdf"));
        assert_eq!(candidate_path(path, 12), PathBuf::from("/out/Docs/report-12.pdf"));
        assert_eq!(
            candidate_path(Path::new("/out/Other/Makefile"), 2),
            PathBuf::from("/out/Other/Makefile-2")
        );
        assert_eq!(
            candidate_path(Path::new("/out/Archives/site.tar.gz"), 1),
            PathBuf::from("/out/Archives/site.tar-1.gz")
        );
    }

    #[test]
    fn test_claim_creates_placeholder_and_skips_taken_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("a.txt");
        fs::write(&planned, "existing").unwrap();

        let planner = PathPlanner::new(temp_dir.path(), BucketMode::None);
        let first = planner.claim(&planned).unwrap();
        let second = planner.claim(&planned).unwrap();

        assert_eq!(first.path(), temp_dir.path().join("a-1.txt"));
        assert_eq!(second.path(), temp_dir.path().join("a-2.txt"));
        assert!(first.path().exists());

        // The existing file is never touched.
        assert_eq!(fs::read_to_string(&planned).unwrap(), "existing");
    }

    #[test]
    fn test_dropped_claim_releases_placeholder() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("a.txt");
        let planner = PathPlanner::new(temp_dir.path(), BucketMode::None);

        let claim = planner.claim(&planned).unwrap();
        assert!(planned.exists());
        drop(claim);
        assert!(!planned.exists());

        let kept = planner.claim(&planned).unwrap().commit();
        assert_eq!(kept, planned);
        assert!(planned.exists());
    }

    #[test]
    fn test_preview_does_not_touch_filesystem() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("a.txt");
        let mut planner = PathPlanner::new(temp_dir.path(), BucketMode::None);

        let first = planner.preview(&planned, Path::new("/in/one/a.txt")).unwrap();
        let second = planner.preview(&planned, Path::new("/in/two/a.txt")).unwrap();
        let again = planner.preview(&planned, Path::new("/in/one/a.txt")).unwrap();

        assert_eq!(first, planned);
        assert_eq!(second, temp_dir.path().join("a-1.txt"));
        assert_eq!(again, first);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_pruning_releases_names_of_vanished_sources() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("out").join("a.txt");
        let gone = temp_dir.path().join("gone.txt");
        let here = temp_dir.path().join("here.txt");
        fs::write(&gone, "x").unwrap();
        fs::write(&here, "y").unwrap();

        let mut planner = PathPlanner::new(temp_dir.path().join("out"), BucketMode::None);
        assert_eq!(planner.preview(&planned, &gone).unwrap(), planned);
        let kept = planner.preview(&Path::new("/elsewhere").join("b.txt"), &here).unwrap();
        fs::remove_file(&gone).unwrap();

        planner.prune_previews();
        assert_eq!(planner.preview_count(), 1);
        assert_eq!(planner.preview(&planned, Path::new("/in/other.txt")).unwrap(), planned);
        assert_eq!(planner.preview(&Path::new("/elsewhere").join("b.txt"), &here).unwrap(), kept);
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_keeps_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"caf\xe9.txt");
        let file = FileDescriptor::synthetic(PathBuf::from("/in").join(name), 1);
        let planned = plan_destination(&file, "Text", BucketMode::None, Path::new("/out"));

        assert_eq!(planned.file_name(), Some(name));
        assert_eq!(candidate_path(&planned, 1).file_name(), Some(OsStr::from_bytes(b"caf\xe9-1.txt")));
    }

    #[test]
    fn test_preview_matches_claim_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("a.txt");
        fs::write(&planned, "existing").unwrap();

        let mut previewer = PathPlanner::new(temp_dir.path(), BucketMode::None);
        let previewed = [
            previewer.preview(&planned, Path::new("/in/one/a.txt")).unwrap(),
            previewer.preview(&planned, Path::new("/in/two/a.txt")).unwrap(),
        ];

        let claimer = PathPlanner::new(temp_dir.path(), BucketMode::None);
        let claimed = [
            claimer.claim(&planned).unwrap().commit(),
            claimer.claim(&planned).unwrap().commit(),
        ];

        assert_eq!(previewed, claimed);
    }

    #[test]
    fn test_collision_attempts_are_bounded() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("a.txt");
        for attempt in 0..3 {
            fs::write(candidate_path(&planned, attempt), "taken").unwrap();
        }

        let mut planner = PathPlanner::new(temp_dir.path(), BucketMode::None).with_max_attempts(3);
        assert!(matches!(
            planner.claim(&planned),
            Err(OrganizeError::CollisionExhausted { attempts: 3, .. })
        ));
        assert!(matches!(
            planner.preview(&planned, Path::new("/in/a.txt")),
            Err(OrganizeError::CollisionExhausted { .. })
        ));
    }

    #[test]
    fn test_exact_claim_refuses_taken_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "occupied").unwrap();

        let err = ClaimedPath::create(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&path).unwrap(), "occupied");
    }

    #[test]
    fn test_claim_in_missing_directory_is_unwritable() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let planned = temp_dir.path().join("missing").join("a.txt");
        let planner = PathPlanner::new(temp_dir.path(), BucketMode::None);

        assert!(matches!(
            planner.claim(&planned),
            Err(OrganizeError::DestinationUnwritable { .. })
        ));
    }
}
