//! Archive eviction and finalization moves

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::space::{SpaceProbe, StatvfsProbe, StorageState};
use crate::{EvictionPolicy, StorageError};

/// Suffixed names tried before an archive move gives up
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Outcome of one startup eviction pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    /// Files removed (or, in dry-run mode, selected) for exceeding the age limit
    pub aged_out: Vec<PathBuf>,
    /// Free space measured after the age pass, if it could be read
    pub available_gb: Option<f64>,
    /// Files removed by the low-space pass (in dry-run mode, the oldest
    /// batch that pass would select); `None` when it did not run
    pub space_evicted: Option<Vec<PathBuf>>,
}

/// Owner of the archive directory
pub struct StorageManager {
    archive_dir: PathBuf,
    probe: Arc<dyn SpaceProbe>,
    dry_run: bool,
}

impl StorageManager {
    /// Create a manager for `archive_dir` using `statvfs` for space checks
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self::with_probe(archive_dir, Arc::new(StatvfsProbe))
    }

    /// Create a manager with a custom space probe
    pub fn with_probe(archive_dir: impl Into<PathBuf>, probe: Arc<dyn SpaceProbe>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            probe,
            dry_run: false,
        }
    }

    /// In dry-run mode eviction only logs the files it would delete
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Archive directory path
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Create the archive directory if absent
    pub fn ensure_archive_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.archive_dir).map_err(|e| StorageError::fs(&self.archive_dir, e))
    }

    /// Delete every regular file in the archive last modified before `now - age`
    pub fn evict_older_than(&self, age: Duration) -> Result<Vec<PathBuf>, StorageError> {
        self.evict_older_than_at(age, SystemTime::now())
    }

    /// `evict_older_than` against an explicit reference time
    pub fn evict_older_than_at(
        &self,
        age: Duration,
        now: SystemTime,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let Some(cutoff) = now.checked_sub(age) else {
            return Ok(Vec::new());
        };

        let candidates: Vec<PathBuf> = self
            .archived_files()?
            .into_iter()
            .filter(|(_, modified)| *modified < cutoff)
            .map(|(path, _)| path)
            .collect();

        Ok(self.remove_all(candidates, "expired"))
    }

    /// Delete the `n` archived files with the oldest modification time.
    ///
    /// Ties keep directory enumeration order. Fewer than `n` files is not an
    /// error; everything present is removed.
    pub fn evict_oldest_n(&self, n: usize) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = self.archived_files()?;
        files.sort_by_key(|(_, modified)| *modified);

        let candidates = files.into_iter().take(n).map(|(path, _)| path).collect();
        Ok(self.remove_all(candidates, "oldest"))
    }

    /// Free space in gigabytes on the filesystem holding `path`
    pub fn available_gb(&self, path: &Path) -> Result<f64, StorageError> {
        Ok(self.storage_state(path)?.available_gb())
    }

    /// Free and total bytes on the filesystem holding `path`
    pub fn storage_state(&self, path: &Path) -> Result<StorageState, StorageError> {
        let state = self.probe.state(path).map_err(|e| StorageError::fs(path, e))?;
        debug!(
            "Storage at {}: {:.2} GB free of {:.2} GB",
            path.display(),
            state.available_gb(),
            state.total_gb()
        );
        gauge!("dashcam_available_gb").set(state.available_gb());
        Ok(state)
    }

    /// Startup policy: age pass, then one oldest-first pass if space is low.
    ///
    /// In dry-run mode the oldest-first selection is always listed.
    pub fn apply_policy(
        &self,
        policy: &EvictionPolicy,
        space_path: &Path,
    ) -> Result<EvictionReport, StorageError> {
        let mut report = EvictionReport::default();
        if !policy.clear_space {
            debug!("Eviction disabled");
            return Ok(report);
        }

        report.aged_out = self.evict_older_than(policy.max_age())?;

        let low_space = match self.available_gb(space_path) {
            Ok(available) if available < policy.low_space_threshold_gb => {
                report.available_gb = Some(available);
                info!(
                    "Low space ({:.2} GB < {:.2} GB), dropping {} oldest recordings",
                    available, policy.low_space_threshold_gb, policy.evict_batch
                );
                true
            }
            Ok(available) => {
                report.available_gb = Some(available);
                false
            }
            Err(e) => {
                warn!("Skipping low-space check: {}", e);
                false
            }
        };

        if low_space || self.dry_run {
            report.space_evicted = Some(self.evict_oldest_n(policy.evict_batch)?);
        }

        info!(
            "Eviction complete: {} expired, {} for space",
            report.aged_out.len(),
            report.space_evicted.as_ref().map_or(0, Vec::len)
        );
        Ok(report)
    }

    /// Move a finalized recording from staging into the archive directory.
    ///
    /// The archived file is byte-identical to the staged one, and the staged
    /// path no longer exists once this returns `Ok`. An archived file with the
    /// same name is never replaced; the recording is stored as `<stem>-<n>`
    /// instead.
    pub fn archive(&self, staged: &Path) -> Result<PathBuf, StorageError> {
        let name = staged
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(staged.to_path_buf()))?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let target = self.archive_dir.join(archive_name(name, attempt));
            match move_no_clobber(staged, &target) {
                Ok(()) => {
                    if attempt > 0 {
                        warn!(
                            "{} already archived, stored recording as {}",
                            name.to_string_lossy(),
                            target.display()
                        );
                    }
                    info!("Archived {}", target.display());
                    return Ok(target);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::fs(staged, e)),
            }
        }
        Err(StorageError::NameCollision(staged.to_path_buf()))
    }

    /// Archive recordings a previous run left in `staging_dir`.
    ///
    /// Only regular files with `extension` (any case) are moved, and nothing
    /// is moved when staging is the archive itself. A file that cannot be
    /// archived is logged and left in place.
    pub fn recover_staged(
        &self,
        staging_dir: &Path,
        extension: &str,
    ) -> Result<Vec<PathBuf>, StorageError> {
        if same_dir(staging_dir, &self.archive_dir) {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(staging_dir).map_err(|e| StorageError::fs(staging_dir, e))?;

        let mut recovered = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            if !matches || !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }

            warn!("Recovering unarchived recording {}", path.display());
            match self.archive(&path) {
                Ok(target) => {
                    counter!("dashcam_recordings_recovered_total").increment(1);
                    recovered.push(target);
                }
                Err(e) => warn!("Failed to recover {}: {}", path.display(), e),
            }
        }
        Ok(recovered)
    }

    /// Regular files in the archive with their modification times
    fn archived_files(&self) -> Result<Vec<(PathBuf, SystemTime)>, StorageError> {
        let entries =
            fs::read_dir(&self.archive_dir).map_err(|e| StorageError::fs(&self.archive_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Unreadable entry in {}: {}", self.archive_dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            match metadata.modified() {
                Ok(modified) => files.push((path, modified)),
                Err(e) => warn!("No modification time for {}: {}", path.display(), e),
            }
        }
        Ok(files)
    }

    /// Remove each path, logging and skipping failures
    fn remove_all(&self, paths: Vec<PathBuf>, reason: &str) -> Vec<PathBuf> {
        let mut removed = Vec::with_capacity(paths.len());
        for path in paths {
            if self.dry_run {
                info!("[dry-run] would delete {} recording {}", reason, path.display());
                removed.push(path);
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Deleted {} recording {}", reason, path.display());
                    counter!("dashcam_files_evicted_total").increment(1);
                    removed.push(path);
                }
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
        removed
    }
}

/// `name` for the first attempt, `<stem>-<attempt>.<ext>` after that
fn archive_name(name: &OsStr, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return PathBuf::from(name);
    }
    let name = Path::new(name);
    let stem = name.file_stem().unwrap_or_default().to_string_lossy();
    match name.extension() {
        Some(ext) => PathBuf::from(format!("{}-{}.{}", stem, attempt, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}-{}", stem, attempt)),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Move `from` to `to`, failing with `AlreadyExists` rather than replacing `to`
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => fs::remove_file(from),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        // Other filesystem, or one without hard links (vfat)
        Err(e) if matches!(e.raw_os_error(), Some(libc::EXDEV) | Some(libc::EPERM)) => {
            debug!("Copying {} across to the archive", from.display());
            copy_no_clobber(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

fn copy_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let mut target = File::options().write(true).create_new(true).open(to)?;
    let copied = io::copy(&mut source, &mut target).and_then(|_| target.sync_all());
    if copied.is_err() {
        let _ = fs::remove_file(to);
    }
    copied
}
