//! Age-based cache eviction
//!
//! A sweep runs in three steps:
//! 1. [`scan`] reads the directory tree into a [`DirSnapshot`]
//! 2. [`plan_sweep`] decides, without touching the disk, which files are stale
//!    and which directories end up empty (bottom-up)
//! 3. [`apply`] performs the deletions in post-order
//!
//! Directories are removed with `remove_dir`, never recursively, so a directory
//! that gained an entry after the scan survives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Entries older than this are evicted
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A regular file seen during the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: PathBuf,
    /// None when the platform could not report a modification time
    pub modified: Option<SystemTime>,
}

/// One directory as seen during the scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    pub path: PathBuf,
    pub files: Vec<FileSnapshot>,
    pub dirs: Vec<DirSnapshot>,
    /// Symlinks, sockets and unreadable entries; always kept
    pub other_entries: usize,
}

/// Deletion plan for one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPlan {
    pub path: PathBuf,
    /// Entries that will still exist after the plan is applied
    pub surviving: usize,
    pub stale_files: Vec<PathBuf>,
    pub children: Vec<DirPlan>,
}

impl DirPlan {
    /// Whether this directory is empty once the plan is applied
    pub fn becomes_empty(&self) -> bool {
        self.surviving == 0
    }
}

/// Something that went wrong for a single path; the sweep keeps going
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// The swept root has no entries left (the root itself is never removed)
    pub root_empty: bool,
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub errors: Vec<SweepIssue>,
    pub cancelled: bool,
}

/// Read a directory tree into a snapshot, checking `cancel` once per directory
pub fn scan(
    root: &Path,
    cancel: &CancellationToken,
    issues: &mut Vec<SweepIssue>,
) -> io::Result<DirSnapshot> {
    let mut snapshot = DirSnapshot {
        path: root.to_path_buf(),
        ..Default::default()
    };

    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                issues.push(issue(root, &e));
                snapshot.other_entries += 1;
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                issues.push(issue(&path, &e));
                snapshot.other_entries += 1;
                continue;
            }
        };

        if file_type.is_dir() {
            if cancel.is_cancelled() {
                // Unscanned directories are treated as occupied
                snapshot.other_entries += 1;
                continue;
            }
            match scan(&path, cancel, issues) {
                Ok(child) => snapshot.dirs.push(child),
                Err(e) => {
                    issues.push(issue(&path, &e));
                    snapshot.other_entries += 1;
                }
            }
        } else if file_type.is_file() {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            snapshot.files.push(FileSnapshot { path, modified });
        } else {
            snapshot.other_entries += 1;
        }
    }

    Ok(snapshot)
}

fn is_stale(modified: Option<SystemTime>, now: SystemTime, max_age: Duration) -> bool {
    match modified {
        // Timestamps in the future count as fresh
        Some(modified) => now
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false),
        None => false,
    }
}

/// Compute what a sweep would delete; pure, no I/O
pub fn plan_sweep(snapshot: &DirSnapshot, now: SystemTime, max_age: Duration) -> DirPlan {
    let mut surviving = snapshot.other_entries;
    let mut stale_files = Vec::new();

    for file in &snapshot.files {
        if is_stale(file.modified, now, max_age) {
            stale_files.push(file.path.clone());
        } else {
            surviving += 1;
        }
    }

    let children: Vec<DirPlan> = snapshot
        .dirs
        .iter()
        .map(|dir| plan_sweep(dir, now, max_age))
        .collect();
    surviving += children.iter().filter(|c| !c.becomes_empty()).count();

    DirPlan {
        path: snapshot.path.clone(),
        surviving,
        stale_files,
        children,
    }
}

/// Apply a plan in post-order. Returns whether the planned directory is now empty.
///
/// The planned directory itself is not removed; its caller decides.
pub fn apply(plan: &DirPlan, cancel: &CancellationToken, report: &mut SweepReport) -> bool {
    if cancel.is_cancelled() {
        report.cancelled = true;
        return false;
    }

    let mut failures = 0usize;

    for file in &plan.stale_files {
        match fs::remove_file(file) {
            Ok(()) => {
                debug!(path = %file.display(), "Evicted cached file");
                report.files_removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Failed to evict cached file");
                report.errors.push(issue(file, &e));
                failures += 1;
            }
        }
    }

    for child in &plan.children {
        let child_empty = apply(child, cancel, report);
        if !child.becomes_empty() {
            continue;
        }
        if !child_empty {
            failures += 1;
            continue;
        }
        match fs::remove_dir(&child.path) {
            Ok(()) => {
                debug!(path = %child.path.display(), "Removed empty cache directory");
                report.dirs_removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                // Usually a writer added an entry after the scan
                debug!(path = %child.path.display(), error = %e, "Kept cache directory");
                report.errors.push(issue(&child.path, &e));
                failures += 1;
            }
        }
    }

    !report.cancelled && plan.becomes_empty() && failures == 0
}

/// Scan, plan and apply in one go (blocking)
pub fn sweep_dir(
    root: &Path,
    now: SystemTime,
    max_age: Duration,
    cancel: &CancellationToken,
) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let snapshot = scan(root, cancel, &mut report.errors)?;
    if cancel.is_cancelled() {
        report.cancelled = true;
        return Ok(report);
    }
    let plan = plan_sweep(&snapshot, now, max_age);
    report.root_empty = apply(&plan, cancel, &mut report);
    Ok(report)
}

fn issue(path: &Path, err: &io::Error) -> SweepIssue {
    SweepIssue {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
