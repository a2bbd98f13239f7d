//! Filesystem probes used by readiness checks.
//!
//! Free space is measured per volume with `fs2`; recording output is located
//! with `glob` patterns and creation timestamps. Filesystems without a
//! creation time fall back to the modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::RigResult;

const BYTES_PER_GB: f64 = 1e9;

/// Free space on the volume containing `path`, in GB.
pub fn free_gb(path: &Path) -> RigResult<f64> {
    let bytes = fs2::available_space(path)?;
    Ok(bytes as f64 / BYTES_PER_GB)
}

/// Creation time of `path`, falling back to the modification time where the
/// filesystem does not record one.
pub fn created(path: &Path) -> RigResult<SystemTime> {
    let metadata = std::fs::metadata(path)?;
    Ok(metadata.created().or_else(|_| metadata.modified())?)
}

/// Whether `path` grows in size across `interval`. A strictly increasing
/// size is evidence the writer is still active.
pub async fn is_file_growing(path: &Path, interval: Duration) -> RigResult<bool> {
    let before = std::fs::metadata(path)?.len();
    tokio::time::sleep(interval).await;
    let after = std::fs::metadata(path)?.len();
    Ok(after > before)
}

/// Files under `dir` matching the relative glob `pattern`, created at or
/// after `since`, ordered oldest first.
pub fn files_created_since(
    dir: &Path,
    pattern: &str,
    since: SystemTime,
) -> RigResult<Vec<PathBuf>> {
    let full_pattern = format!("{}/{}", dir.display(), pattern);
    let mut matches: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in glob::glob(&full_pattern)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
    {
        let path = entry.map_err(|e| e.into_error())?;
        if !path.is_file() {
            continue;
        }
        let ctime = created(&path)?;
        if ctime >= since {
            matches.push((ctime, path));
        }
    }
    matches.sort_by_key(|(ctime, _)| *ctime);
    Ok(matches.into_iter().map(|(_, path)| path).collect())
}

/// Most recently created subdirectory of `root`, skipping any directory
/// whose path contains one of `exclude`.
pub fn latest_subdir(root: &Path, exclude: &[&str]) -> RigResult<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let name = path.to_string_lossy();
        if exclude.iter().any(|skip| name.contains(skip)) {
            continue;
        }
        let ctime = created(&path)?;
        match &newest {
            Some((t, _)) if *t >= ctime => {}
            _ => newest = Some((ctime, path)),
        }
    }
    Ok(newest.map(|(_, path)| path))
}
