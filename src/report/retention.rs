//! Age-based pruning of previously generated report files

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Delete files in `dir` named `<prefix>*<suffix>` last modified more than `max_age` before `now`
///
/// Only regular files directly inside `dir` are considered. A missing
/// directory prunes nothing.
pub fn prune(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    max_age: Duration,
    now: SystemTime,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    if !dir.is_dir() {
        return Ok(removed);
    }

    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        if metadata.modified()? < cutoff {
            let path = entry.path();
            fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "pruned old report");
            removed.push(path);
        }
    }

    removed.sort();
    Ok(removed)
}

pub fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 24 * 60 * 60)
}
