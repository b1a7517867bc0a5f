//! Snapshot selection: finding the newest documents in a directory.
//!
//! Ordering comes from the `_fetched_at` timestamp embedded in each file,
//! never from the filename. Candidates that fail to open or parse are
//! excluded from selection but counted, so operators can spot systematic
//! failures.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::snapshot::SnapshotDoc;

/// Filename convention for stored snapshots: `bike_rides_<local time>.json`.
pub const SNAPSHOT_PREFIX: &str = "bike_rides_";
pub const SNAPSHOT_SUFFIX: &str = ".json";

/// Result of scanning a snapshot directory.
#[derive(Debug)]
pub struct Selection {
    /// The chosen files, oldest first.
    pub files: Vec<PathBuf>,
    /// Candidates excluded because they could not be read or parsed.
    pub skipped: usize,
}

/// Returns the `count` most recent snapshot files in `data_dir`, ordered
/// oldest → newest by embedded capture timestamp.
///
/// Files missing a capture timestamp sort as empty string, i.e. below
/// every real ISO-8601 value. Fewer valid files than `count` is not an
/// error; the caller decides whether the result is sufficient.
pub fn latest_snapshots(data_dir: &Path, count: usize) -> Result<Selection> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("cannot read snapshot directory {}", data_dir.display()))?;

    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    let mut skipped = 0usize;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !matches_convention(&path) {
            continue;
        }
        match read_capture_timestamp(&path) {
            Ok(ts) => candidates.push((ts, path)),
            Err(e) => {
                skipped += 1;
                debug!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, dir = %data_dir.display(), "Excluded unparsable snapshot candidates");
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    let start = candidates.len().saturating_sub(count);
    let files = candidates.split_off(start).into_iter().map(|(_, p)| p).collect();

    Ok(Selection { files, skipped })
}

fn matches_convention(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(SNAPSHOT_SUFFIX))
}

fn read_capture_timestamp(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)?;
    let doc: SnapshotDoc = serde_json::from_str(&raw)?;
    Ok(doc.fetched_at.unwrap_or_default())
}
