//! The select → load → diff → persist pipeline.
//!
//! One strictly sequential pass: pick the two newest snapshots from the
//! data directory, canonicalize both, derive events, and write them to
//! the event store. A run with fewer than two valid snapshots writes
//! nothing and reports that instead of failing.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::diff::diff_snapshots;
use crate::select::latest_snapshots;
use crate::sink::persist_events;
use crate::snapshot::load_snapshot;

/// Outcome of one pipeline run.
#[derive(Debug)]
pub struct DiffReport {
    /// The (previous, current) snapshot files, `None` when fewer than two
    /// valid snapshots were available.
    pub compared: Option<(PathBuf, PathBuf)>,
    pub events_recorded: usize,
    pub skipped_candidates: usize,
}

/// Diffs the two newest snapshots under `data_dir` and persists the
/// resulting events into `db_path`.
///
/// Zero events is a successful run (identical snapshots); the store is
/// not touched in that case. A chosen snapshot that fails to load is an
/// error here even though the selector already parsed it once, since the
/// file may change between the two reads.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn run_diff(data_dir: &Path, db_path: &Path) -> Result<DiffReport> {
    let selection = latest_snapshots(data_dir, 2)?;
    if selection.files.len() < 2 {
        warn!(
            available = selection.files.len(),
            "Not enough snapshots to compare"
        );
        return Ok(DiffReport {
            compared: None,
            events_recorded: 0,
            skipped_candidates: selection.skipped,
        });
    }

    let prev_path = selection.files[0].clone();
    let curr_path = selection.files[1].clone();

    let (_, prev) = load_file(&prev_path)?;
    let (curr_ts, curr) = load_file(&curr_path)?;

    let events = diff_snapshots(&prev, &curr, &curr_ts);
    let recorded = persist_events(&events, db_path)?;

    info!(
        prev = %prev_path.display(),
        curr = %curr_path.display(),
        events = recorded,
        "Diff run complete"
    );

    Ok(DiffReport {
        compared: Some((prev_path, curr_path)),
        events_recorded: recorded,
        skipped_candidates: selection.skipped,
    })
}

fn load_file(path: &Path) -> Result<(String, crate::snapshot::BikeIndex)> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read snapshot {}", path.display()))?;
    load_snapshot(&raw).with_context(|| format!("cannot parse snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{open, read_events};
    use std::fs;

    fn write_snapshot(dir: &Path, name: &str, fetched_at: &str, places: &str) {
        let body = format!(
            r#"{{"_fetched_at": "{fetched_at}",
                 "data": [{{"cities": [{{"places": [{places}]}}]}}]}}"#
        );
        fs::write(dir.join(name), body).unwrap();
    }

    const RYNEK: &str = r#"{"name": "Rynek", "uid": 42, "placeType": "STATION",
        "geoCoords": {"lat": 51.11, "lng": 17.03},
        "bikes": [{"number": 591207, "bikeType": "STANDARD"}]}"#;

    #[test]
    fn test_not_enough_snapshots_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        write_snapshot(dir.path(), "bike_rides_a.json", "2025-06-01T10:00:00", RYNEK);

        let report = run_diff(dir.path(), &db).unwrap();
        assert!(report.compared.is_none());
        assert_eq!(report.events_recorded, 0);
        assert!(!db.exists());
    }

    #[test]
    fn test_identical_snapshots_record_zero_events() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        write_snapshot(dir.path(), "bike_rides_a.json", "2025-06-01T10:00:00", RYNEK);
        write_snapshot(dir.path(), "bike_rides_b.json", "2025-06-01T10:05:00", RYNEK);

        let report = run_diff(dir.path(), &db).unwrap();
        assert!(report.compared.is_some());
        assert_eq!(report.events_recorded, 0);
        // Empty diff must not even create the store.
        assert!(!db.exists());
    }

    #[test]
    fn test_departure_is_recorded_with_current_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        write_snapshot(dir.path(), "bike_rides_a.json", "2025-06-01T10:00:00", RYNEK);
        write_snapshot(dir.path(), "bike_rides_b.json", "2025-06-01T10:05:00", "");

        let report = run_diff(dir.path(), &db).unwrap();
        assert_eq!(report.events_recorded, 1);

        let conn = open(&db).unwrap();
        let rows = read_events(&conn, None).unwrap();
        assert_eq!(rows[0].bike_id, "591207");
        assert_eq!(rows[0].timestamp, "2025-06-01T10:05:00");
        assert_eq!(rows[0].location_name, "Rynek");
    }

    #[test]
    fn test_chosen_pair_is_newest_two_by_capture_time() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        // Oldest file holds a bike; if selection wrongly included it the
        // diff would record a departure.
        write_snapshot(dir.path(), "bike_rides_z.json", "2025-06-01T09:00:00", RYNEK);
        write_snapshot(dir.path(), "bike_rides_a.json", "2025-06-01T10:00:00", "");
        write_snapshot(dir.path(), "bike_rides_m.json", "2025-06-01T10:05:00", "");

        let report = run_diff(dir.path(), &db).unwrap();
        let (prev, curr) = report.compared.unwrap();
        assert!(prev.ends_with("bike_rides_a.json"));
        assert!(curr.ends_with("bike_rides_m.json"));
        assert_eq!(report.events_recorded, 0);
    }

    #[test]
    fn test_malformed_chosen_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        // The second file passes the selector's structural parse but
        // fails canonicalization: a place with bikes and no coordinates.
        write_snapshot(dir.path(), "bike_rides_a.json", "2025-06-01T10:00:00", RYNEK);
        write_snapshot(
            dir.path(),
            "bike_rides_b.json",
            "2025-06-01T10:05:00",
            r#"{"name": "Broken", "uid": 1, "placeType": "STATION",
                "bikes": [{"number": 1}]}"#,
        );

        assert!(run_diff(dir.path(), &db).is_err());
        assert!(!db.exists());
    }
}
