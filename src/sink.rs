//! SQLite persistence for derived events.
//!
//! The sink owns the `bike_status_changes` table and creates it on first
//! use. Inserts are one transaction per batch: either every event in the
//! batch lands or none do. There is no uniqueness constraint on event
//! rows, so re-running the same snapshot pair duplicates them; tracking
//! which pairs were already diffed is the caller's job.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::diff::{Event, EventType};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bike_status_changes (
    uid INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    bike_id TEXT,
    event_type TEXT,
    location_name TEXT,
    location_id TEXT,
    lat REAL,
    lon REAL,
    bike_class TEXT,
    battery_level REAL
);
"#;

const INSERT_SQL: &str = "INSERT INTO bike_status_changes (
    timestamp, bike_id, event_type, location_name, location_id,
    lat, lon, bike_class, battery_level
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Inserts `events` into the database at `db_path`, creating the file,
/// its parent directory, and the schema as needed. An empty batch is a
/// no-op: the store is not opened, let alone created.
///
/// Returns the number of rows inserted.
pub fn persist_events(events: &[Event], db_path: &Path) -> Result<usize> {
    if events.is_empty() {
        debug!("No events to persist");
        return Ok(0);
    }

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }

    let mut conn = open(db_path)?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_SQL)?;
        for e in events {
            stmt.execute(params![
                e.timestamp,
                e.bike_id,
                e.event_type.as_str(),
                e.location_name,
                e.location_id,
                e.lat,
                e.lon,
                e.bike_class,
                e.battery_level,
            ])?;
        }
    }
    tx.commit().context("event batch insert failed")?;

    info!(rows = events.len(), db = %db_path.display(), "Persisted event batch");
    Ok(events.len())
}

/// Opens the event database and ensures the schema exists.
pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("cannot open event store {}", db_path.display()))?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

/// Reads persisted events back in insertion order, optionally restricted
/// to one calendar day (`YYYY-MM-DD`, matched on `date(timestamp)`).
pub fn read_events(conn: &Connection, day: Option<&str>) -> Result<Vec<Event>> {
    let base = "SELECT timestamp, bike_id, event_type, location_name, location_id,
                       lat, lon, bike_class, battery_level
                FROM bike_status_changes";
    let sql = match day {
        Some(_) => format!("{base} WHERE date(timestamp) = date(?1) ORDER BY uid"),
        None => format!("{base} ORDER BY uid"),
    };

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Event> {
        let event_type: String = row.get(2)?;
        Ok(Event {
            timestamp: row.get(0)?,
            bike_id: row.get(1)?,
            event_type: if event_type == "arrived" {
                EventType::Arrived
            } else {
                EventType::Departed
            },
            location_name: row.get(3)?,
            location_id: row.get(4)?,
            lat: row.get(5)?,
            lon: row.get(6)?,
            bike_class: row.get(7)?,
            battery_level: row.get(8)?,
        })
    };

    let rows = match day {
        Some(d) => stmt.query_map(params![d], map_row)?,
        None => stmt.query_map([], map_row)?,
    };

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}
