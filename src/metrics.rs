//! Daily metrics over the persisted event table.
//!
//! Grouped counts and sums for one calendar day, serialized as JSON for
//! downstream dashboards. Relocation distance is estimated by pairing
//! each bike's departed/arrived events that share a capture timestamp.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::diff::EventType;
use crate::distance::distance_km;
use crate::sink::read_events;

/// Aggregated event metrics for a single day.
#[derive(Debug, Serialize, PartialEq)]
pub struct DailyMetrics {
    pub date: String,
    pub total_events: i64,
    pub arrivals: i64,
    pub departures: i64,
    pub distinct_bikes: i64,
    /// Event count per hour, keys "0".."23", absent hours omitted.
    /// Hours are UTC: SQLite normalizes timestamps carrying an offset.
    pub events_by_hour: BTreeMap<String, i64>,
    /// Sum of haversine km over departed→arrived pairs, 3 decimals.
    pub relocation_distance_km: f64,
}

/// Computes metrics for `day` (`YYYY-MM-DD`) from an open event store.
pub fn compute_daily_metrics(conn: &Connection, day: &str) -> Result<DailyMetrics> {
    if NaiveDate::parse_from_str(day, "%Y-%m-%d").is_err() {
        bail!("day must be in YYYY-MM-DD format, got {day:?}");
    }

    let count_where = |predicate: &str| -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM bike_status_changes
             WHERE date(timestamp) = date(?1) {predicate}"
        );
        conn.query_row(&sql, params![day], |row| row.get(0))
            .context("event count query failed")
    };

    let total_events = count_where("")?;
    let arrivals = count_where("AND event_type = 'arrived'")?;
    let departures = count_where("AND event_type = 'departed'")?;

    let distinct_bikes: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT bike_id) FROM bike_status_changes
         WHERE date(timestamp) = date(?1)",
        params![day],
        |row| row.get(0),
    )?;

    let mut events_by_hour = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS h, COUNT(*)
         FROM bike_status_changes
         WHERE date(timestamp) = date(?1)
         GROUP BY h ORDER BY h",
    )?;
    let rows = stmt.query_map(params![day], |row| {
        Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (hour, count) = row?;
        if let Some(h) = hour {
            events_by_hour.insert(h.to_string(), count);
        }
    }

    Ok(DailyMetrics {
        date: day.to_string(),
        total_events,
        arrivals,
        departures,
        distinct_bikes,
        events_by_hour,
        relocation_distance_km: relocation_distance(conn, day)?,
    })
}

/// Sums the straight-line distance of every relocation recorded on `day`.
///
/// A relocation is a departed event followed by an arrived event for the
/// same bike with the same capture timestamp (the diff engine emits them
/// as a pair). Pairs with unusable coordinates are skipped.
fn relocation_distance(conn: &Connection, day: &str) -> Result<f64> {
    let events = read_events(conn, Some(day))?;

    let mut total = 0.0;
    let mut pending: BTreeMap<(String, String), (f64, f64)> = BTreeMap::new();
    for e in events {
        let key = (e.bike_id.clone(), e.timestamp.clone());
        match e.event_type {
            EventType::Departed => {
                pending.insert(key, (e.lat, e.lon));
            }
            EventType::Arrived => {
                if let Some((lat, lon)) = pending.remove(&key) {
                    if let Some(d) = distance_km(lat, lon, e.lat, e.lon) {
                        total += d;
                    }
                }
            }
        }
    }
    Ok((total * 1000.0).round() / 1000.0)
}
