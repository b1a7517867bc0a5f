//! Snapshot document parsing and canonicalization.
//!
//! Turns one raw JSON snapshot of the fleet into a per-bike state index
//! keyed by bike id, plus the snapshot's embedded capture timestamp.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel used for both location name and id of undocked bikes.
pub const FREESTANDING: &str = "freestanding";

/// An id field that upstream serves as either a JSON number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Num(i64),
    Text(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Num(n) => write!(f, "{n}"),
            IdValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Top-level snapshot document as fetched from the fleet API.
///
/// `_fetched_at` is stamped onto the payload at fetch time; everything
/// under `data` is upstream's own shape.
#[derive(Debug, Deserialize)]
pub struct SnapshotDoc {
    #[serde(rename = "_fetched_at", default)]
    pub fetched_at: Option<String>,
    pub data: Vec<Country>,
}

#[derive(Debug, Deserialize)]
pub struct Country {
    pub cities: Vec<City>,
}

#[derive(Debug, Deserialize)]
pub struct City {
    pub places: Vec<Place>,
}

/// A dock, station, or freestanding bucket on the fleet map.
#[derive(Debug, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uid: Option<IdValue>,
    #[serde(default, rename = "placeType")]
    pub place_type: Option<String>,
    #[serde(default, rename = "geoCoords")]
    pub geo_coords: Option<GeoCoords>,
    #[serde(default)]
    pub bikes: Option<Vec<Bike>>,
}

#[derive(Debug, Deserialize)]
pub struct GeoCoords {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct Bike {
    pub number: IdValue,
    #[serde(default, rename = "bikeType")]
    pub bike_type: Option<String>,
    #[serde(default)]
    pub battery: Option<f64>,
}

/// Standard vs. electric, derived from the upstream type classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BikeClass {
    Standard,
    Electric,
}

impl BikeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BikeClass::Standard => "standard",
            BikeClass::Electric => "electric",
        }
    }

    /// Classifies an upstream `bikeType` string: electric iff it starts
    /// with the `ELECTRIC` marker after case normalization.
    pub fn from_type_field(field: Option<&str>) -> Self {
        match field {
            Some(s) if s.to_uppercase().starts_with("ELECTRIC") => BikeClass::Electric,
            _ => BikeClass::Standard,
        }
    }
}

/// Canonical state of one bike within a single snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BikeState {
    pub location_name: String,
    pub location_id: String,
    pub lat: f64,
    pub lon: f64,
    pub bike_class: BikeClass,
    pub battery_level: Option<f64>,
}

/// Per-bike state index for one snapshot. `BTreeMap` keeps iteration
/// deterministic (ascending bike id), which fixes diff emission order.
pub type BikeIndex = BTreeMap<String, BikeState>;

/// Parses a raw snapshot document and builds its canonical state index.
///
/// Returns the embedded capture timestamp (empty string when absent, which
/// sorts below every real ISO-8601 value) and the index. Later places win
/// when upstream lists the same bike twice.
///
/// # Errors
///
/// Fails on invalid JSON, on a document with no reachable places array,
/// and on a place that holds bikes but carries no coordinates. A missing
/// per-bike battery is not an error.
pub fn load_snapshot(raw: &str) -> Result<(String, BikeIndex)> {
    let doc: SnapshotDoc =
        serde_json::from_str(raw).context("snapshot is not a valid fleet document")?;
    canonicalize(&doc)
}

/// Same as [`load_snapshot`] but starting from an already-parsed document.
pub fn canonicalize(doc: &SnapshotDoc) -> Result<(String, BikeIndex)> {
    let timestamp = doc.fetched_at.clone().unwrap_or_default();

    let mut index = BikeIndex::new();
    for country in &doc.data {
        for city in &country.cities {
            for place in &city.places {
                index_place(place, &mut index)?;
            }
        }
    }
    Ok((timestamp, index))
}

fn index_place(place: &Place, index: &mut BikeIndex) -> Result<()> {
    let bikes = match &place.bikes {
        Some(b) if !b.is_empty() => b,
        _ => return Ok(()),
    };

    // Any FREESTANDING variant (plain or electric) collapses to the
    // sentinel; the place's own name and uid are discarded.
    let is_freestanding = place
        .place_type
        .as_deref()
        .is_some_and(|t| t.to_uppercase().starts_with("FREESTANDING"));

    let (location_name, location_id) = if is_freestanding {
        (FREESTANDING.to_string(), FREESTANDING.to_string())
    } else {
        let name = place.name.clone().unwrap_or_default();
        let id = place.uid.as_ref().map(|u| u.to_string()).unwrap_or_default();
        (name, id)
    };

    let Some(coords) = &place.geo_coords else {
        bail!(
            "place {:?} holds {} bike(s) but has no geoCoords",
            location_name,
            bikes.len()
        );
    };

    for bike in bikes {
        let bike_id = bike.number.to_string();
        index.insert(
            bike_id,
            BikeState {
                location_name: location_name.clone(),
                location_id: location_id.clone(),
                lat: coords.lat,
                lon: coords.lng,
                bike_class: BikeClass::from_type_field(bike.bike_type.as_deref()),
                battery_level: bike.battery,
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(places_json: &str, fetched_at: &str) -> String {
        format!(
            r#"{{"_fetched_at": "{fetched_at}",
                 "data": [{{"cities": [{{"places": [{places_json}]}}]}}]}}"#
        )
    }

    #[test]
    fn test_load_station_bike() {
        let raw = doc(
            r#"{"name": "Rynek", "uid": 42, "placeType": "STATION",
                "geoCoords": {"lat": 51.11, "lng": 17.03},
                "bikes": [{"number": 591207, "bikeType": "STANDARD", "battery": null}]}"#,
            "2025-06-01T10:00:00+02:00",
        );
        let (ts, index) = load_snapshot(&raw).unwrap();
        assert_eq!(ts, "2025-06-01T10:00:00+02:00");

        let state = &index["591207"];
        assert_eq!(state.location_name, "Rynek");
        assert_eq!(state.location_id, "42");
        assert_eq!(state.lat, 51.11);
        assert_eq!(state.lon, 17.03);
        assert_eq!(state.bike_class, BikeClass::Standard);
        assert_eq!(state.battery_level, None);
    }

    #[test]
    fn test_freestanding_collapses_name_and_id() {
        let raw = doc(
            r#"{"name": "BIKE 591300", "uid": 99, "placeType": "FREESTANDING_BIKE",
                "geoCoords": {"lat": 51.0, "lng": 17.0},
                "bikes": [{"number": 591300}]}"#,
            "2025-06-01T10:00:00+02:00",
        );
        let (_, index) = load_snapshot(&raw).unwrap();
        let state = &index["591300"];
        assert_eq!(state.location_name, FREESTANDING);
        assert_eq!(state.location_id, FREESTANDING);
    }

    #[test]
    fn test_freestanding_electric_variant() {
        let raw = doc(
            r#"{"name": "EBIKE 700", "uid": 7, "placeType": "FREESTANDING_ELECTRIC_BIKE",
                "geoCoords": {"lat": 51.0, "lng": 17.0},
                "bikes": [{"number": 700, "bikeType": "ELECTRIC_XL", "battery": 83.0}]}"#,
            "t",
        );
        let (_, index) = load_snapshot(&raw).unwrap();
        let state = &index["700"];
        assert_eq!(state.location_id, FREESTANDING);
        assert_eq!(state.bike_class, BikeClass::Electric);
        assert_eq!(state.battery_level, Some(83.0));
    }

    #[test]
    fn test_bike_class_normalizes_case() {
        assert_eq!(
            BikeClass::from_type_field(Some("electric_city")),
            BikeClass::Electric
        );
        assert_eq!(BikeClass::from_type_field(Some("CITY")), BikeClass::Standard);
        assert_eq!(BikeClass::from_type_field(None), BikeClass::Standard);
    }

    #[test]
    fn test_empty_places_are_skipped() {
        let raw = doc(
            r#"{"name": "Empty", "uid": 1, "placeType": "STATION",
                "geoCoords": {"lat": 0.0, "lng": 0.0}, "bikes": []}"#,
            "t",
        );
        let (_, index) = load_snapshot(&raw).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_fetched_at_is_empty_string() {
        let raw = r#"{"data": [{"cities": [{"places": []}]}]}"#;
        let (ts, _) = load_snapshot(raw).unwrap();
        assert_eq!(ts, "");
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        assert!(load_snapshot("{not json").is_err());
    }

    #[test]
    fn test_missing_places_path_is_fatal() {
        assert!(load_snapshot(r#"{"_fetched_at": "t"}"#).is_err());
    }

    #[test]
    fn test_bikes_without_coords_is_fatal() {
        let raw = doc(
            r#"{"name": "NoCoords", "uid": 5, "placeType": "STATION",
                "bikes": [{"number": 1}]}"#,
            "t",
        );
        assert!(load_snapshot(&raw).is_err());
    }

    #[test]
    fn test_string_ids_are_accepted() {
        let raw = doc(
            r#"{"name": "S", "uid": "abc", "placeType": "STATION",
                "geoCoords": {"lat": 1.0, "lng": 2.0},
                "bikes": [{"number": "bike-9"}]}"#,
            "t",
        );
        let (_, index) = load_snapshot(&raw).unwrap();
        assert_eq!(index["bike-9"].location_id, "abc");
    }

    #[test]
    fn test_duplicate_bike_id_keeps_one_state() {
        let raw = doc(
            r#"{"name": "A", "uid": 1, "placeType": "STATION",
                "geoCoords": {"lat": 1.0, "lng": 2.0},
                "bikes": [{"number": 5}]},
               {"name": "B", "uid": 2, "placeType": "STATION",
                "geoCoords": {"lat": 3.0, "lng": 4.0},
                "bikes": [{"number": 5}]}"#,
            "t",
        );
        let (_, index) = load_snapshot(&raw).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["5"].location_id, "2");
    }
}
