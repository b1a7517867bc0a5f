//! Event derivation between two canonical snapshot indices.
//!
//! Pure and deterministic: given the previous and current per-bike state
//! and the current snapshot's capture time, emits arrival and departure
//! events. No I/O happens here.

use serde::Serialize;
use std::fmt;

use crate::snapshot::{BikeIndex, BikeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Arrived,
    Departed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Arrived => "arrived",
            EventType::Departed => "departed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One derived arrival or departure fact. Immutable once created; the
/// timestamp is always the *current* snapshot's capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: String,
    pub bike_id: String,
    pub event_type: EventType,
    pub location_name: String,
    pub location_id: String,
    pub lat: f64,
    pub lon: f64,
    pub bike_class: String,
    pub battery_level: Option<f64>,
}

impl Event {
    fn from_state(
        timestamp: &str,
        bike_id: &str,
        event_type: EventType,
        state: &BikeState,
    ) -> Self {
        Event {
            timestamp: timestamp.to_string(),
            bike_id: bike_id.to_string(),
            event_type,
            location_name: state.location_name.clone(),
            location_id: state.location_id.clone(),
            lat: state.lat,
            lon: state.lon,
            bike_class: state.bike_class.as_str().to_string(),
            battery_level: state.battery_level,
        }
    }
}

/// Computes the events that turn `prev` into `curr`.
///
/// Per bike: gone → one `departed` (previous state); moved (different
/// `location_id`) → `departed` (previous state) immediately followed by
/// `arrived` (current state); unchanged location → nothing, even when
/// class or battery changed. Bikes new in `curr` each yield one
/// `arrived`, after all departures/moves.
///
/// Emission order within each pass is ascending `bike_id` (the index is
/// a `BTreeMap`), so output is deterministic for a given input pair.
pub fn diff_snapshots(prev: &BikeIndex, curr: &BikeIndex, timestamp: &str) -> Vec<Event> {
    let mut events = Vec::new();

    // Departures and moves
    for (bike_id, state) in prev {
        match curr.get(bike_id) {
            None => {
                events.push(Event::from_state(timestamp, bike_id, EventType::Departed, state));
            }
            Some(new_state) if new_state.location_id != state.location_id => {
                events.push(Event::from_state(timestamp, bike_id, EventType::Departed, state));
                events.push(Event::from_state(
                    timestamp,
                    bike_id,
                    EventType::Arrived,
                    new_state,
                ));
            }
            Some(_) => {}
        }
    }

    // Arrivals (new bikes)
    for (bike_id, state) in curr {
        if !prev.contains_key(bike_id) {
            events.push(Event::from_state(timestamp, bike_id, EventType::Arrived, state));
        }
    }

    events
}
