//! Snapshot normalization and the messages exchanged with subscribers.
//!
//! The upstream feed sends an array of positional arrays (state vectors),
//! one per aircraft:
//!
//! | Index | Field          | Index | Field           |
//! |-------|----------------|-------|-----------------|
//! | 0     | icao24         | 9     | velocity        |
//! | 1     | callsign       | 10    | true_track      |
//! | 2     | origin_country | 11    | vertical_rate   |
//! | 3     | time_position  | 12    | sensors         |
//! | 4     | last_contact   | 13    | geo_altitude    |
//! | 5     | longitude      | 14    | squawk          |
//! | 6     | latitude       | 15    | spi             |
//! | 7     | baro_altitude  | 16    | position_source |
//! | 8     | on_ground      | 17    | category        |

use crate::bounds::GeographicBounds;
use crate::types::{AircraftCategory, FlightRecord, Position, Velocity, UNKNOWN};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const IDX_ICAO24: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_ORIGIN_COUNTRY: usize = 2;
const IDX_LAST_CONTACT: usize = 4;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_BARO_ALTITUDE: usize = 7;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_VERTICAL_RATE: usize = 11;
const IDX_GEO_ALTITUDE: usize = 13;
const IDX_CATEGORY: usize = 17;

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Normalize a raw snapshot, defaulting missing contact times to now.
pub fn normalize(raw: &Value) -> Vec<FlightRecord> {
    normalize_at(raw, unix_now())
}

/// Normalize a raw snapshot into canonical records.
///
/// Never fails: a missing, null, empty or non-array `states` field yields an
/// empty sequence. Entries without both latitude and longitude are dropped.
pub fn normalize_at(raw: &Value, now: i64) -> Vec<FlightRecord> {
    let Some(states) = raw.get("states").and_then(Value::as_array) else {
        return Vec::new();
    };

    states
        .iter()
        .filter_map(|state| normalize_state(state, now))
        .collect()
}

fn normalize_state(state: &Value, now: i64) -> Option<FlightRecord> {
    let fields = state.as_array()?;
    // Records are keyed by icao24; an entry without one cannot be tracked
    // across batches, so it is dropped even when it has a position.
    let icao24 = fields.get(IDX_ICAO24)?.as_str()?;
    let latitude = float_at(fields, IDX_LATITUDE)?;
    let longitude = float_at(fields, IDX_LONGITUDE)?;

    let altitude = float_at(fields, IDX_BARO_ALTITUDE)
        .or_else(|| float_at(fields, IDX_GEO_ALTITUDE))
        .unwrap_or(0.0);

    let callsign = fields
        .get(IDX_CALLSIGN)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let origin_country = fields
        .get(IDX_ORIGIN_COUNTRY)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    let category = int_at(fields, IDX_CATEGORY)
        .map(AircraftCategory::from_code)
        .unwrap_or_default();

    Some(FlightRecord {
        icao24: icao24.to_string(),
        callsign,
        origin_country,
        position: Some(Position {
            latitude,
            longitude,
            altitude,
        }),
        velocity: Velocity {
            speed: float_at(fields, IDX_VELOCITY).unwrap_or(0.0),
            heading: float_at(fields, IDX_TRUE_TRACK).unwrap_or(0.0),
            vertical_rate: float_at(fields, IDX_VERTICAL_RATE).unwrap_or(0.0),
        },
        on_ground: fields
            .get(IDX_ON_GROUND)
            .and_then(Value::as_bool)
            .unwrap_or(false),
        last_update: int_at(fields, IDX_LAST_CONTACT).unwrap_or(now),
        category,
    })
}

fn float_at(fields: &[Value], idx: usize) -> Option<f64> {
    fields.get(idx).and_then(Value::as_f64)
}

/// Integral values only; `1.9` is not a category code.
fn int_at(fields: &[Value], idx: usize) -> Option<i64> {
    fields.get(idx).and_then(Value::as_i64)
}

/// One published batch: the full normalized sequence plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    pub flights: Arc<Vec<FlightRecord>>,
    /// Unix seconds at which the snapshot was taken
    pub timestamp: i64,
    pub total_flights: usize,
    /// Region used for the fetch, absent for a global fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<GeographicBounds>,
}

impl UpdateBatch {
    pub fn new(
        flights: Arc<Vec<FlightRecord>>,
        timestamp: i64,
        bounds: Option<GeographicBounds>,
    ) -> Self {
        let total_flights = flights.len();
        Self {
            flights,
            timestamp,
            total_flights,
            bounds,
        }
    }
}

/// Fetch failure as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Short failure kind (`auth`, `fetch`, `timeout`)
    pub error: String,
    pub message: String,
    pub timestamp: i64,
}

/// Server → subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Update(UpdateBatch),
    Error(ErrorNotice),
}

/// Subscriber → server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    SetBounds(GeographicBounds),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_empty_inputs() {
        assert!(normalize_at(&Value::Null, NOW).is_empty());
        assert!(normalize_at(&json!({}), NOW).is_empty());
        assert!(normalize_at(&json!({"states": null}), NOW).is_empty());
        assert!(normalize_at(&json!({"states": []}), NOW).is_empty());
        assert!(normalize_at(&json!({"states": "nope"}), NOW).is_empty());
        assert!(normalize_at(&json!({"states": {"a": 1}}), NOW).is_empty());
        assert!(normalize_at(&json!([1, 2, 3]), NOW).is_empty());
    }

    #[test]
    fn test_full_state_vector() {
        let raw = json!({"states": [[
            "3c6444", "SWR8T ", "Switzerland", 1699000000, 1699000000,
            8.5456, 47.4502, 10972.8, false, 250.5, 180.0, -5.2,
            null, 11000.0, null, false, 0, 1
        ]]});

        let records = normalize_at(&raw, NOW);
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.icao24, "3c6444");
        assert_eq!(r.callsign, "SWR8T");
        assert_eq!(r.origin_country, "Switzerland");
        assert_eq!(
            r.position,
            Some(Position {
                latitude: 47.4502,
                longitude: 8.5456,
                altitude: 10972.8,
            })
        );
        assert_eq!(
            r.velocity,
            Velocity {
                speed: 250.5,
                heading: 180.0,
                vertical_rate: -5.2,
            }
        );
        assert!(!r.on_ground);
        assert_eq!(r.last_update, 1699000000);
        assert_eq!(r.category, AircraftCategory::Light);
    }

    #[test]
    fn test_missing_coordinates_dropped() {
        let raw = json!({"states": [
            ["aaaaaa", "A", "X", null, 1, null, 47.0, 100.0, false, 1.0, 1.0, 1.0],
            ["bbbbbb", "B", "X", null, 1, 8.0, null, 100.0, false, 1.0, 1.0, 1.0],
            ["cccccc", "C", "X", null, 1, 8.0, 47.0, 100.0, false, 1.0, 1.0, 1.0],
            "garbage",
            [null, "D", "X", null, 1, 8.0, 47.0]
        ]});

        let records = normalize_at(&raw, NOW);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].icao24, "cccccc");
    }

    #[test]
    fn test_defaults_applied() {
        let raw = json!({"states": [["abc123", "   ", null, null, null, 2.0, 1.0]]});

        let records = normalize_at(&raw, NOW);
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.callsign, UNKNOWN);
        assert_eq!(r.origin_country, UNKNOWN);
        assert_eq!(r.altitude(), 0.0);
        assert_eq!(r.velocity, Velocity::default());
        assert!(!r.on_ground);
        assert_eq!(r.last_update, NOW);
        assert_eq!(r.category, AircraftCategory::Unknown);
    }

    #[test]
    fn test_callsign_uppercased_and_geo_altitude_fallback() {
        let raw = json!({"states": [[
            "abc123", " ezy12ab ", "United Kingdom", null, 5, 0.1, 51.5,
            null, true, null, null, null, null, 350.0, null, false, 0, 42
        ]]});

        let r = &normalize_at(&raw, NOW)[0];
        assert_eq!(r.callsign, "EZY12AB");
        assert_eq!(r.altitude(), 350.0);
        assert!(r.on_ground);
        assert_eq!(r.last_update, 5);
        assert_eq!(r.category, AircraftCategory::Unknown);
    }

    #[test]
    fn test_non_integer_category_is_unknown() {
        let state = |category: Value| {
            json!(["abc123", "A", "X", null, 1, 1.0, 1.0, 100.0, false, 1.0, 1.0, 1.0,
                   null, null, null, false, 0, category])
        };
        let raw = json!({"states": [state(json!(1.9)), state(json!(2.0)), state(json!(2))]});

        let categories: Vec<_> = normalize_at(&raw, NOW)
            .into_iter()
            .map(|r| r.category)
            .collect();
        assert_eq!(
            categories,
            [
                AircraftCategory::Unknown,
                AircraftCategory::Unknown,
                AircraftCategory::Small,
            ]
        );
    }

    #[test]
    fn test_order_preserved() {
        let raw = json!({"states": [
            ["000003", "C", "X", null, 1, 1.0, 1.0],
            ["000001", "A", "X", null, 1, 1.0, 1.0],
            ["000002", "B", "X", null, 1, 1.0, 1.0]
        ]});

        let ids: Vec<_> = normalize_at(&raw, NOW)
            .into_iter()
            .map(|r| r.icao24)
            .collect();
        assert_eq!(ids, ["000003", "000001", "000002"]);
    }

    #[test]
    fn test_server_message_shape() {
        let batch = UpdateBatch::new(Arc::new(Vec::new()), 42, None);
        let value = serde_json::to_value(ServerMessage::Update(batch)).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["totalFlights"], 0);
        assert_eq!(value["timestamp"], 42);
        assert!(value.get("bounds").is_none());

        let err = ServerMessage::Error(ErrorNotice {
            error: "fetch".to_string(),
            message: "boom".to_string(),
            timestamp: 7,
        });
        let value = serde_json::to_value(err).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "fetch");
    }

    #[test]
    fn test_client_message_parse() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"setBounds","south":40,"west":0,"north":50,"east":15}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SetBounds(GeographicBounds::new(40.0, 0.0, 50.0, 15.0))
        );
    }
}
