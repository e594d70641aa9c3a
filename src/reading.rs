use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

pub const UNIT: &str = "L/min";

/// Identifiers attached to every reading of this device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    pub device_id: Option<String>,
    pub room_id: Option<String>,
    pub location: Option<String>,
}

impl Tags {
    /// Falls back to the capitalized room name when no location is given.
    pub fn new(device_id: Option<String>, room_id: Option<String>, location: Option<String>) -> Self {
        let location = location.or_else(|| room_id.as_deref().map(capitalize));
        Self { device_id, room_id, location }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One flow-rate measurement, built once per cycle and handed to a sink.
#[derive(Clone, Debug, Serialize)]
pub struct Reading {
    pub flow_rate: f32,
    pub unit: &'static str,
    #[serde(serialize_with = "serialize_iso8601")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Null placeholders so the collector can treat us like the other room sensors.
    #[serde(flatten)]
    pub compat: Option<Siblings>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct Siblings {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
}

/// ISO-8601 in UTC with millisecond precision, e.g. `2024-03-09T12:00:00.000Z`.
pub fn iso8601(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_iso8601<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&iso8601(timestamp))
}

impl Reading {
    pub fn new(flow_rate: f32, timestamp: DateTime<Utc>, tags: &Tags, compat: bool) -> Self {
        let Tags { device_id, room_id, location } = tags.clone();
        Self {
            flow_rate,
            unit: UNIT,
            timestamp,
            device_id,
            room_id,
            location,
            compat: compat.then(Siblings::default),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
