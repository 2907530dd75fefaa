//! # Location Reading
//!
//! One positional sample as produced by the location source and as it
//! appears inside the `locationData` array on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One timestamped positional sample.
///
/// Optional fields are omitted from the JSON form when absent, matching the
/// shape the endpoint expects.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use location_uplink::reading::Reading;
///
/// let at = Utc.with_ymd_and_hms(2025, 6, 29, 10, 30, 0).unwrap();
/// let reading = Reading::new(52.52, 13.405, 4.5, at).with_speed(1.2);
///
/// let json = serde_json::to_value(&reading).unwrap();
/// assert_eq!(json["timestamp"], "2025-06-29T10:30:00.000Z");
/// assert!(json.get("altitude").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,

    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl Reading {
    /// Create a reading with only the mandatory fields set
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            timestamp,
            altitude: None,
            bearing: None,
            speed: None,
        }
    }

    /// Attach an altitude in meters
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Attach a bearing in degrees
    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    /// Attach a ground speed in meters per second
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

// Always millisecond precision with a literal `Z`, e.g. 2025-06-29T10:30:00.000Z
fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 29, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_mandatory_fields_only() {
        let reading = Reading::new(1.0, 2.0, 3.0, sample_time());
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["latitude"], 1.0);
        assert_eq!(json["longitude"], 2.0);
        assert_eq!(json["accuracy"], 3.0);
        assert_eq!(json["timestamp"], "2025-06-29T10:30:00.000Z");

        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4, "optional fields must be omitted");
    }

    #[test]
    fn test_optional_fields_serialized_when_present() {
        let reading = Reading::new(1.0, 2.0, 3.0, sample_time())
            .with_altitude(120.5)
            .with_bearing(270.0)
            .with_speed(3.4);
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["altitude"], 120.5);
        assert_eq!(json["bearing"], 270.0);
        assert_eq!(json["speed"], 3.4);
    }

    #[test]
    fn test_timestamp_keeps_milliseconds() {
        let ts = Utc.timestamp_millis_opt(1_751_193_000_123).unwrap();
        let reading = Reading::new(0.0, 0.0, 0.0, ts);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["timestamp"], "2025-06-29T10:30:00.123Z");
    }

    #[test]
    fn test_parse_from_producer_line() {
        let line = r#"{"latitude":48.1,"longitude":11.5,"accuracy":6.0,"timestamp":"2025-06-29T12:30:00.000+02:00","speed":0.5}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.timestamp, sample_time());
        assert_eq!(reading.speed, Some(0.5));
        assert_eq!(reading.altitude, None);
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let line = r#"{"latitude":1,"longitude":2,"accuracy":3,"timestamp":"yesterday"}"#;
        assert!(serde_json::from_str::<Reading>(line).is_err());
    }
}
