//! Canonical Reading Entity and Ingestion Schema

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

use crate::error::MalformedReadingError;
use crate::normalizer;

/// Offset-less layouts accepted in addition to RFC 3339 (interpreted as UTC)
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A reading instant together with the exact text it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    text: String,
}

impl Timestamp {
    /// Parse an ISO-8601 timestamp
    pub fn parse(text: &str) -> Result<Self, MalformedReadingError> {
        let instant = if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            dt.with_timezone(&Utc)
        } else {
            NAIVE_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| MalformedReadingError::InvalidTimestamp(text.to_string()))?
        };

        Ok(Self {
            instant,
            text: text.to_string(),
        })
    }

    /// Build a timestamp from an instant, rendered as RFC 3339 UTC
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            text: instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// The original text, byte-for-byte
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Milliseconds since the Unix epoch
    pub fn millis(&self) -> i64 {
        self.instant.timestamp_millis()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Timestamp::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Ingestion payload exactly as delivered by a transport
///
/// ```json
/// {"timestamp": "2025-10-22T20:40:00Z", "node_id": "CH4_001", "value": 0.3}
/// ```
///
/// `methane_ppm` is accepted in place of `value` for older publishers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default, alias = "methane_ppm")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

impl RawReading {
    /// Shorthand used by publishers and tests
    pub fn new(timestamp: &str, node_id: &str, value: Option<f64>) -> Self {
        Self {
            timestamp: Some(timestamp.to_string()),
            node_id: Some(node_id.to_string()),
            value: value.map(serde_json::Value::from),
            scenario: None,
        }
    }

    /// Decode an arbitrary JSON document into the ingestion schema
    pub fn from_json(payload: serde_json::Value) -> Result<Self, MalformedReadingError> {
        serde_json::from_value(payload)
            .map_err(|e| MalformedReadingError::InvalidFormat(e.to_string()))
    }
}

/// One normalized concentration measurement from one node
///
/// Fields are private: a `Reading` only comes out of normalization and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReading")]
pub struct Reading {
    timestamp: Timestamp,
    node_id: String,
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
}

impl Reading {
    pub(crate) fn from_parts(
        timestamp: Timestamp,
        node_id: String,
        value: Option<f64>,
        scenario: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            node_id,
            value,
            scenario,
        }
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }

    /// Re-serialize to the ingestion schema
    pub fn to_payload(&self) -> RawReading {
        RawReading {
            timestamp: Some(self.timestamp.as_str().to_string()),
            node_id: Some(self.node_id.clone()),
            value: self.value.map(serde_json::Value::from),
            scenario: self.scenario.clone(),
        }
    }
}

impl TryFrom<RawReading> for Reading {
    type Error = MalformedReadingError;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        normalizer::normalize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_and_naive_timestamps() {
        let zulu = Timestamp::parse("2025-10-22T20:40:00Z").unwrap();
        let offset = Timestamp::parse("2025-10-22T22:40:00+02:00").unwrap();
        let naive = Timestamp::parse("2025-10-22T20:40:00.000000").unwrap();

        assert_eq!(zulu.instant(), offset.instant());
        assert_eq!(zulu.instant(), naive.instant());
        assert_eq!(offset.as_str(), "2025-10-22T22:40:00+02:00");
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(matches!(
            Timestamp::parse("yesterday"),
            Err(MalformedReadingError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_from_instant_renders_zulu() {
        let instant = Utc.with_ymd_and_hms(2025, 10, 22, 20, 40, 0).unwrap();
        assert_eq!(Timestamp::from_instant(instant).as_str(), "2025-10-22T20:40:00Z");
    }

    #[test]
    fn test_legacy_field_name() {
        let raw: RawReading = serde_json::from_str(
            r#"{"timestamp":"2025-10-22T20:40:00Z","node_id":"Sensor_A","methane_ppm":15.3,"scenario":"normal"}"#,
        )
        .unwrap();
        assert_eq!(raw.value, Some(serde_json::json!(15.3)));
        assert_eq!(raw.scenario.as_deref(), Some("normal"));
    }

    #[test]
    fn test_round_trip_preserves_text_and_value() {
        let input = r#"{"timestamp":"2025-10-22T20:40:00.250+00:00","node_id":"CH4_001","value":0.3}"#;
        let reading: Reading = serde_json::from_str(input).unwrap();

        let payload = reading.to_payload();
        let output = serde_json::to_string(&payload).unwrap();
        let echoed: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(echoed["timestamp"], "2025-10-22T20:40:00.250+00:00");
        assert_eq!(echoed["node_id"], "CH4_001");
        assert_eq!(echoed["value"].as_f64(), Some(0.3));

        let padded: Reading = serde_json::from_str(
            r#"{"timestamp":"2025-10-22T20:40:00Z","node_id":" CH4_001 ","value":0.3}"#,
        )
        .unwrap();
        let echoed = serde_json::to_value(padded.to_payload()).unwrap();
        assert_eq!(echoed["node_id"], " CH4_001 ");
    }

    #[test]
    fn test_null_value_round_trips_as_null() {
        let reading: Reading = serde_json::from_str(
            r#"{"timestamp":"2025-10-22T20:40:00Z","node_id":"CH4_001","value":null}"#,
        )
        .unwrap();
        assert!(reading.is_missing());

        let echoed = serde_json::to_value(reading.to_payload()).unwrap();
        assert!(echoed["value"].is_null());
    }
}
