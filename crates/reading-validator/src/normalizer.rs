//! Reading Normalization
//!
//! Turns a [`RawReading`] into a canonical [`Reading`] or explains why it cannot.

use serde_json::Value;
use tracing::debug;

use crate::error::MalformedReadingError;
use crate::reading::{RawReading, Reading, Timestamp};

/// Validate and coerce a raw payload
pub fn normalize(raw: RawReading) -> Result<Reading, MalformedReadingError> {
    let node_id = raw
        .node_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(MalformedReadingError::MissingField("node_id"))?;

    let timestamp = match raw.timestamp.as_deref() {
        Some(text) if !text.trim().is_empty() => Timestamp::parse(text)?,
        _ => return Err(MalformedReadingError::MissingField("timestamp")),
    };

    let value = coerce_value(raw.value.as_ref())?;

    debug!("Normalized reading node={} ts={} value={:?}", node_id, timestamp, value);

    Ok(Reading::from_parts(timestamp, node_id, value, raw.scenario))
}

/// Decode and normalize an arbitrary JSON payload
pub fn normalize_json(payload: Value) -> Result<Reading, MalformedReadingError> {
    normalize(RawReading::from_json(payload)?)
}

fn coerce_value(raw: Option<&Value>) -> Result<Option<f64>, MalformedReadingError> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| MalformedReadingError::NotANumber(n.to_string()))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| MalformedReadingError::NotANumber(format!("{:?}", s)))?,
        Some(other) => return Err(MalformedReadingError::NotANumber(other.to_string())),
    };

    if !value.is_finite() {
        return Err(MalformedReadingError::NonFinite(value));
    }
    if value < 0.0 {
        return Err(MalformedReadingError::Negative(value));
    }

    Ok(Some(value))
}
