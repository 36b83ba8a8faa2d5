use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw SNMP varbind value as it comes off the wire.
///
/// Agents return integers, strings, or opaque byte blobs depending on the
/// object syntax; downstream code dispatches on the tag instead of sniffing
/// runtime types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(n) => Some(*n as f64),
            RawValue::Uint(n) => Some(*n as f64),
            RawValue::Float(f) => Some(*f),
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Bytes(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Int(n) => Some(*n),
            RawValue::Uint(n) => i64::try_from(*n).ok(),
            RawValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            RawValue::Float(_) => None,
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Bytes(_) => None,
        }
    }

    /// Decode to UTF-8 text, tolerating byte-blob string forms.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }
}

/// OID string → raw value, the unit a poll response reduces to.
pub type RawVarbinds = HashMap<String, RawValue>;

/// Parsed observation for one transmitter at one instant. Any subset of the
/// measurement fields may be populated depending on what the agent answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmitterMetricData {
    pub timestamp: DateTime<Utc>,
    pub power_output: Option<f64>,
    pub forward_power: Option<f64>,
    pub reflected_power: Option<f64>,
    pub frequency: Option<f64>,
    pub vswr: Option<f64>,
    pub temperature: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub raw: RawVarbinds,
    pub error: Option<String>,
    /// Device-reported radio name; the store decides whether to adopt it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radio_name: Option<String>,
}

impl TransmitterMetricData {
    /// Record for a poll that never produced varbinds (transport failure).
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            power_output: None,
            forward_power: None,
            reflected_power: None,
            frequency: None,
            vswr: None,
            temperature: None,
            status: "offline".to_string(),
            raw: RawVarbinds::new(),
            error: Some(error.into()),
            radio_name: None,
        }
    }
}

/// Stored time-series row, keyed by `(transmitter_id, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TransmitterMetric {
    pub transmitter_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub power_output: Option<f64>,
    pub forward_power: Option<f64>,
    pub reflected_power: Option<f64>,
    pub frequency: Option<f64>,
    pub vswr: Option<f64>,
    pub temperature: Option<f64>,
    pub status: Option<String>,
    pub raw_data: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_numeric_coercion() {
        assert_eq!(RawValue::Int(42).as_f64(), Some(42.0));
        assert_eq!(RawValue::Uint(7).as_i64(), Some(7));
        assert_eq!(RawValue::Text("9580".into()).as_i64(), Some(9580));
        assert_eq!(RawValue::Text("n/a".into()).as_f64(), None);
        assert_eq!(RawValue::Bytes(vec![1, 2]).as_f64(), None);
        assert_eq!(RawValue::Float(2.5).as_i64(), None);
    }

    #[test]
    fn raw_value_text_decoding() {
        assert_eq!(
            RawValue::Bytes(b"WXYZ-FM".to_vec()).as_text().as_deref(),
            Some("WXYZ-FM")
        );
        assert_eq!(RawValue::Bytes(vec![0xff, 0xfe]).as_text(), None);
        assert_eq!(RawValue::Int(1).as_text(), None);
    }

    #[test]
    fn failure_record_is_offline_with_error() {
        let m = TransmitterMetricData::failure("request timeout");
        assert_eq!(m.status, "offline");
        assert_eq!(m.error.as_deref(), Some("request timeout"));
        assert!(m.raw.is_empty());
        assert!(m.vswr.is_none());
    }
}
