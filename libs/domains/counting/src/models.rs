use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A counter reading published by a producer service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountingResult {
    /// Identifier of the counted entity
    pub id: String,
    pub count: i64,
    /// When the producer took the reading
    pub timestamp: DateTime<Utc>,
    pub producer: Option<String>,
    pub kernel: Option<String>,
    pub framework: Option<String>,
    pub message: Option<String>,
}

impl CountingResult {
    pub fn new(id: impl Into<String>, count: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            count,
            timestamp,
            producer: None,
            kernel: None,
            framework: None,
            message: None,
        }
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Wire shape after field names were lowercased
#[derive(Debug, Deserialize)]
pub(crate) struct WireCountingResult {
    pub id: String,
    pub count: i64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<WireCountingResult> for CountingResult {
    fn from(wire: WireCountingResult) -> Self {
        Self {
            id: wire.id,
            count: wire.count,
            timestamp: wire.timestamp,
            producer: wire.producer,
            kernel: wire.kernel,
            framework: wire.framework,
            message: wire.message,
        }
    }
}

/// ISO 8601 timestamp. Without an offset it is read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;

    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{}`", raw)))
}

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M:%S%.f%:z"];
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Accepts `2024-01-01`, `2024-01-01T10:00`, `2024-01-01T10:00:00.5` and the
/// same with `Z` or `+hh:mm`
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Some(parsed) = OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(raw, format).ok())
    {
        return Some(parsed.with_timezone(&Utc));
    }

    let local = raw.strip_suffix('Z').unwrap_or(raw);
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())
    {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(local, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}
