use chrono::{DateTime, NaiveDateTime, Utc};

/// Fixed textual format used for every timestamp written to a backing file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a persisted timestamp. An empty string means "unset".
pub fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, PARSE_FORMAT) {
        return Ok(Some(naive.and_utc()));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|err| format!("invalid timestamp '{}': {}", trimmed, err))
}

/// Serde adapter for `Option<DateTime<Utc>>` fields stored as text.
pub mod optional_timestamp {
    use super::{format_timestamp, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timestamp) => serializer.serialize_str(&format_timestamp(timestamp)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(text) => parse_timestamp(&text).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
