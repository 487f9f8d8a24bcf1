//! Serde helpers for local clock times on the wire (`HH:MM`).
//!
//! Parsing also accepts `HH:MM:SS` since some clients send seconds.

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serializer};

const WIRE_FORMAT: &str = "%H:%M";

pub fn parse(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, WIRE_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn format(time: &NaiveTime) -> String {
    time.format(WIRE_FORMAT).to_string()
}

pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&format(time)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid clock time '{value}'"))),
        }
    }
}

/// Patch fields: absent leaves the time alone, `null` clears it. Pair with
/// `#[serde(default, skip_serializing_if = "Option::is_none")]`.
pub mod patch {
    use super::*;

    pub fn serialize<S>(value: &Option<Option<NaiveTime>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => option::serialize(inner, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<NaiveTime>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        option::deserialize(deserializer).map(Some)
    }
}
