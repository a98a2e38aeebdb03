//! Tolerant extraction of typed fields from TV replies.
//!
//! Replies are loosely structured and fields move around between firmware
//! versions, so lookups search the whole payload. A missing or malformed field
//! is a [`ParseAnomaly`], which callers fold into an "unknown" state.

use crate::model::InputSource;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAnomaly {
    MissingField(&'static str),
    NotNumeric(String),
}

impl fmt::Display for ParseAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "field {field} not present"),
            Self::NotNumeric(raw) => write!(f, "channel number {raw:?} is not numeric"),
        }
    }
}

impl std::error::Error for ParseAnomaly {}

/// `channelNumber` as a digit string, from anywhere in the payload.
pub fn channel_number(payload: Option<&Value>) -> Result<String, ParseAnomaly> {
    let raw = payload
        .and_then(|p| find_string(p, "channelNumber"))
        .ok_or(ParseAnomaly::MissingField("channelNumber"))?;

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseAnomaly::NotNumeric(raw.to_string()));
    }
    Ok(raw.to_string())
}

/// Foreground application id. A top-level `appId` wins over nested ones.
pub fn foreground_app_id(payload: Option<&Value>) -> Result<String, ParseAnomaly> {
    payload
        .and_then(|p| find_string(p, "appId"))
        .map(str::to_string)
        .ok_or(ParseAnomaly::MissingField("appId"))
}

/// Input source shown by the foreground app, `None` when the app is not an input.
pub fn input_source(payload: Option<&Value>) -> Option<InputSource> {
    foreground_app_id(payload)
        .ok()
        .and_then(|app_id| InputSource::from_app_id(&app_id))
}

/// True for a reply that actually says something: not null, not `{}` / `[]` / `""`.
pub fn is_meaningful(payload: Option<&Value>) -> bool {
    match payload {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Breadth-first: shallow matches are preferred over deeply nested ones.
fn find_string<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    let mut queue = vec![value];
    while !queue.is_empty() {
        let mut next = Vec::new();
        for node in queue {
            match node {
                Value::Object(map) => {
                    if let Some(Value::String(found)) = map.get(key) {
                        return Some(found.as_str());
                    }
                    next.extend(map.values());
                }
                Value::Array(items) => next.extend(items.iter()),
                _ => {}
            }
        }
        queue = next;
    }
    None
}
