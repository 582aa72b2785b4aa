// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Events are free-form JSON objects.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;

/// A single event, a mapping from field name to any JSON value.
pub type Event = Map<String, Value>;

/// Field the server reads the event time from.
pub const TIMESTAMP_FIELD: &str = "_time";

/// Converts any serializable value into an event. Only JSON objects qualify.
pub fn to_event<T: Serialize + ?Sized>(value: &T) -> Result<Event, Error> {
    match serde_json::to_value(value).map_err(|e| Error::PayloadEncode(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(Error::PayloadEncode(format!(
            "event must be a JSON object, got {}",
            kind(&other)
        ))),
    }
}

/// Sets `_time` to `time` formatted as RFC 3339 with nanoseconds.
pub fn set_timestamp(event: &mut Event, time: DateTime<Utc>) {
    event.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::String(time.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
}

/// Serializes events as newline-delimited JSON, one object per line.
pub fn to_ndjson(events: &[Event]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(events.len() * 64);
    for event in events {
        serde_json::to_writer(&mut buf, event).map_err(|e| Error::PayloadEncode(e.to_string()))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
