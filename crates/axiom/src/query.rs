// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Time bounds applied on top of the APL query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest<'a> {
    pub apl: &'a str,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "rfc3339")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "rfc3339")]
    pub end_time: Option<DateTime<Utc>>,
}

impl<'a> QueryRequest<'a> {
    pub fn new(apl: &'a str, options: &QueryOptions) -> Self {
        Self {
            apl,
            start_time: options.start_time,
            end_time: options.end_time,
        }
    }
}

fn rfc3339<S: Serializer>(
    time: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match time {
        Some(time) => {
            serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        None => serializer.serialize_none(),
    }
}

/// Raw result of an APL query in the legacy format.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult(Value);

impl QueryResult {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Matched rows, when the result carries any.
    pub fn matches(&self) -> &[Value] {
        self.0
            .get("matches")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}
