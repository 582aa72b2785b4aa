// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Outcome of a single ingest request. Per-event failures are reported here
/// rather than as an error so callers can inspect what did get in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestStatus {
    pub ingested: u64,
    pub failed: u64,
    pub failures: Vec<IngestFailure>,
    pub processed_bytes: u64,
    pub blocks_created: u32,
    pub wal_length: u32,
}

impl IngestStatus {
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestFailure {
    pub timestamp: String,
    pub error: String,
}

/// Query parameters controlling how the server parses an ingest body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOptions {
    #[serde(rename = "timestamp-field", skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
    #[serde(rename = "timestamp-format", skip_serializing_if = "Option::is_none")]
    pub timestamp_format: Option<String>,
    #[serde(rename = "csv-delimiter", skip_serializing_if = "Option::is_none")]
    pub csv_delimiter: Option<String>,
}
