// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Request body content types and compression.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Error;

/// Default zstd level, matching the `zstd` crate's own default.
const ZSTD_LEVEL: i32 = 3;

/// Content type of an ingest request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    Json,
    #[default]
    NdJson,
    Csv,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::NdJson => "application/x-ndjson",
            Self::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression applied to a request body before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    Identity,
    #[default]
    Gzip,
    Zstd,
}

impl ContentEncoding {
    /// Value of the `Content-Encoding` header, `None` for uncompressed bodies.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
            Self::Zstd => Some("zstd"),
        }
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::PayloadEncode(format!("gzip: {e}")))?;
                encoder
                    .finish()
                    .map_err(|e| Error::PayloadEncode(format!("gzip: {e}")))
            }
            Self::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| Error::PayloadEncode(format!("zstd: {e}"))),
        }
    }
}

impl FromStr for ContentEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "identity" | "none" => Ok(Self::Identity),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::ConfigInvalid(format!(
                "unsupported content encoding '{other}'"
            ))),
        }
    }
}
