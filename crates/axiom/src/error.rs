// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use axiom_auth::{CredentialError, SasError};
use serde::Deserialize;
use thiserror::Error;

/// Structured error returned by the Axiom API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub trace_id: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)?;
        if let Some(trace_id) = &self.trace_id {
            write!(f, " (trace id {trace_id})")?;
        }
        Ok(())
    }
}

/// Error envelope as sent by the server.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "traceId")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Signature(#[from] SasError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unauthorized: {0}")]
    Unauthorized(ApiError),
    #[error("forbidden: {0}")]
    Forbidden(ApiError),
    #[error("not found: {0}")]
    NotFound(ApiError),
    #[error("conflict: {0}")]
    Conflict(ApiError),
    #[error("rate limited: {error}")]
    RateLimited {
        error: ApiError,
        retry_after: Option<Duration>,
    },
    #[error("server error: {0}")]
    Server(ApiError),
    #[error("unexpected response: {0}")]
    Status(ApiError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to encode payload: {0}")]
    PayloadEncode(String),
    #[error("failed to decode response: {0}")]
    ResponseDecode(String),
    #[error("ingester is closed")]
    IngesterClosed,
    #[error("ingester queue is full")]
    QueueFull,
    #[error("operation did not complete within {0:?}")]
    DrainTimeout(Duration),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Maps a non-2xx status to its error kind.
    pub(crate) fn from_status(error: ApiError, retry_after: Option<Duration>) -> Self {
        match error.status {
            401 => Self::Unauthorized(error),
            403 => Self::Forbidden(error),
            404 => Self::NotFound(error),
            409 => Self::Conflict(error),
            429 => Self::RateLimited { error, retry_after },
            500..=599 => Self::Server(error),
            _ => Self::Status(error),
        }
    }

    /// HTTP status code of the response that caused the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(e)
            | Self::Forbidden(e)
            | Self::NotFound(e)
            | Self::Conflict(e)
            | Self::Server(e)
            | Self::Status(e)
            | Self::RateLimited { error: e, .. } => Some(e.status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
