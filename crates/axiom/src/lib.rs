// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Client for ingesting events into and querying Axiom.
//!
//! ```no_run
//! use axiom::{event, Client, IngesterConfig};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), axiom::Error> {
//! let client = Client::from_env()?;
//! let ingester = client.ingester("logs", IngesterConfig::default())?;
//! ingester
//!     .enqueue(event::to_event(&json!({"severity": "info", "message": "hello"}))?)
//!     .await?;
//! let summary = ingester.close().await;
//! assert_eq!(summary.dropped, 0);
//! # Ok(())
//! # }
//! ```
//!
//! Diagnostics are emitted with `tracing`; install a subscriber to see them.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod apl;
pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod event;
pub mod http;
pub mod ingest;
pub mod ingester;
pub mod query;

pub use axiom_auth as auth;
pub use client::Client;
pub use config::{Config, ConfigBuilder};
pub use encoding::{ContentEncoding, ContentType};
pub use error::{ApiError, Error};
pub use event::Event;
pub use ingest::{IngestOptions, IngestStatus};
pub use ingester::{CloseSummary, IngestTransport, Ingester, IngesterConfig, IngesterState};
pub use query::{QueryOptions, QueryResult};
