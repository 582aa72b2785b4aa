// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::encoding::{ContentEncoding, ContentType};
use crate::error::Error;
use crate::event::Event;
use crate::http::{HttpClient, Payload};
use crate::ingest::{IngestOptions, IngestStatus};
use crate::ingester::{IngestTransport, Ingester, IngesterConfig};
use crate::query::{QueryOptions, QueryRequest, QueryResult};

/// Client for the Axiom ingest and query APIs. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Client {
    http: HttpClient,
    config: Arc<Config>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = HttpClient::new(&config)?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Client configured from `AXIOM_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(Config::from_env()?)
    }

    pub fn with_http_client(config: Config, client: reqwest::Client) -> Result<Self, Error> {
        let http = HttpClient::with_client(&config, client)?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Ingests a body that is already encoded with `encoding`.
    pub async fn ingest(
        &self,
        dataset: &str,
        body: impl Into<Bytes>,
        content_type: ContentType,
        encoding: ContentEncoding,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error> {
        let payload = Payload::encoded(body, content_type.as_str(), encoding);
        self.send_ingest(dataset, payload, options).await
    }

    /// Ingests events as NDJSON, compressed with the configured encoding.
    pub async fn ingest_events(
        &self,
        dataset: &str,
        events: &[Event],
    ) -> Result<IngestStatus, Error> {
        self.ingest_events_with(dataset, events, self.config.content_encoding())
            .await
    }

    async fn ingest_events_with(
        &self,
        dataset: &str,
        events: &[Event],
        encoding: ContentEncoding,
    ) -> Result<IngestStatus, Error> {
        let payload = Payload::ndjson(events)?.compress(encoding)?;
        self.send_ingest(dataset, payload, &IngestOptions::default())
            .await
    }

    async fn send_ingest(
        &self,
        dataset: &str,
        payload: Payload,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error> {
        if dataset.is_empty() {
            return Err(Error::ConfigInvalid("dataset must not be empty".to_string()));
        }
        let mut url = self.config.ingest_url(dataset)?;
        append_query(&mut url, options)?;

        debug!(
            "INGEST | Sending {} bytes to dataset {dataset}",
            payload.len()
        );
        self.http
            .request_json(Method::POST, url, Some(payload))
            .await
    }

    /// Runs an APL query and returns the raw legacy-format result.
    pub async fn query(&self, apl: &str, options: &QueryOptions) -> Result<QueryResult, Error> {
        let mut url = self.config.query_url()?;
        url.query_pairs_mut().append_pair("format", "legacy");

        let payload = Payload::json(&QueryRequest::new(apl, options))?;
        let value = self
            .http
            .request_json(Method::POST, url, Some(payload))
            .await?;
        Ok(QueryResult::new(value))
    }

    /// Starts a batching ingester for `dataset` that sends through this client.
    pub fn ingester(&self, dataset: &str, config: IngesterConfig) -> Result<Ingester, Error> {
        Ingester::start(self.clone(), dataset, config)
    }
}

/// Writes the set options as query parameters, named by their serde renames.
fn append_query(url: &mut url::Url, options: &IngestOptions) -> Result<(), Error> {
    let Value::Object(params) =
        serde_json::to_value(options).map_err(|e| Error::PayloadEncode(e.to_string()))?
    else {
        return Ok(());
    };
    if params.is_empty() {
        return Ok(());
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in &params {
        if let Value::String(value) = value {
            pairs.append_pair(key, value);
        }
    }
    Ok(())
}

#[async_trait]
impl IngestTransport for Client {
    async fn ingest_batch(
        &self,
        dataset: &str,
        events: Vec<Event>,
        encoding: ContentEncoding,
    ) -> Result<IngestStatus, Error> {
        self.ingest_events_with(dataset, &events, encoding).await
    }
}
