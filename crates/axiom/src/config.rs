// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Client configuration.
//!
//! Values are merged from three layers, lowest priority first: built-in
//! defaults, `AXIOM_*` environment variables and explicit [`ConfigBuilder`]
//! calls. [`ConfigBuilder::no_env`] drops the environment layer entirely.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axiom_auth::{Credential, CredentialError};
use url::Url;

use crate::encoding::ContentEncoding;
use crate::error::Error;

pub const DEFAULT_URL: &str = "https://api.axiom.co";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_URL: &str = "AXIOM_URL";
pub const ENV_TOKEN: &str = "AXIOM_TOKEN";
pub const ENV_ORG_ID: &str = "AXIOM_ORG_ID";
pub const ENV_DATASET: &str = "AXIOM_DATASET";
pub const ENV_EDGE_URL: &str = "AXIOM_EDGE_URL";
pub const ENV_EDGE_REGION: &str = "AXIOM_EDGE_REGION";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where ingest and query requests go when they bypass the main API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge {
    /// A full URL. A non-root path is used verbatim for ingest.
    Url(Url),
    /// A bare region domain such as `eu-central-1.aws.edge.axiom.co`.
    Region(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    base_url: Url,
    credential: Credential,
    org_id: Option<String>,
    dataset: Option<String>,
    edge: Option<Edge>,
    timeout: Duration,
    content_encoding: ContentEncoding,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Configuration from the environment alone.
    pub fn from_env() -> Result<Self, Error> {
        ConfigBuilder::default().build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref()
    }

    /// Default dataset, from `AXIOM_DATASET` or [`ConfigBuilder::dataset`].
    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    pub fn edge(&self) -> Option<&Edge> {
        self.edge.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        self.content_encoding
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_http_scheme("base url", &self.base_url)?;
        if self.credential.requires_org_id(&self.base_url)
            && self.org_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(CredentialError::OrgIdMissing.into());
        }
        match &self.edge {
            Some(Edge::Url(url)) => check_http_scheme("edge url", url)?,
            Some(Edge::Region(region)) => {
                if region.is_empty() || region.contains('/') || region.contains(':') {
                    return Err(Error::ConfigInvalid(format!(
                        "edge region must be a bare domain, got '{region}'"
                    )));
                }
            }
            None => {}
        }
        if self.timeout.is_zero() {
            return Err(Error::ConfigInvalid(
                "timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// URL events for `dataset` are posted to.
    pub fn ingest_url(&self, dataset: &str) -> Result<Url, Error> {
        match &self.edge {
            Some(Edge::Url(url)) if !is_root(url) => Ok(url.clone()),
            Some(Edge::Url(url)) => join(url, &["v1", "ingest", dataset]),
            Some(Edge::Region(region)) => {
                join(&region_url(region)?, &["v1", "ingest", dataset])
            }
            None => join(&self.base_url, &["v1", "datasets", dataset, "ingest"]),
        }
    }

    /// URL APL queries are posted to.
    pub fn query_url(&self) -> Result<Url, Error> {
        match &self.edge {
            Some(Edge::Url(url)) => {
                let mut origin = url.clone();
                origin.set_path("/");
                origin.set_query(None);
                join(&origin, &["v1", "query", "_apl"])
            }
            Some(Edge::Region(region)) => join(&region_url(region)?, &["v1", "query", "_apl"]),
            None => join(&self.base_url, &["v1", "datasets", "_apl"]),
        }
    }
}

fn check_http_scheme(what: &str, url: &Url) -> Result<(), Error> {
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(Error::ConfigInvalid(format!(
            "{what} must be an absolute http(s) url, got '{url}'"
        ))),
    }
}

fn is_root(url: &Url) -> bool {
    url.path().is_empty() || url.path() == "/"
}

fn region_url(region: &str) -> Result<Url, Error> {
    Ok(Url::parse(&format!("https://{region}"))?)
}

/// Appends percent-encoded path segments to `base`, keeping any base path.
pub(crate) fn join(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| Error::ConfigInvalid(format!("'{base}' cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Builds a [`Config`]. Explicit calls win over the environment.
#[derive(Default)]
pub struct ConfigBuilder {
    url: Option<String>,
    token: Option<String>,
    org_id: Option<String>,
    dataset: Option<String>,
    edge_url: Option<String>,
    edge_region: Option<String>,
    timeout: Option<Duration>,
    content_encoding: Option<ContentEncoding>,
    no_env: bool,
    env: Option<EnvLookup>,
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("org_id", &self.org_id)
            .field("dataset", &self.dataset)
            .field("edge_url", &self.edge_url)
            .field("edge_region", &self.edge_region)
            .field("no_env", &self.no_env)
            .finish_non_exhaustive()
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    #[must_use]
    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    #[must_use]
    pub fn edge_url(mut self, url: impl Into<String>) -> Self {
        self.edge_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn edge_region(mut self, region: impl Into<String>) -> Self {
        self.edge_region = Some(region.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = Some(encoding);
        self
    }

    /// Ignore `AXIOM_*` environment variables.
    #[must_use]
    pub fn no_env(mut self) -> Self {
        self.no_env = true;
        self
    }

    /// Replaces the process environment as the source of `AXIOM_*` values.
    #[must_use]
    pub fn env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Some(Arc::new(lookup));
        self
    }

    fn from_env(&self, key: &str) -> Option<String> {
        if self.no_env {
            return None;
        }
        let value = match &self.env {
            Some(lookup) => lookup(key),
            None => env::var(key).ok(),
        };
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn build(self) -> Result<Config, Error> {
        let url = self
            .url
            .clone()
            .or_else(|| self.from_env(ENV_URL))
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let base_url = Url::parse(&url)
            .map_err(|e| Error::ConfigInvalid(format!("invalid url '{url}': {e}")))?;

        let token = self
            .token
            .clone()
            .or_else(|| self.from_env(ENV_TOKEN))
            .ok_or(CredentialError::Missing)?;
        let credential = Credential::parse(&token)?;

        let org_id = self.org_id.clone().or_else(|| self.from_env(ENV_ORG_ID));
        let dataset = self.dataset.clone().or_else(|| self.from_env(ENV_DATASET));

        let edge_url = self.edge_url.clone().or_else(|| self.from_env(ENV_EDGE_URL));
        let edge_region = self
            .edge_region
            .clone()
            .or_else(|| self.from_env(ENV_EDGE_REGION));
        let edge = match (edge_url, edge_region) {
            (Some(url), _) => Some(Edge::Url(Url::parse(&url).map_err(|e| {
                Error::ConfigInvalid(format!("invalid edge url '{url}': {e}"))
            })?)),
            (None, Some(region)) => Some(Edge::Region(region)),
            (None, None) => None,
        };

        let config = Config {
            base_url,
            credential,
            org_id,
            dataset,
            edge,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            content_encoding: self.content_encoding.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}
