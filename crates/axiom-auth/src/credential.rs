// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Bearer credential model.
//!
//! A credential is classified purely from its shape, without contacting the
//! server: API tokens start with `xaat-`, personal tokens with `xapt-`, and
//! anything that decodes as a shared access signature is a SAS.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use thiserror::Error;
use url::Url;

use crate::sas;

/// Prefix of API tokens.
pub const API_TOKEN_PREFIX: &str = "xaat-";
/// Prefix of personal tokens.
pub const PERSONAL_TOKEN_PREFIX: &str = "xapt-";
/// Header carrying the organization id for personal tokens on the cloud.
pub const ORG_ID_HEADER: &str = "X-Axiom-Org-Id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential: {0}")]
    Invalid(String),
    #[error("organization id is required for personal tokens on the cloud endpoint")]
    OrgIdMissing,
    #[error("invalid header value for {0}")]
    Header(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Api,
    Personal,
    Sas,
    Invalid,
}

/// Classifies a raw token without validating it any further.
pub fn classify(token: &str) -> CredentialKind {
    if token.starts_with(API_TOKEN_PREFIX) {
        CredentialKind::Api
    } else if token.starts_with(PERSONAL_TOKEN_PREFIX) {
        CredentialKind::Personal
    } else if !token.is_empty() && sas::decode(token).is_ok() {
        CredentialKind::Sas
    } else {
        CredentialKind::Invalid
    }
}

/// Rejects empty tokens, tokens with an unknown prefix and malformed
/// shared access signatures.
pub fn validate(token: &str) -> Result<(), CredentialError> {
    Credential::parse(token).map(|_| ())
}

/// Returns true when the url points at the Axiom cloud.
pub fn is_cloud_url(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host == "axiom.co" || host.ends_with(".axiom.co"))
}

/// A validated bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Api(String),
    Personal(String),
    Sas(String),
}

impl Credential {
    pub fn parse(token: &str) -> Result<Self, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        match classify(token) {
            CredentialKind::Api if token.len() > API_TOKEN_PREFIX.len() => {
                Ok(Self::Api(token.to_string()))
            }
            CredentialKind::Personal if token.len() > PERSONAL_TOKEN_PREFIX.len() => {
                Ok(Self::Personal(token.to_string()))
            }
            CredentialKind::Sas => Ok(Self::Sas(token.to_string())),
            CredentialKind::Api | CredentialKind::Personal => Err(CredentialError::Invalid(
                "token has a prefix but no secret".to_string(),
            )),
            CredentialKind::Invalid => Err(CredentialError::Invalid(
                "token is neither an API token, a personal token nor a shared access signature"
                    .to_string(),
            )),
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Api(_) => CredentialKind::Api,
            Self::Personal(_) => CredentialKind::Personal,
            Self::Sas(_) => CredentialKind::Sas,
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Self::Api(token) | Self::Personal(token) | Self::Sas(token) => token,
        }
    }

    /// Whether requests against `base_url` need an organization id header.
    pub fn requires_org_id(&self, base_url: &Url) -> bool {
        matches!(self, Self::Personal(_)) && is_cloud_url(base_url)
    }

    /// Builds the authentication headers for a request against `base_url`.
    ///
    /// `Authorization: Bearer <token>` is always set. `X-Axiom-Org-Id` is set
    /// when, and only when, a personal token talks to the cloud endpoint.
    pub fn auth_headers(
        &self,
        org_id: Option<&str>,
        base_url: &Url,
    ) -> Result<HeaderMap, CredentialError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.secret()))
            .map_err(|_| CredentialError::Header("Authorization"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if self.requires_org_id(base_url) {
            let org_id = org_id
                .filter(|id| !id.is_empty())
                .ok_or(CredentialError::OrgIdMissing)?;
            headers.insert(
                ORG_ID_HEADER,
                HeaderValue::from_str(org_id).map_err(|_| CredentialError::Header(ORG_ID_HEADER))?,
            );
        }
        Ok(headers)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{:?}({self})", self.kind())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(_) => write!(f, "{API_TOKEN_PREFIX}****"),
            Self::Personal(_) => write!(f, "{PERSONAL_TOKEN_PREFIX}****"),
            Self::Sas(_) => write!(f, "sas:****"),
        }
    }
}

impl std::str::FromStr for Credential {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
