// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Shared access signatures.
//!
//! A signature delegates bounded query rights (one dataset, one APL filter, a
//! time window and an expiry) to a third party. It is a form-urlencoded query
//! string whose `tk` value is an HMAC-SHA-256 over the canonical payload:
//!
//! ```text
//! organization_id \n dataset \n filter \n min_start_time \n max_end_time \n expiry_time
//! ```
//!
//! Both sides must agree on the field order and the short keys below, since
//! any change silently breaks verification.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Maximum length of an encoded signature, in bytes.
pub const MAX_SIGNATURE_LEN: usize = 1023;

const KEY_ORGANIZATION_ID: &str = "oi";
const KEY_DATASET: &str = "dt";
const KEY_FILTER: &str = "fl";
const KEY_MIN_START_TIME: &str = "mst";
const KEY_MAX_END_TIME: &str = "met";
const KEY_EXPIRY_TIME: &str = "exp";
const KEY_TOKEN: &str = "tk";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SasError {
    #[error("invalid signing key: expected a UUID or a base64 encoded key")]
    InvalidKey,
    #[error("invalid shared access signature parameters: missing {0}")]
    MissingParam(&'static str),
    #[error("invalid shared access signature: missing token")]
    MissingToken,
    #[error("invalid shared access signature: token does not match")]
    InvalidSignature,
    #[error("shared access signature too long: {0} bytes exceeds the maximum of {MAX_SIGNATURE_LEN}")]
    TooLong(usize),
}

/// The parameters a shared access signature grants access to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pub organization_id: String,
    pub dataset: String,
    /// APL predicate applied to every query.
    pub filter: String,
    /// Earliest start time queries may use (APL time expression).
    pub min_start_time: String,
    /// Latest end time queries may use (APL time expression).
    pub max_end_time: String,
    /// When the signature stops being valid (APL time expression).
    pub expiry_time: String,
}

impl Params {
    pub fn validate(&self) -> Result<(), SasError> {
        let fields = [
            ("organization id", &self.organization_id),
            ("dataset", &self.dataset),
            ("filter", &self.filter),
            ("minimum start time", &self.min_start_time),
            ("maximum end time", &self.max_end_time),
            ("expiry time", &self.expiry_time),
        ];
        match fields.iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(SasError::MissingParam(name)),
            None => Ok(()),
        }
    }

    /// The canonical string the token is computed over.
    pub fn payload(&self) -> String {
        [
            self.organization_id.as_str(),
            self.dataset.as_str(),
            self.filter.as_str(),
            self.min_start_time.as_str(),
            self.max_end_time.as_str(),
            self.expiry_time.as_str(),
        ]
        .join("\n")
    }

    /// Computes the shared access token over these parameters.
    pub fn sign(&self, key: &str) -> Result<String, SasError> {
        let mac = self.mac(&signing_key(key)?)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn mac(&self, key: &[u8]) -> Result<HmacSha256, SasError> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SasError::InvalidKey)?;
        mac.update(self.payload().as_bytes());
        Ok(mac)
    }
}

/// Decoded signature: the parameters and the token that signs them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub params: Params,
    pub token: String,
}

impl Options {
    pub fn validate(&self) -> Result<(), SasError> {
        self.params.validate()?;
        if self.token.is_empty() {
            return Err(SasError::MissingToken);
        }
        Ok(())
    }

    /// URL-encodes the options into a signature string.
    pub fn encode(&self) -> Result<String, SasError> {
        // keys in lexical order so a given signature always encodes the same way
        let encoded = form_urlencoded::Serializer::new(String::new())
            .append_pair(KEY_DATASET, &self.params.dataset)
            .append_pair(KEY_EXPIRY_TIME, &self.params.expiry_time)
            .append_pair(KEY_FILTER, &self.params.filter)
            .append_pair(KEY_MAX_END_TIME, &self.params.max_end_time)
            .append_pair(KEY_MIN_START_TIME, &self.params.min_start_time)
            .append_pair(KEY_ORGANIZATION_ID, &self.params.organization_id)
            .append_pair(KEY_TOKEN, &self.token)
            .finish();
        if encoded.len() > MAX_SIGNATURE_LEN {
            return Err(SasError::TooLong(encoded.len()));
        }
        Ok(encoded)
    }
}

/// Resolves the HMAC key bytes from a UUID or a standard base64 string.
fn signing_key(key: &str) -> Result<Vec<u8>, SasError> {
    let key = key.trim();
    if let Ok(uuid) = Uuid::try_parse(key) {
        return Ok(uuid.as_bytes().to_vec());
    }
    match STANDARD.decode(key) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(SasError::InvalidKey),
    }
}

/// Creates a signature granting `params`, signed with `key`.
pub fn create(key: &str, params: &Params) -> Result<String, SasError> {
    params.validate()?;
    let token = params.sign(key)?;
    Options {
        params: params.clone(),
        token,
    }
    .encode()
}

/// Parses a signature into its options without checking the token.
pub fn decode(signature: &str) -> Result<Options, SasError> {
    let mut options = Options::default();
    for (key, value) in form_urlencoded::parse(signature.as_bytes()) {
        let slot = match key.as_ref() {
            KEY_ORGANIZATION_ID => &mut options.params.organization_id,
            KEY_DATASET => &mut options.params.dataset,
            KEY_FILTER => &mut options.params.filter,
            KEY_MIN_START_TIME => &mut options.params.min_start_time,
            KEY_MAX_END_TIME => &mut options.params.max_end_time,
            KEY_EXPIRY_TIME => &mut options.params.expiry_time,
            KEY_TOKEN => &mut options.token,
            _ => continue,
        };
        if slot.is_empty() {
            *slot = value.into_owned();
        }
    }
    options.validate()?;
    Ok(options)
}

/// Checks that `signature` was created with `key`.
///
/// The token is recomputed over the decoded parameters and compared in
/// constant time.
pub fn verify(key: &str, signature: &str) -> Result<Options, SasError> {
    let options = decode(signature)?;
    let token = URL_SAFE_NO_PAD
        .decode(options.token.as_bytes())
        .map_err(|_| SasError::InvalidSignature)?;
    options
        .params
        .mac(&signing_key(key)?)?
        .verify_slice(&token)
        .map_err(|_| SasError::InvalidSignature)?;
    Ok(options)
}

/// Authenticates a query request with a shared access signature.
///
/// The server recognizes signatures by their format, so the signature is sent
/// as the bearer credential.
pub fn attach(request: reqwest::RequestBuilder, signature: &str) -> reqwest::RequestBuilder {
    request.bearer_auth(signature)
}
