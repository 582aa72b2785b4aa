// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Proof Key for Code Exchange (RFC 7636).
//!
//! Verifiers are 32 random bytes encoded as base64url without padding, which
//! always yields 43 octets. Challenges have the same length for both methods.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length of a generated verifier and of every challenge.
pub const ENCODED_LEN: usize = 43;
const RANDOM_BYTES: usize = 32;
const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PkceError {
    #[error("unsupported code challenge method: {0}")]
    UnsupportedMethod(String),
    #[error("code verifier must be between {ENCODED_LEN} and {MAX_VERIFIER_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("code verifier contains an invalid character: {0:?}")]
    InvalidCharacter(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    Plain,
    #[default]
    S256,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A code verifier.
///
/// Generated verifiers are exactly 43 octets; parsed ones may be up to 128.
#[derive(Clone, PartialEq, Eq)]
pub struct Verifier(String);

impl Verifier {
    /// Draws a fresh verifier from the operating system's CSPRNG.
    pub fn new() -> Self {
        let mut bytes = [0u8; RANDOM_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Verifier {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !(ENCODED_LEN..=MAX_VERIFIER_LEN).contains(&s.len()) {
            return Err(PkceError::InvalidLength(s.len()));
        }
        // unreserved characters per RFC 7636 section 4.1
        if let Some(c) = s
            .chars()
            .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')))
        {
            return Err(PkceError::InvalidCharacter(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Verifier(****)")
    }
}

/// A code challenge derived from a [`Verifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates a new random verifier.
pub fn new_verifier() -> Verifier {
    Verifier::new()
}

/// Derives the challenge for `verifier` using `method`.
pub fn challenge(verifier: &Verifier, method: Method) -> Challenge {
    match method {
        Method::Plain => Challenge(verifier.0.clone()),
        Method::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            Challenge(URL_SAFE_NO_PAD.encode(digest))
        }
    }
}

/// Checks in constant time that `challenge` was derived from `verifier`.
pub fn verify(challenge_value: &str, verifier: &Verifier, method: Method) -> bool {
    let expected = challenge(verifier, method);
    expected
        .as_str()
        .as_bytes()
        .ct_eq(challenge_value.as_bytes())
        .into()
}
