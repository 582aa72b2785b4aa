// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Authentication primitives for Axiom clients.
//!
//! - [`credential`]: classify and validate bearer credentials and derive the
//!   headers a request needs.
//! - [`pkce`]: RFC 7636 code verifiers and challenges.
//! - [`login`]: OAuth 2.0 Authorization Code + PKCE login via a transient
//!   localhost callback listener.
//! - [`sas`]: shared access signatures, HMAC-signed query capabilities.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod credential;
pub mod login;
pub mod pkce;
pub mod sas;

pub use credential::{Credential, CredentialError, CredentialKind};
pub use login::{login, LoginConfig, LoginError, LoginFn, LoginFuture, Token};
pub use sas::SasError;
