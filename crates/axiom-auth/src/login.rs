// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! OAuth 2.0 Authorization Code + PKCE login.
//!
//! ```text
//!   login()
//!     │  bind localhost:0, derive redirect uri
//!     │  verifier + S256 challenge, random state
//!     v
//!   LoginFn(url) ──> user agent ──> /oauth/authorize
//!                                        │
//!                                        v
//!   callback listener <── redirect with code + state
//!     │  check method, state, error
//!     │  POST /oauth/token (code + verifier)
//!     v
//!   redirect user agent to /oauth/done, return token
//! ```
//!
//! The listener serves exactly one callback and is shut down before `login`
//! returns.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};
use url::{form_urlencoded, Url};
use uuid::Uuid;

use crate::pkce::{self, Challenge, Method as ChallengeMethod, Verifier};

/// Public client id of Axiom's command line and SDK logins.
pub const DEFAULT_CLIENT_ID: &str = "13c885a8-f46a-4424-82d2-883cf2ba0b26";

const AUTHORIZE_PATH: &str = "oauth/authorize";
const TOKEN_PATH: &str = "oauth/token";
const DONE_PATH: &str = "oauth/done";
const CALLBACK_PATH: &str = "/";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type LoginFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Surfaces the authorization url to the user, e.g. by opening a browser.
///
/// It must not wait for the login to complete.
pub type LoginFn = Arc<dyn Fn(CancellationToken, Url) -> LoginFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to start callback listener: {0}")]
    Listener(#[source] io::Error),
    #[error("login function failed: {0}")]
    LoginFn(#[source] BoxError),
    #[error("callback used method {0}, expected GET")]
    MethodNotAllowed(String),
    #[error("callback state does not match")]
    StateMismatch,
    #[error("callback is missing the authorization code")]
    MissingCode,
    #[error("authorization denied: {error}: {description}")]
    AuthorizationDenied { error: String, description: String },
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("callback server failed: {0}")]
    Server(String),
    #[error("login cancelled")]
    Cancelled,
}

/// Token returned by the token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Base url of the deployment, e.g. `https://app.axiom.co`.
    pub base_url: Url,
    pub client_id: String,
    /// Client used for the token exchange.
    pub http_client: reqwest::Client,
}

impl LoginConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            http_client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Endpoints {
    authorize: Url,
    token: Url,
    done: Url,
}

impl Endpoints {
    fn resolve(base_url: &Url) -> Result<Self, url::ParseError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            authorize: base.join(AUTHORIZE_PATH)?,
            token: base.join(TOKEN_PATH)?,
            done: base.join(DONE_PATH)?,
        })
    }
}

fn authorization_url(
    endpoints: &Endpoints,
    client_id: &str,
    redirect_uri: &Url,
    state: &str,
    challenge: &Challenge,
) -> Url {
    let mut url = endpoints.authorize.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("response_type", "code")
        .append_pair("scope", "*")
        .append_pair("state", state)
        .append_pair("code_challenge", challenge.as_str())
        .append_pair("code_challenge_method", ChallengeMethod::S256.as_str());
    url
}

/// Runs the login flow and returns the access token.
///
/// Cancelling `cancel` aborts the flow, including an in-flight token
/// exchange.
pub async fn login(
    cancel: CancellationToken,
    config: LoginConfig,
    login_fn: LoginFn,
) -> Result<Token, LoginError> {
    let endpoints = Endpoints::resolve(&config.base_url)?;

    let listener = TcpListener::bind(("localhost", 0))
        .await
        .map_err(LoginError::Listener)?;
    let addr = listener.local_addr().map_err(LoginError::Listener)?;
    // Registered loopback redirects are matched on host and path; only the
    // port varies between runs.
    let redirect_uri = Url::parse(&format!("http://localhost:{}{CALLBACK_PATH}", addr.port()))?;

    let verifier = pkce::new_verifier();
    let challenge = pkce::challenge(&verifier, ChallengeMethod::S256);
    let state = Uuid::new_v4().to_string();
    let auth_url = authorization_url(
        &endpoints,
        &config.client_id,
        &redirect_uri,
        &state,
        &challenge,
    );

    let server_cancel = cancel.child_token();
    let (result_tx, mut result_rx) = oneshot::channel();
    let callback = Arc::new(Callback {
        state,
        verifier,
        redirect_uri,
        endpoints,
        client_id: config.client_id,
        http_client: config.http_client,
        result_tx: Mutex::new(Some(result_tx)),
        cancel: server_cancel.clone(),
    });
    let mut server = tokio::spawn(
        serve(listener, callback, server_cancel.clone()).in_current_span(),
    );
    debug!("LOGIN | Waiting for callback on {addr}");

    let mut server_done = false;
    let launched = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LoginError::Cancelled),
        result = login_fn(cancel.clone(), auth_url) => result.map_err(LoginError::LoginFn),
    };
    let outcome = match launched {
        Err(e) => Err(e),
        Ok(()) => tokio::select! {
            result = &mut result_rx => result
                .unwrap_or_else(|_| Err(LoginError::Server("callback handler dropped".to_string()))),
            result = &mut server => {
                server_done = true;
                Err(match result {
                    Ok(Ok(())) => LoginError::Server("callback listener stopped".to_string()),
                    Ok(Err(e)) => LoginError::Server(e.to_string()),
                    Err(e) => LoginError::Server(e.to_string()),
                })
            }
            () = cancel.cancelled() => Err(LoginError::Cancelled),
        },
    };

    server_cancel.cancel();
    if !server_done {
        if let Err(e) = server.await {
            debug!("LOGIN | Callback listener task failed: {e}");
        }
    }
    outcome
}

async fn serve(
    listener: TcpListener,
    callback: Arc<Callback>,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let (stream, _) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            conn = listener.accept() => match conn {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("LOGIN | Transient accept error: {e}");
                    continue;
                }
                Err(e) => {
                    error!("LOGIN | Callback listener failed: {e}");
                    return Err(e);
                }
                Ok(conn) => conn,
            },
        };

        let callback = Arc::clone(&callback);
        tokio::spawn(
            async move {
                let service = service_fn(move |req| {
                    let callback = Arc::clone(&callback);
                    async move { Ok::<_, Infallible>(callback.handle(req).await) }
                });
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .keep_alive(false)
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("LOGIN | Callback connection error: {e}");
                }
            }
            .in_current_span(),
        );
    }
}

type CallbackOutcome = Result<Token, LoginError>;

struct Callback {
    state: String,
    verifier: Verifier,
    redirect_uri: Url,
    endpoints: Endpoints,
    client_id: String,
    http_client: reqwest::Client,
    result_tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    cancel: CancellationToken,
}

impl Callback {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.uri().path() != CALLBACK_PATH {
            return text(StatusCode::NOT_FOUND, "not found");
        }
        let result_tx = self.result_tx.lock().ok().and_then(|mut slot| slot.take());
        let Some(result_tx) = result_tx else {
            return text(StatusCode::GONE, "login already completed");
        };

        let method = req.method().clone();
        let query = req.uri().query().map(str::to_owned);
        drop(req);
        let (response, outcome) = self.process(&method, query.as_deref()).await;
        if result_tx.send(outcome).is_err() {
            debug!("LOGIN | Login returned before the callback completed");
        }
        response
    }

    async fn process(
        &self,
        method: &Method,
        query: Option<&str>,
    ) -> (Response<Full<Bytes>>, CallbackOutcome) {
        if *method != Method::GET {
            return (
                text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
                Err(LoginError::MethodNotAllowed(method.to_string())),
            );
        }

        let query: HashMap<String, String> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let state = query.get("state").map(String::as_str).unwrap_or_default();
        if !bool::from(state.as_bytes().ct_eq(self.state.as_bytes())) {
            return (
                text(StatusCode::BAD_REQUEST, "invalid state"),
                Err(LoginError::StateMismatch),
            );
        }

        if let Some(error) = query.get("error") {
            let description = query.get("error_description").cloned().unwrap_or_default();
            let mut done = self.endpoints.done.clone();
            done.query_pairs_mut()
                .append_pair("error", error)
                .append_pair("error_description", &description);
            return (
                redirect(&done),
                Err(LoginError::AuthorizationDenied {
                    error: error.clone(),
                    description,
                }),
            );
        }

        let Some(code) = query.get("code").filter(|code| !code.is_empty()) else {
            return (
                text(StatusCode::BAD_REQUEST, "missing authorization code"),
                Err(LoginError::MissingCode),
            );
        };

        let exchanged = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LoginError::Cancelled),
            token = self.exchange(code) => token,
        };
        match exchanged {
            Ok(token) => (redirect(&self.endpoints.done), Ok(token)),
            Err(e) => {
                error!("LOGIN | {e}");
                (
                    text(StatusCode::INTERNAL_SERVER_ERROR, "token exchange failed"),
                    Err(e),
                )
            }
        }
    }

    async fn exchange(&self, code: &str) -> Result<Token, LoginError> {
        let response = self
            .http_client
            .post(self.endpoints.token.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("code_verifier", self.verifier.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LoginError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoginError::ExchangeFailed(format!("{status}: {body}")));
        }

        let token: Token = response
            .json()
            .await
            .map_err(|e| LoginError::ExchangeFailed(format!("invalid token response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(LoginError::ExchangeFailed(
                "token response has no access token".to_string(),
            ));
        }
        Ok(token)
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn redirect(location: &Url) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SEE_OTHER;
    match HeaderValue::from_str(location.as_str()) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
        }
        Err(e) => error!("LOGIN | Invalid redirect location {location}: {e}"),
    }
    response
}
