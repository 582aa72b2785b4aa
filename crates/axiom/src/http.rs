// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport shared by the ingest and query APIs.
//!
//! [`HttpClient`] resolves paths against the configured base url, encodes and
//! compresses request bodies, attaches authentication headers and turns
//! non-2xx responses into typed [`Error`]s. It never retries; that decision
//! belongs to the caller.

use std::time::Duration;

use axiom_auth::{sas, Credential};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::{self, Config};
use crate::encoding::{ContentEncoding, ContentType};
use crate::error::{ApiError, Error, ErrorEnvelope};
use crate::event::{self, Event};

pub const USER_AGENT: &str = concat!("axiom-rs/", env!("CARGO_PKG_VERSION"));
pub const TRACE_ID_HEADER: &str = "X-Axiom-Trace-Id";
pub const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// An encoded request body.
#[derive(Debug, Clone)]
pub struct Payload {
    body: Bytes,
    content_type: String,
    encoding: ContentEncoding,
}

impl Payload {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value).map_err(|e| Error::PayloadEncode(e.to_string()))?;
        Ok(Self::raw(body, ContentType::Json.as_str()))
    }

    pub fn ndjson(events: &[Event]) -> Result<Self, Error> {
        Ok(Self::raw(
            event::to_ndjson(events)?,
            ContentType::NdJson.as_str(),
        ))
    }

    /// A body that is sent as is, already encoded with `encoding`.
    pub fn encoded(
        body: impl Into<Bytes>,
        content_type: impl Into<String>,
        encoding: ContentEncoding,
    ) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            encoding,
        }
    }

    /// An uncompressed body of any content type.
    pub fn raw(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::encoded(body, content_type, ContentEncoding::Identity)
    }

    /// Compresses an uncompressed body.
    pub fn compress(self, encoding: ContentEncoding) -> Result<Self, Error> {
        if self.encoding != ContentEncoding::Identity {
            return Err(Error::PayloadEncode(format!(
                "payload is already {:?} encoded",
                self.encoding
            )));
        }
        Ok(Self {
            body: encoding.encode(&self.body)?.into(),
            content_type: self.content_type,
            encoding,
        })
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Url,
    credential: Credential,
    headers: HeaderMap,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;
        Self::with_client(config, client)
    }

    /// Uses a preconfigured `reqwest` client. Its own user agent and timeout
    /// settings are kept.
    pub fn with_client(config: &Config, client: reqwest::Client) -> Result<Self, Error> {
        let credential = config.credential().clone();
        let headers = match credential {
            Credential::Sas(_) => HeaderMap::new(),
            _ => credential.auth_headers(config.org_id(), config.base_url())?,
        };
        Ok(Self {
            client,
            base_url: config.base_url().clone(),
            credential,
            headers,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a relative path such as `v1/datasets/_apl` against the base url.
    pub fn url_for(&self, path: &str) -> Result<Url, Error> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        config::join(&self.base_url, &segments)
    }

    /// Sends a request and fails on any non-2xx status.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        payload: Option<Payload>,
    ) -> Result<Response, Error> {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(self.headers.clone());
        if let Credential::Sas(signature) = &self.credential {
            request = sas::attach(request, signature);
        }
        if let Some(payload) = payload {
            request = request.header(CONTENT_TYPE, payload.content_type.as_str());
            if let Some(encoding) = payload.encoding.header_value() {
                request = request.header(CONTENT_ENCODING, encoding);
            }
            request = request.body(payload.body);
        }

        debug!("HTTP | {method} {}", url.path());
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    /// Sends a request and decodes the JSON response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        payload: Option<Payload>,
    ) -> Result<T, Error> {
        let response = self.request(method, url, payload).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::ResponseDecode(e.to_string()))
    }
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let retry_after = retry_hint(response.headers(), Utc::now());
    let header_trace_id = header_str(response.headers(), TRACE_ID_HEADER);
    let body = response.bytes().await.unwrap_or_default();

    let (message, trace_id) = match serde_json::from_slice::<ErrorEnvelope>(&body) {
        Ok(envelope) if !envelope.message.is_empty() => {
            (envelope.message, envelope.trace_id.or(header_trace_id))
        }
        _ => (
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_lowercase(),
            header_trace_id,
        ),
    };

    Error::from_status(
        ApiError {
            status: status.as_u16(),
            message,
            trace_id,
        },
        retry_after,
    )
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// How long to wait before retrying, from `Retry-After` (seconds or an HTTP
/// date) or `X-RateLimit-Reset` (unix seconds).
pub(crate) fn retry_hint(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            return Some(until(date.with_timezone(&Utc), now));
        }
    }
    let reset = headers
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    DateTime::from_timestamp(reset, 0).map(|reset| until(reset, now))
}

fn until(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};
    use serde_json::{json, Value};

    fn config(url: &str, token: &str) -> Config {
        Config::builder()
            .no_env()
            .url(url)
            .token(token)
            .build()
            .unwrap()
    }

    #[test]
    fn test_url_for() {
        let client = HttpClient::new(&config("https://axiom.example.com/base/", "xaat-1")).unwrap();
        assert_eq!(
            client.url_for("/v1/datasets/_apl").unwrap().as_str(),
            "https://axiom.example.com/base/v1/datasets/_apl"
        );
        assert_eq!(
            client.url_for("v1/user").unwrap().as_str(),
            "https://axiom.example.com/base/v1/user"
        );
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("axiom-rs/"));
        assert_eq!(USER_AGENT.len(), "axiom-rs/".len() + env!("CARGO_PKG_VERSION").len());
    }

    #[test]
    fn test_payload_compress() {
        let payload = Payload::raw("a,b\n1,2\n", ContentType::Csv.as_str())
            .compress(ContentEncoding::Gzip)
            .unwrap();
        assert_eq!(payload.encoding(), ContentEncoding::Gzip);
        assert_eq!(payload.content_type(), "text/csv");
        assert!(payload.compress(ContentEncoding::Zstd).is_err());
    }

    #[test]
    fn test_retry_hint_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_hint(&headers, Utc::now()), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_hint_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:30 GMT"),
        );
        assert_eq!(retry_hint(&headers, now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_hint_rate_limit_reset() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            RATE_LIMIT_RESET_HEADER,
            HeaderValue::from_static("1700000012"),
        );
        assert_eq!(retry_hint(&headers, now), Some(Duration::from_secs(12)));

        headers.insert(
            RATE_LIMIT_RESET_HEADER,
            HeaderValue::from_static("1699999990"),
        );
        assert_eq!(retry_hint(&headers, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_hint_absent() {
        assert_eq!(retry_hint(&HeaderMap::new(), Utc::now()), None);
    }

    #[tokio::test]
    async fn test_request_headers_and_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/echo")
            .match_header("authorization", "Bearer xaat-123")
            .match_header("user-agent", USER_AGENT)
            .match_header("content-type", "application/json")
            .match_header("content-encoding", Matcher::Missing)
            .match_header("x-axiom-org-id", Matcher::Missing)
            .match_body(Matcher::Json(json!({"hello": "world"})))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = HttpClient::new(&config(&server.url(), "xaat-123")).unwrap();
        let url = client.url_for("v1/echo").unwrap();
        let value: Value = client
            .request_json(
                Method::POST,
                url,
                Some(Payload::json(&json!({"hello": "world"})).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/missing")
            .with_status(404)
            .with_body(r#"{"message":"dataset not found","traceId":"abc123"}"#)
            .create_async()
            .await;

        let client = HttpClient::new(&config(&server.url(), "xaat-123")).unwrap();
        let url = client.url_for("v1/missing").unwrap();
        let err = client.request(Method::GET, url, None).await.unwrap_err();

        match err {
            Error::NotFound(api) => {
                assert_eq!(api.status, 404);
                assert_eq!(api.message, "dataset not found");
                assert_eq!(api.trace_id.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_without_envelope() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/boom")
            .with_status(502)
            .with_header(TRACE_ID_HEADER, "trace-from-header")
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let client = HttpClient::new(&config(&server.url(), "xaat-123")).unwrap();
        let url = client.url_for("v1/boom").unwrap();
        let err = client.request(Method::GET, url, None).await.unwrap_err();

        match err {
            Error::Server(api) => {
                assert_eq!(api.status, 502);
                assert_eq!(api.message, "bad gateway");
                assert_eq!(api.trace_id.as_deref(), Some("trace-from-header"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/limited")
            .with_status(429)
            .with_header("retry-after", "5")
            .with_body(r#"{"message":"slow down"}"#)
            .create_async()
            .await;

        let client = HttpClient::new(&config(&server.url(), "xaat-123")).unwrap();
        let url = client.url_for("v1/limited").unwrap();
        let err = client.request(Method::GET, url, None).await.unwrap_err();

        assert!(matches!(
            err,
            Error::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(5)
        ));
        assert_eq!(err.status(), Some(429));
    }

    #[tokio::test]
    async fn test_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/garbage")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = HttpClient::new(&config(&server.url(), "xaat-123")).unwrap();
        let url = client.url_for("v1/garbage").unwrap();
        let result: Result<Value, Error> = client.request_json(Method::GET, url, None).await;

        assert!(matches!(result, Err(Error::ResponseDecode(_))));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let client = HttpClient::new(&config("http://127.0.0.1:1", "xaat-123")).unwrap();
        let url = client.url_for("v1/unreachable").unwrap();
        let err = client.request(Method::GET, url, None).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
    }
}
