// src/ingest/budget.rs
//! Per-source HTTP client with byte ceilings and conditional requests.
//!
//! Counters and validators live on the instance; the collector reads them
//! back after the adapter returns and persists them itself.

use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::error::BudgetExceeded;
use crate::state::Validator;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Per-request options. `cache_key` defaults to the URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions<'a> {
    pub kind: &'a str,
    pub cache_key: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub not_modified: bool,
    pub status: u16,
    pub headers: HeaderMap,
    pub data: Vec<u8>,
    pub bytes: u64,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Debug)]
pub struct BudgetedClient {
    http: Client,
    source_id: String,
    user_agent: Option<String>,
    source_limit: u64,
    global_limit: u64,
    global_used_before: u64,
    bytes_used: u64,
    validators: BTreeMap<String, Validator>,
    patch: BTreeMap<String, Validator>,
    invalidated: BTreeSet<String>,
}

impl BudgetedClient {
    /// `global_used_before` is what earlier sources of this run consumed.
    pub fn new(
        http: Client,
        source_id: &str,
        source_limit: u64,
        global_limit: u64,
        global_used_before: u64,
        validators: BTreeMap<String, Validator>,
    ) -> Self {
        Self {
            http,
            source_id: source_id.to_string(),
            user_agent: None,
            source_limit,
            global_limit,
            global_used_before,
            bytes_used: 0,
            validators,
            patch: BTreeMap::new(),
            invalidated: BTreeSet::new(),
        }
    }

    pub fn with_user_agent(mut self, ua: Option<String>) -> Self {
        self.user_agent = ua;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn source_limit(&self) -> u64 {
        self.source_limit
    }

    /// Validators updated during this client's lifetime.
    pub fn validator_patch(&self) -> &BTreeMap<String, Validator> {
        &self.patch
    }

    /// Forget the validators for `key` so the next run refetches it in
    /// full. Adapters call this when they could not keep everything a
    /// response carried.
    pub fn invalidate(&mut self, key: &str) {
        self.validators.remove(key);
        self.patch.remove(key);
        self.invalidated.insert(key.to_string());
    }

    pub fn invalidated(&self) -> &BTreeSet<String> {
        &self.invalidated
    }

    fn global_used(&self) -> u64 {
        self.global_used_before.saturating_add(self.bytes_used)
    }

    pub async fn request(
        &mut self,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<FetchResponse, FetchError> {
        let key = opts.cache_key.unwrap_or(url).to_string();

        if self.global_used() >= self.global_limit {
            return Err(BudgetExceeded::global(
                &self.source_id,
                format!(
                    "global budget exhausted before request ({} >= {})",
                    self.global_used(),
                    self.global_limit
                ),
            )
            .into());
        }

        let mut req = self.http.get(url);
        if let Some(ua) = &self.user_agent {
            req = req.header(USER_AGENT, ua);
        }
        if let Some(v) = self.validators.get(&key) {
            if let Some(etag) = &v.etag {
                req = req.header(IF_NONE_MATCH, etag);
            }
            if let Some(lm) = &v.last_modified {
                req = req.header(IF_MODIFIED_SINCE, lm);
            }
        }

        let t0 = std::time::Instant::now();
        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(target: "ingest", source = %self.source_id, kind = opts.kind, %url, "not modified");
            counter!("collector_not_modified_total").increment(1);
            return Ok(FetchResponse {
                not_modified: true,
                status: status.as_u16(),
                headers: resp.headers().clone(),
                data: Vec::new(),
                bytes: 0,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let headers = resp.headers().clone();
        let data = resp.bytes().await?.to_vec();
        let n = data.len() as u64;
        histogram!("collector_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        if self.bytes_used.saturating_add(n) > self.source_limit {
            return Err(BudgetExceeded::source(
                &self.source_id,
                format!("{} + {} > {}", self.bytes_used, n, self.source_limit),
            )
            .into());
        }
        if self.global_used().saturating_add(n) > self.global_limit {
            return Err(BudgetExceeded::global(
                &self.source_id,
                format!("{} + {} > {}", self.global_used(), n, self.global_limit),
            )
            .into());
        }
        self.bytes_used += n;
        counter!("collector_bytes_total").increment(n);

        let fresh = Validator {
            etag: header_str(&headers, ETAG),
            last_modified: header_str(&headers, LAST_MODIFIED),
        };
        if !fresh.is_empty() {
            self.validators.insert(key.clone(), fresh.clone());
            self.invalidated.remove(&key);
            self.patch.insert(key, fresh);
        }

        tracing::debug!(target: "ingest", source = %self.source_id, kind = opts.kind, %url, bytes = n, "fetched");
        Ok(FetchResponse {
            not_modified: false,
            status: status.as_u16(),
            headers,
            data,
            bytes: n,
        })
    }
}

fn header_str(h: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    h.get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BudgetScope;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(source_limit: u64, global_limit: u64, used: u64) -> BudgetedClient {
        BudgetedClient::new(Client::new(), "src", source_limit, global_limit, used, BTreeMap::new())
    }

    #[tokio::test]
    async fn charges_bytes_and_records_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("0123456789")
                    .insert_header("ETag", "\"v1\""),
            )
            .mount(&server)
            .await;

        let mut c = client(100, 1_000, 0);
        let url = format!("{}/feed", server.uri());
        let resp = c.request(&url, RequestOptions::default()).await.unwrap();
        assert!(!resp.not_modified);
        assert_eq!(resp.bytes, 10);
        assert_eq!(c.bytes_used(), 10);
        assert_eq!(c.validator_patch()[&url].etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn not_modified_is_free_and_sends_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let url = format!("{}/feed", server.uri());
        let mut seed = BTreeMap::new();
        seed.insert(
            url.clone(),
            Validator {
                etag: Some("\"v1\"".into()),
                last_modified: None,
            },
        );
        let mut c = BudgetedClient::new(Client::new(), "src", 5, 5, 0, seed);
        let resp = c.request(&url, RequestOptions::default()).await.unwrap();
        assert!(resp.not_modified);
        assert_eq!(resp.bytes, 0);
        assert_eq!(c.bytes_used(), 0);
    }

    #[tokio::test]
    async fn over_source_limit_is_not_charged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(50)))
            .mount(&server)
            .await;

        let mut c = client(40, 1_000, 0);
        let err = c
            .request(&server.uri(), RequestOptions::default())
            .await
            .unwrap_err();
        match err {
            FetchError::Budget(b) => assert_eq!(b.scope, BudgetScope::Source),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.bytes_used(), 0);
    }

    #[tokio::test]
    async fn over_global_limit_reports_global_scope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(50)))
            .mount(&server)
            .await;

        let mut c = client(1_000, 100, 60);
        let err = c
            .request(&server.uri(), RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Budget(ref b) if b.scope == BudgetScope::Global));

        // Exhausted before the request is even sent.
        let mut spent = client(1_000, 100, 100);
        let err = spent
            .request(&server.uri(), RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Budget(ref b) if b.scope == BudgetScope::Global));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let mut c = client(1_000, 1_000, 0);
        let err = c
            .request(&server.uri(), RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
