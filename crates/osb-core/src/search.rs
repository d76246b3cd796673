//! Upstream search client.
//!
//! One HTTP GET per call, bounded by the configured timeout. Every
//! transport-level problem (non-200, timeout, connect failure, malformed
//! body, upstream-reported failure) collapses into a single
//! `UpstreamFailure` signal; the cause is logged, never surfaced to callers.

use std::time::Duration;

use serde::Deserialize;

use crate::{domain::SessionId, errors::Error, query::Query, Result};

/// One matched entry as reported by the upstream API. Fields may be absent;
/// rendering substitutes a sentinel.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ResultRecord {
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(rename = "Username", default)]
    pub username: Option<String>,
    #[serde(rename = "Password", default)]
    pub password: Option<String>,
}

/// Payload of a successful upstream call. The record list length is exactly
/// what upstream reported; truncation happens only at render/export time.
#[derive(Clone, Debug)]
pub struct SearchHits {
    pub records: Vec<ResultRecord>,
    pub elapsed_seconds: f64,
    pub download: Option<String>,
    pub session: Option<SessionId>,
}

/// Tagged outcome of a search call. Callers branch on data; there is no
/// error subtype to match on for failures.
#[derive(Clone, Debug)]
pub enum SearchOutcome {
    Success(SearchHits),
    NoResults,
    UpstreamFailure,
}

/// Wire shape of the upstream JSON body. Any mismatch is an upstream
/// failure, not a parse error propagated to callers.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Vec<ResultRecord>,
    #[serde(default)]
    time_taken_seconds: f64,
    #[serde(default)]
    download: Option<String>,
    #[serde(default)]
    used_session: Option<String>,
}

pub struct SearchClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
}

impl SearchClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid SEARCH_API_URL: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("osb/0.1")
            .build()
            .expect("reqwest client build");

        Ok(Self { http, endpoint })
    }

    /// Single attempt, no retries: callers own any retry policy (there is
    /// none in this version).
    pub async fn search(&self, query: &Query) -> SearchOutcome {
        let param = if query.is_url() { "url" } else { "keyword" };

        let resp = match self
            .http
            .get(self.endpoint.clone())
            .query(&[(param, query.text())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[SEARCH] request failed: {e}");
                return SearchOutcome::UpstreamFailure;
            }
        };

        if !resp.status().is_success() {
            eprintln!("[SEARCH] upstream returned status {}", resp.status());
            return SearchOutcome::UpstreamFailure;
        }

        let body: ApiResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                eprintln!("[SEARCH] malformed response body: {e}");
                return SearchOutcome::UpstreamFailure;
            }
        };

        classify(body)
    }

    /// Absolute download link: the upstream `download` field is a path
    /// relative to the API's origin.
    pub fn download_url(&self, relative: &str) -> String {
        let origin = self.endpoint.origin().ascii_serialization();
        if relative.starts_with('/') {
            format!("{origin}{relative}")
        } else {
            format!("{origin}/{relative}")
        }
    }
}

/// Pure classification of a parsed body, kept separate for testing.
fn classify(body: ApiResponse) -> SearchOutcome {
    if body.status != "success" {
        eprintln!("[SEARCH] upstream reported status {:?}", body.status);
        return SearchOutcome::UpstreamFailure;
    }
    if body.data.is_empty() {
        return SearchOutcome::NoResults;
    }

    SearchOutcome::Success(SearchHits {
        records: body.data,
        elapsed_seconds: body.time_taken_seconds.max(0.0),
        download: body.download,
        session: body.used_session.map(SessionId),
    })
}
