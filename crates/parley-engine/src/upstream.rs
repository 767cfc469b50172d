//! HTTP adapters for the recommender and summarizer, and the timeout wrapper
//! every upstream call goes through.

use std::{fmt::Display, future::Future, time::Duration};

use parley_core::upstream::{
  Recommendation, RecommendationRequest, Recommender, Summarizer, Summary, SummaryRequest,
};
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
  #[error("no endpoint configured")]
  NotConfigured,

  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("service responded {0}")]
  Status(reqwest::StatusCode),
}

/// Await an upstream call for at most `timeout`. Failure and timeout are
/// logged and reported as [`crate::Error::UpstreamUnavailable`]; callers fall back.
pub async fn bounded<T, E, F>(
  service: &'static str,
  timeout: Duration,
  call: F,
) -> crate::Result<T>
where
  F: Future<Output = Result<T, E>>,
  E: Display,
{
  match tokio::time::timeout(timeout, call).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(e)) => {
      tracing::warn!(service, error = %e, "upstream call failed");
      Err(crate::Error::UpstreamUnavailable(service))
    }
    Err(_) => {
      tracing::warn!(service, ?timeout, "upstream call timed out");
      Err(crate::Error::UpstreamUnavailable(service))
    }
  }
}

// ─── Shared client ───────────────────────────────────────────────────────────

/// A JSON-over-HTTP endpoint, or none at all.
///
/// The inner [`reqwest::Client`] is `Arc`-based, so clones share a pool.
#[derive(Clone)]
struct Endpoint {
  client: Client,
  url:    Option<String>,
}

impl Endpoint {
  fn new(url: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url: url.filter(|u| !u.trim().is_empty()) })
  }

  async fn post<Req, Resp>(&self, body: &Req) -> Result<Resp, UpstreamError>
  where
    Req: serde::Serialize + Sync,
    Resp: serde::de::DeserializeOwned,
  {
    let url = self.url.as_deref().ok_or(UpstreamError::NotConfigured)?;
    let resp = self.client.post(url).json(body).send().await?;
    if !resp.status().is_success() {
      return Err(UpstreamError::Status(resp.status()));
    }
    Ok(resp.json().await?)
  }
}

// ─── Recommender ─────────────────────────────────────────────────────────────

/// Recommender reached with `POST <url>`; body [`RecommendationRequest`],
/// response [`Recommendation`]. Without a URL every call fails, which sends
/// searches straight to the fallback.
#[derive(Clone)]
pub struct HttpRecommender {
  endpoint: Endpoint,
}

impl HttpRecommender {
  pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
    Ok(Self { endpoint: Endpoint::new(url, timeout)? })
  }
}

impl Recommender for HttpRecommender {
  type Error = UpstreamError;

  async fn recommend(&self, request: RecommendationRequest) -> Result<Recommendation, UpstreamError> {
    self.endpoint.post(&request).await
  }
}

// ─── Summarizer ──────────────────────────────────────────────────────────────

/// Summarizer reached with `POST <url>`; body [`SummaryRequest`], response
/// [`Summary`]. Without a URL every call fails and sessions end unsummarized.
#[derive(Clone)]
pub struct HttpSummarizer {
  endpoint: Endpoint,
}

impl HttpSummarizer {
  pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
    Ok(Self { endpoint: Endpoint::new(url, timeout)? })
  }
}

impl Summarizer for HttpSummarizer {
  type Error = UpstreamError;

  async fn summarize(&self, request: SummaryRequest) -> Result<Summary, UpstreamError> {
    self.endpoint.post(&request).await
  }
}
