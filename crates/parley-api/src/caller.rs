//! Caller identity extractor.
//!
//! Authentication happens upstream of this service, which forwards the
//! authenticated participant's id in the `x-participant-id` header. Browsers
//! cannot set headers on an `EventSource`, so `?participant_id=` is accepted
//! as well.

use axum::{
  extract::{FromRequestParts, Query},
  http::request::Parts,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

pub const CALLER_HEADER: &str = "x-participant-id";

/// The participant making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Uuid);

#[derive(Deserialize)]
struct CallerQuery {
  participant_id: Option<Uuid>,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
    if let Some(value) = parts.headers.get(CALLER_HEADER) {
      let id = value
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("malformed {CALLER_HEADER} header")))?;
      return Ok(Caller(id));
    }

    Query::<CallerQuery>::try_from_uri(&parts.uri)
      .ok()
      .and_then(|Query(q)| q.participant_id)
      .map(Caller)
      .ok_or(ApiError::Unauthenticated)
  }
}
