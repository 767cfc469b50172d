//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Bodies are `{"error": <message>, "code": <machine-readable kind>}`. Lost
//! races answer 409 so clients know to refresh rather than give up.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use parley_engine::Error as EngineError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  /// No usable caller identity on the request.
  #[error("missing participant identity")]
  Unauthenticated,

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Engine(#[from] EngineError),
}

impl ApiError {
  fn status_and_code(&self) -> (StatusCode, &'static str) {
    match self {
      Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
      Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
      Self::Engine(e) => match e {
        EngineError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::EmptyMessage => (StatusCode::BAD_REQUEST, "empty_message"),
        EngineError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        EngineError::AlreadyMatched(_) => (StatusCode::CONFLICT, "already_matched"),
        EngineError::AlreadyResolved(_) => (StatusCode::CONFLICT, "already_resolved"),
        EngineError::ConcurrentModification(_) => {
          (StatusCode::CONFLICT, "concurrent_modification")
        }
        EngineError::UpstreamUnavailable(_) => {
          (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable")
        }
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = self.status_and_code();
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
      tracing::error!(error = %self, "request failed");
      "internal error".to_owned()
    } else {
      if matches!(&self, Self::Engine(e) if e.is_race()) {
        tracing::debug!(error = %self, "request lost a race");
      }
      self.to_string()
    };
    (status, Json(json!({ "error": message, "code": code }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  #[test]
  fn races_map_to_conflict() {
    for e in [
      EngineError::AlreadyMatched(Uuid::nil()),
      EngineError::AlreadyResolved(Uuid::nil()),
      EngineError::ConcurrentModification("lost".into()),
    ] {
      assert_eq!(ApiError::from(e).status_and_code().0, StatusCode::CONFLICT);
    }
  }

  #[test]
  fn store_errors_hide_their_detail() {
    let inner = std::io::Error::other("disk on fire");
    let resp = ApiError::from(EngineError::store(inner)).into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn unavailable_upstream_maps_to_service_unavailable() {
    let err = ApiError::from(EngineError::UpstreamUnavailable("summarizer"));
    assert!(!matches!(&err, ApiError::Engine(e) if e.is_race()));
    assert_eq!(err.status_and_code(), (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"));
  }
}
