//! Handlers for `/participants` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/participants` | Body: `{"display_name":"Ada", "interests":[…]}` |
//! | `GET`  | `/participants/{id}` | Full row for oneself, summary for others |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use parley_core::{participant::NewParticipant, store::MatchStore};
use uuid::Uuid;

use crate::{AppState, Caller, error::ApiError};

/// `POST /participants`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewParticipant>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MatchStore + 'static,
{
  if body.display_name.trim().is_empty() {
    return Err(ApiError::BadRequest("display_name must not be empty".into()));
  }
  let participant = state.engine.coordinator.register(body).await?;
  Ok((StatusCode::CREATED, Json(participant)))
}

/// `GET /participants/{id}`
///
/// Match references are only shown to the participant itself.
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Response, ApiError>
where
  S: MatchStore + 'static,
{
  let participant = state.engine.coordinator.participant(id).await?;
  if caller == id {
    Ok(Json(participant).into_response())
  } else {
    Ok(Json(participant.summary()).into_response())
  }
}
