//! Handlers for candidate search and invitations.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/search` | Body: `{"mode":"affinity","topic_hint":"…"}` |
//! | `POST` | `/invitations` | Body: `{"recipient_id":…,"mode":"challenge"}` |
//! | `GET`  | `/invitations` | Pending invitations addressed to the caller |
//! | `POST` | `/matches/{id}/accept` | Recipient only; 409 if already resolved |
//! | `POST` | `/matches/{id}/reject` | Recipient only; 409 if already resolved |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use parley_core::{
  matching::{Match, MatchMode},
  participant::ParticipantSummary,
  store::MatchStore,
};
use parley_engine::Invitation;
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Caller, error::ApiError};

// ─── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchBody {
  pub mode:       MatchMode,
  #[serde(default)]
  pub topic_hint: Option<String>,
}

/// `POST /search`
pub async fn search<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Json(body): Json<SearchBody>,
) -> Result<Json<Vec<ParticipantSummary>>, ApiError>
where
  S: MatchStore + 'static,
{
  let candidates = state
    .engine
    .coordinator
    .search_candidates(caller, body.mode, body.topic_hint)
    .await?;
  Ok(Json(candidates))
}

// ─── Invitations ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InviteBody {
  pub recipient_id: Uuid,
  pub mode:         MatchMode,
  #[serde(default)]
  pub topic_hint:   Option<String>,
}

/// `POST /invitations`
pub async fn invite<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Json(body): Json<InviteBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MatchStore + 'static,
{
  let pending = state
    .engine
    .coordinator
    .invite(caller, body.recipient_id, body.mode, body.topic_hint)
    .await?;
  Ok((StatusCode::CREATED, Json(pending)))
}

/// `GET /invitations`
pub async fn pending<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
) -> Result<Json<Vec<Invitation>>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.coordinator.pending_invitations(caller).await?))
}

// ─── Resolution ───────────────────────────────────────────────────────────────

/// `POST /matches/{id}/accept`
pub async fn accept<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Match>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.coordinator.accept(caller, id).await?))
}

/// `POST /matches/{id}/reject`
pub async fn reject<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Match>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.coordinator.reject(caller, id).await?))
}
