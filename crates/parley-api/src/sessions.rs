//! Handlers for chat sessions and conversation history.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/sessions/{id}` | Match and partner summary |
//! | `GET`  | `/sessions/{id}/messages` | Optional `?after=<message_id>` |
//! | `POST` | `/sessions/{id}/messages` | Body: `{"text":"…"}` |
//! | `GET`  | `/sessions/{id}/stream` | SSE: `message` and `session` events |
//! | `POST` | `/sessions/{id}/end` | 409 if already ended |
//! | `GET`  | `/history` | Caller's records, newest first |
//!
//! A 404 means the session does not exist or the caller is not party to it.

use std::convert::Infallible;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::{
    IntoResponse,
    sse::{Event, KeepAlive, Sse},
  },
};
use futures::{
  Stream,
  stream::{self, StreamExt},
};
use parley_core::{
  event::Row,
  session::{ConversationRecord, Message},
  store::MatchStore,
};
use parley_engine::{SessionEnded, SessionView};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Caller, error::ApiError};

/// `GET /sessions/{id}`
pub async fn context<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.sessions.context(id, caller).await?))
}

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReadParams {
  /// Id of the last message the client already has.
  pub after: Option<Uuid>,
}

/// `GET /sessions/{id}/messages[?after=<message_id>]`
pub async fn read_messages<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
  Query(params): Query<ReadParams>,
) -> Result<Json<Vec<Message>>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.sessions.read_messages(id, caller, params.after).await?))
}

#[derive(Debug, Deserialize)]
pub struct AppendBody {
  pub text: String,
}

/// `POST /sessions/{id}/messages`
pub async fn append_message<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
  Json(body): Json<AppendBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MatchStore + 'static,
{
  let message = state.engine.sessions.append_message(id, caller, &body.text).await?;
  Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /sessions/{id}/stream`
///
/// Emits `message` for each new message and `session` when the owning match
/// changes, e.g. when the partner ends the session.
pub async fn stream<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError>
where
  S: MatchStore + 'static,
{
  let subscription = state.engine.sessions.watch_messages(id, caller).await?;

  let connected =
    stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

  let events = subscription.into_stream().filter_map(|change| async move {
    let event = match change.row {
      Row::Message(message) => Event::default().event("message").json_data(&message),
      Row::Match(session) => Event::default().event("session").json_data(&session),
      Row::Participant(_) | Row::Record(_) => return None,
    };
    event.ok().map(Ok)
  });

  Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// `POST /sessions/{id}/end`
pub async fn end<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionEnded>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.sessions.end_session(id, caller).await?))
}

/// `GET /history`
pub async fn history<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
) -> Result<Json<Vec<ConversationRecord>>, ApiError>
where
  S: MatchStore + 'static,
{
  Ok(Json(state.engine.sessions.history(caller).await?))
}
