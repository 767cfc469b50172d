//! JSON HTTP API for Parley.
//!
//! Exposes an axum [`Router`] over a Parley [`Engine`] backed by any
//! [`MatchStore`]. Authentication is the caller's responsibility: requests
//! arrive with the participant id already established (see [`caller`]).

pub mod caller;
pub mod error;
pub mod events;
pub mod matchmaking;
pub mod participants;
pub mod sessions;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use parley_core::store::MatchStore;
use parley_engine::{
  Engine, EngineConfig,
  upstream::{HttpRecommender, HttpSummarizer},
};
use serde::Deserialize;

pub use caller::Caller;
pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `PARLEY_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:            String,
  #[serde(default = "default_port")]
  pub port:            u16,
  #[serde(default = "default_store_path")]
  pub store_path:      PathBuf,
  /// Without it, searches always use the fallback.
  pub recommender_url: Option<String>,
  /// Without it, sessions end unsummarized.
  pub summarizer_url:  Option<String>,
  #[serde(default)]
  pub engine:          EngineConfig,
}

fn default_host() -> String { "127.0.0.1".into() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("parley.db") }

// ─── Application state ────────────────────────────────────────────────────────

/// The engine as served over HTTP: any store, HTTP upstreams.
pub type ServedEngine<S> = Engine<S, HttpRecommender, HttpSummarizer>;

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub engine: Arc<ServedEngine<S>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self { Self { engine: Arc::clone(&self.engine) } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: MatchStore + 'static,
{
  Router::new()
    // Participants
    .route("/participants", post(participants::create::<S>))
    .route("/participants/{id}", get(participants::get_one::<S>))
    // Matchmaking
    .route("/search", post(matchmaking::search::<S>))
    .route(
      "/invitations",
      get(matchmaking::pending::<S>).post(matchmaking::invite::<S>),
    )
    .route("/matches/{id}/accept", post(matchmaking::accept::<S>))
    .route("/matches/{id}/reject", post(matchmaking::reject::<S>))
    // Sessions
    .route("/sessions/{id}", get(sessions::context::<S>))
    .route(
      "/sessions/{id}/messages",
      get(sessions::read_messages::<S>).post(sessions::append_message::<S>),
    )
    .route("/sessions/{id}/stream", get(sessions::stream::<S>))
    .route("/sessions/{id}/end", post(sessions::end::<S>))
    .route("/history", get(sessions::history::<S>))
    // Presence
    .route("/events", get(events::stream::<S>))
    .with_state(state)
}
