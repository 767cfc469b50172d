//! Matchmaking and session lifecycle for Parley.
//!
//! The engine is stateless apart from its [`ChangeHub`]: every decision is
//! made against the record store through guarded batches, so any number of
//! engine instances may share one store. Rows written by a batch are
//! published to the hub after the batch commits.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod relay;
pub mod session;
pub mod sweep;
pub mod upstream;

use std::sync::Arc;

use parley_core::{
  event::{ChangeEvent, Row},
  matching::Match,
  store::{Commit, MatchStore, Write},
  upstream::{Recommender, Summarizer},
};
use uuid::Uuid;

pub use self::{
  config::EngineConfig,
  coordinator::{Coordinator, Invitation},
  error::{Error, Result},
  hub::ChangeHub,
  relay::{Notification, Relay, RelayStream},
  session::{SessionEnded, SessionManager, SessionView},
  sweep::{SweepReport, Sweeper},
};

/// Everything a front end needs, wired to one store and one hub.
pub struct Engine<S, R, Z> {
  pub coordinator: Coordinator<S, R>,
  pub sessions:    SessionManager<S, Z>,
  pub relay:       Relay<S>,
  pub hub:         ChangeHub,
  store:           Arc<S>,
  config:          EngineConfig,
}

impl<S, R, Z> Engine<S, R, Z>
where
  S: MatchStore + 'static,
  R: Recommender,
  Z: Summarizer,
{
  pub fn new(store: Arc<S>, recommender: R, summarizer: Z, config: EngineConfig) -> Self {
    let hub = ChangeHub::new();
    Self {
      coordinator: Coordinator::new(
        Arc::clone(&store),
        hub.clone(),
        recommender,
        config.clone(),
      ),
      sessions: SessionManager::new(
        Arc::clone(&store),
        hub.clone(),
        summarizer,
        config.clone(),
      ),
      relay: Relay::new(Arc::clone(&store), hub.clone(), config.poll_interval()),
      hub,
      store,
      config,
    }
  }

  pub fn sweeper(&self) -> Sweeper<S> {
    Sweeper::new(Arc::clone(&self.store), self.hub.clone(), self.config.clone())
  }

  pub fn config(&self) -> &EngineConfig { &self.config }
}

/// Commit `writes` and publish the resulting row images.
pub(crate) async fn commit<S: MatchStore>(
  store: &S,
  hub: &ChangeHub,
  writes: Vec<Write>,
) -> Result<Commit> {
  let outcome = store.commit(writes).await.map_err(Error::store)?;
  if let Commit::Applied(events) = &outcome {
    hub.publish_all(events.iter().cloned());
  }
  Ok(outcome)
}

/// The image of match `match_id` among committed events, if it was written.
pub(crate) fn updated_match(events: &[ChangeEvent], match_id: Uuid) -> Option<Match> {
  events.iter().rev().find_map(|e| match &e.row {
    Row::Match(m) if m.match_id == match_id => Some(m.clone()),
    _ => None,
  })
}

#[cfg(test)]
mod tests;
