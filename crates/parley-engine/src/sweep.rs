//! Periodic reconciliation of state left behind by clients that went away.
//!
//! A search that never finished leaves its participant `Searching`; an
//! invitation nobody answers keeps its initiator `Matched`. The sweep moves
//! both back to `Idle`, using the same guarded writes as every other path,
//! so it can never clobber a transition that raced it.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parley_core::{
  participant::{ParticipantState, ParticipantStatus},
  store::{MatchQuery, MatchStore, ParticipantGuard, Write},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{Error, Result, commit, config::EngineConfig, coordinator::supersede, hub::ChangeHub};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub searches_released:   usize,
  pub invitations_expired: usize,
}

impl SweepReport {
  pub fn is_empty(&self) -> bool { *self == Self::default() }
}

pub struct Sweeper<S> {
  store:  Arc<S>,
  hub:    ChangeHub,
  config: EngineConfig,
}

/// `now - age`, saturating at the earliest representable instant.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
  TimeDelta::from_std(age)
    .ok()
    .and_then(|age| now.checked_sub_signed(age))
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl<S: MatchStore + 'static> Sweeper<S> {
  pub fn new(store: Arc<S>, hub: ChangeHub, config: EngineConfig) -> Self {
    Self { store, hub, config }
  }

  pub async fn sweep_once(&self) -> Result<SweepReport> {
    let now = Utc::now();
    let mut report = SweepReport::default();

    let stale = self
      .store
      .list_stale(ParticipantStatus::Searching, cutoff(now, self.config.search_lease()))
      .await
      .map_err(Error::store)?;
    for participant in stale {
      let release = Write::participant(
        participant.participant_id,
        ParticipantGuard::status(ParticipantStatus::Searching)
          .changed_at(participant.status_changed_at),
        ParticipantState::Idle,
      );
      if commit(&*self.store, &self.hub, vec![release]).await?.is_applied() {
        report.searches_released += 1;
      }
    }

    let query = MatchQuery::pending().created_before(cutoff(now, self.config.invite_ttl()));
    let expired = self.store.list_matches(&query).await.map_err(Error::store)?;
    for m in &expired {
      if commit(&*self.store, &self.hub, supersede(m)).await?.is_applied() {
        report.invitations_expired += 1;
      }
    }

    if !report.is_empty() {
      tracing::info!(
        searches_released = report.searches_released,
        invitations_expired = report.invitations_expired,
        "reconciliation sweep"
      );
    }
    Ok(report)
  }

  /// Run [`Sweeper::sweep_once`] forever on the configured interval. A
  /// failed sweep is logged and retried on the next tick.
  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.config.sweep_interval());
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        ticker.tick().await;
        if let Err(e) = self.sweep_once().await {
          tracing::warn!(error = %e, "reconciliation sweep failed");
        }
      }
    })
  }
}
