//! Matchmaking: candidate search, invitations, and their resolution.
//!
//! Nothing here holds a lock. Each step that touches a participant's state
//! or a match's status is a guarded batch handed to the store, so two
//! clients racing for the same participant see exactly one winner and the
//! loser gets a race error.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use parley_core::{
  event::{ChangeEvent, Row},
  matching::{Match, MatchMode, MatchStatus},
  participant::{
    NewParticipant, Participant, ParticipantState, ParticipantStatus, ParticipantSummary,
  },
  store::{Commit, MatchQuery, MatchStore, MatchTransition, ParticipantGuard, Write},
  upstream::{RecommendationRequest, Recommender},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result, commit, config::EngineConfig, hub::ChangeHub, updated_match, upstream,
};

/// A pending match as shown to its recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invitation {
  #[serde(flatten)]
  pub invitation: Match,
  pub initiator:  ParticipantSummary,
}

pub struct Coordinator<S, R> {
  store:       Arc<S>,
  hub:         ChangeHub,
  recommender: R,
  config:      EngineConfig,
}

/// Reject `m` if it is still pending and release its initiator.
pub(crate) fn supersede(m: &Match) -> Vec<Write> {
  vec![
    Write::transition(m.match_id, MatchStatus::Pending, MatchTransition::Reject),
    Write::participant(
      m.initiator_id,
      ParticipantGuard::status(ParticipantStatus::Matched).with_match(m.match_id),
      ParticipantState::Idle,
    )
    .or_skip(),
  ]
}

/// Trim a free-text topic; blank means none.
fn normalize_topic(topic: Option<String>) -> Option<String> {
  topic.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty())
}

impl<S: MatchStore, R: Recommender> Coordinator<S, R> {
  pub fn new(store: Arc<S>, hub: ChangeHub, recommender: R, config: EngineConfig) -> Self {
    Self { store, hub, recommender, config }
  }

  async fn load(&self, participant_id: Uuid) -> Result<Participant> {
    self
      .store
      .get_participant(participant_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound)
  }

  /// The match `match_id` if `recipient` is the party it was sent to.
  async fn addressed_match(&self, match_id: Uuid, recipient: Uuid) -> Result<Match> {
    self
      .store
      .get_match(match_id)
      .await
      .map_err(Error::store)?
      .filter(|m| m.recipient_id == recipient)
      .ok_or(Error::NotFound)
  }

  // ── Participants ──────────────────────────────────────────────────────

  pub async fn register(&self, input: NewParticipant) -> Result<Participant> {
    let participant =
      self.store.register_participant(input).await.map_err(Error::store)?;
    tracing::info!(participant = %participant.participant_id, "participant registered");
    self.hub.publish(ChangeEvent::insert(Row::Participant(participant.clone())));
    Ok(participant)
  }

  pub async fn participant(&self, participant_id: Uuid) -> Result<Participant> {
    self.load(participant_id).await
  }

  // ── Search ────────────────────────────────────────────────────────────

  /// Ordered candidates for `requester`. The requester is `Searching` for
  /// the duration of the call and `Idle` again afterwards, whatever the
  /// outcome.
  pub async fn search_candidates(
    &self,
    requester: Uuid,
    mode: MatchMode,
    topic_hint: Option<String>,
  ) -> Result<Vec<ParticipantSummary>> {
    let participant = self.load(requester).await?;
    if participant.status() != ParticipantStatus::Idle {
      return Err(Error::InvalidState(format!(
        "cannot search while {}",
        participant.status()
      )));
    }

    let begin = Write::participant(
      requester,
      ParticipantGuard::status(ParticipantStatus::Idle),
      ParticipantState::Searching,
    );
    if let Commit::Rejected { .. } = commit(&*self.store, &self.hub, vec![begin]).await? {
      return Err(Error::ConcurrentModification(format!(
        "participant {requester} left idle before the search began"
      )));
    }
    tracing::info!(%requester, %mode, "search started");

    let outcome = self.gather(requester, mode, normalize_topic(topic_hint)).await;

    let restore = Write::participant(
      requester,
      ParticipantGuard::status(ParticipantStatus::Searching),
      ParticipantState::Idle,
    )
    .or_skip();
    if let Err(e) = commit(&*self.store, &self.hub, vec![restore]).await {
      tracing::warn!(%requester, error = %e, "failed to restore searcher to idle");
    }

    outcome
  }

  async fn gather(
    &self,
    requester: Uuid,
    mode: MatchMode,
    topic_hint: Option<String>,
  ) -> Result<Vec<ParticipantSummary>> {
    let request = RecommendationRequest { requester_id: requester, mode, topic_hint };
    let recommended = upstream::bounded(
      "recommender",
      self.config.upstream_timeout(),
      self.recommender.recommend(request),
    )
    .await
    .map(|r| r.candidate_ids)
    .unwrap_or_default();

    let candidates = self.resolve(requester, &recommended).await?;
    if !candidates.is_empty() {
      return Ok(candidates);
    }

    tracing::debug!(%requester, "no usable recommendations, using fallback");
    let available = self
      .store
      .list_available(requester, self.config.fallback_cap)
      .await
      .map_err(Error::store)?;
    Ok(available.iter().map(Participant::summary).collect())
  }

  /// Look up recommended ids, keeping their order and dropping the
  /// requester, duplicates, and ids with no participant.
  async fn resolve(&self, requester: Uuid, ids: &[Uuid]) -> Result<Vec<ParticipantSummary>> {
    let mut seen = HashSet::new();
    let ids: Vec<Uuid> = ids
      .iter()
      .copied()
      .filter(|id| *id != requester && seen.insert(*id))
      .collect();
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let found = self.store.get_participants(&ids).await.map_err(Error::store)?;
    let mut by_id: HashMap<Uuid, Participant> =
      found.into_iter().map(|p| (p.participant_id, p)).collect();
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).map(|p| p.summary()).collect())
  }

  // ── Invitations ───────────────────────────────────────────────────────

  pub async fn invite(
    &self,
    initiator: Uuid,
    recipient: Uuid,
    mode: MatchMode,
    topic_hint: Option<String>,
  ) -> Result<Match> {
    if initiator == recipient {
      return Err(Error::InvalidState("cannot invite yourself".into()));
    }

    let parties = self
      .store
      .get_participants(&[initiator, recipient])
      .await
      .map_err(Error::store)?;
    if parties.len() < 2 {
      return Err(Error::NotFound);
    }
    if parties
      .iter()
      .any(|p| p.participant_id == recipient && p.status() == ParticipantStatus::InChat)
    {
      return Err(Error::AlreadyMatched(recipient));
    }

    let pending = Match::pending(initiator, recipient, mode, normalize_topic(topic_hint));
    let match_id = pending.match_id;
    let batch = vec![
      Write::InsertMatch(pending.clone()),
      Write::participant(
        initiator,
        ParticipantGuard::status(ParticipantStatus::Idle),
        ParticipantState::Matched(match_id),
      ),
    ];

    match commit(&*self.store, &self.hub, batch).await? {
      Commit::Applied(events) => {
        tracing::info!(%match_id, %initiator, %recipient, %mode, "invitation sent");
        Ok(updated_match(&events, match_id).unwrap_or(pending))
      }
      Commit::Rejected { .. } => Err(Error::AlreadyMatched(initiator)),
    }
  }

  /// Pending invitations addressed to `recipient`, oldest first.
  pub async fn pending_invitations(&self, recipient: Uuid) -> Result<Vec<Invitation>> {
    let query = MatchQuery::pending().addressed_to(recipient);
    let matches = self.store.list_matches(&query).await.map_err(Error::store)?;

    let initiator_ids: Vec<Uuid> = matches.iter().map(|m| m.initiator_id).collect();
    let initiators: HashMap<Uuid, ParticipantSummary> = self
      .store
      .get_participants(&initiator_ids)
      .await
      .map_err(Error::store)?
      .iter()
      .map(|p| (p.participant_id, p.summary()))
      .collect();

    Ok(
      matches
        .into_iter()
        .filter_map(|m| {
          let initiator = initiators.get(&m.initiator_id)?.clone();
          Some(Invitation { invitation: m, initiator })
        })
        .collect(),
    )
  }

  /// Activate a pending match addressed to `recipient`, opening its session
  /// and superseding every other pending match naming either party.
  pub async fn accept(&self, recipient: Uuid, match_id: Uuid) -> Result<Match> {
    let pending = self.addressed_match(match_id, recipient).await?;
    if pending.status != MatchStatus::Pending {
      return Err(Error::AlreadyResolved(match_id));
    }

    let session_id = Uuid::new_v4();
    let batch = vec![
      Write::transition(match_id, MatchStatus::Pending, MatchTransition::Activate {
        session_id,
      }),
      Write::participant(
        pending.initiator_id,
        ParticipantGuard::status(ParticipantStatus::Matched).with_match(match_id),
        ParticipantState::InChat(match_id),
      ),
      Write::participant(
        recipient,
        ParticipantGuard::status_in([
          ParticipantStatus::Idle,
          ParticipantStatus::Searching,
          ParticipantStatus::Matched,
        ]),
        ParticipantState::InChat(match_id),
      ),
    ];

    match commit(&*self.store, &self.hub, batch).await? {
      Commit::Applied(events) => {
        tracing::info!(%match_id, %session_id, "match activated");
        let active = match updated_match(&events, match_id) {
          Some(m) => m,
          None => self
            .store
            .get_match(match_id)
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound)?,
        };
        self.supersede_pending(&active).await;
        Ok(active)
      }
      Commit::Rejected { index: 0 } => Err(Error::AlreadyResolved(match_id)),
      Commit::Rejected { index } => {
        tracing::debug!(%match_id, index, "activation guard missed, superseding match");
        if let Err(e) = commit(&*self.store, &self.hub, supersede(&pending)).await {
          tracing::warn!(%match_id, error = %e, "failed to supersede unsatisfiable match");
        }
        Err(Error::ConcurrentModification(format!(
          "a party to match {match_id} is no longer available"
        )))
      }
    }
  }

  /// Best effort: a failure here leaves stragglers for the sweep.
  async fn supersede_pending(&self, active: &Match) {
    let query =
      MatchQuery::pending().involving([active.initiator_id, active.recipient_id]);
    let stale = match self.store.list_matches(&query).await {
      Ok(stale) => stale,
      Err(e) => {
        tracing::warn!(match_id = %active.match_id, error = %e, "failed to list competing matches");
        return;
      }
    };

    for m in stale.iter().filter(|m| m.match_id != active.match_id) {
      match commit(&*self.store, &self.hub, supersede(m)).await {
        Ok(Commit::Applied(_)) => {
          tracing::info!(match_id = %m.match_id, by = %active.match_id, "match superseded")
        }
        Ok(Commit::Rejected { .. }) => {
          tracing::debug!(match_id = %m.match_id, "competing match already resolved")
        }
        Err(e) => {
          tracing::warn!(match_id = %m.match_id, error = %e, "failed to supersede match")
        }
      }
    }
  }

  pub async fn reject(&self, recipient: Uuid, match_id: Uuid) -> Result<Match> {
    let pending = self.addressed_match(match_id, recipient).await?;
    if pending.status != MatchStatus::Pending {
      return Err(Error::AlreadyResolved(match_id));
    }

    match commit(&*self.store, &self.hub, supersede(&pending)).await? {
      Commit::Applied(events) => {
        tracing::info!(%match_id, "invitation rejected");
        Ok(updated_match(&events, match_id).unwrap_or(pending))
      }
      Commit::Rejected { .. } => Err(Error::AlreadyResolved(match_id)),
    }
  }
}
