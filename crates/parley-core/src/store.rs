//! The `MatchStore` trait, its guarded-write vocabulary, and query types.
//!
//! The store is the only point of coordination between independent clients.
//! Contended columns (participant state, match status) are never written with
//! a plain read-then-write: every mutation is a [`Write`] carrying a guard on
//! the row's current value, and a batch of writes passed to
//! [`MatchStore::commit`] is applied atomically or not at all.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  event::ChangeEvent,
  matching::{Match, MatchStatus},
  participant::{NewParticipant, Participant, ParticipantState, ParticipantStatus},
  session::{ConversationRecord, Message, NewMessage},
};

// ─── Guards ──────────────────────────────────────────────────────────────────

/// Expected current value of a participant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantGuard {
  /// The row's status must be one of these.
  pub statuses:         Vec<ParticipantStatus>,
  /// If set, the row's `current_match_id` must equal it.
  pub current_match_id: Option<Uuid>,
  /// If set, the row's `status_changed_at` must equal it.
  pub changed_at:       Option<DateTime<Utc>>,
}

impl ParticipantGuard {
  pub fn status_in(statuses: impl IntoIterator<Item = ParticipantStatus>) -> Self {
    Self {
      statuses:         statuses.into_iter().collect(),
      current_match_id: None,
      changed_at:       None,
    }
  }

  pub fn status(status: ParticipantStatus) -> Self { Self::status_in([status]) }

  /// Matched or in chat under exactly this match.
  pub fn bound_to(match_id: Uuid) -> Self {
    Self {
      current_match_id: Some(match_id),
      ..Self::status_in([ParticipantStatus::Matched, ParticipantStatus::InChat])
    }
  }

  pub fn with_match(mut self, match_id: Uuid) -> Self {
    self.current_match_id = Some(match_id);
    self
  }

  pub fn changed_at(mut self, at: DateTime<Utc>) -> Self {
    self.changed_at = Some(at);
    self
  }

  pub fn admits(&self, participant: &Participant) -> bool {
    self.statuses.contains(&participant.status())
      && self
        .current_match_id
        .is_none_or(|id| participant.current_match_id() == Some(id))
      && self.changed_at.is_none_or(|at| participant.status_changed_at == at)
  }
}

/// The status change applied to a match row by a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTransition {
  /// → `Active`, binding a fresh session and stamping `activated_at`.
  Activate { session_id: Uuid },
  /// → `Rejected`, stamping `resolved_at`.
  Reject,
  /// → `Ended`, stamping `resolved_at`.
  End,
}

impl MatchTransition {
  pub fn target(self) -> MatchStatus {
    match self {
      Self::Activate { .. } => MatchStatus::Active,
      Self::Reject => MatchStatus::Rejected,
      Self::End => MatchStatus::Ended,
    }
  }
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// One element of an atomic batch.
///
/// Guarded updates are `required` by default: a guard miss aborts the whole
/// batch. [`Write::or_skip`] turns a guard miss into a no-op instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
  InsertMatch(Match),
  InsertRecord(ConversationRecord),
  Participant {
    participant_id: Uuid,
    guard:          ParticipantGuard,
    set:            ParticipantState,
    required:       bool,
  },
  Match {
    match_id:   Uuid,
    expect:     MatchStatus,
    transition: MatchTransition,
    required:   bool,
  },
}

impl Write {
  pub fn participant(
    participant_id: Uuid,
    guard: ParticipantGuard,
    set: ParticipantState,
  ) -> Self {
    Self::Participant { participant_id, guard, set, required: true }
  }

  pub fn transition(
    match_id: Uuid,
    expect: MatchStatus,
    transition: MatchTransition,
  ) -> Self {
    Self::Match { match_id, expect, transition, required: true }
  }

  /// Skip this write, rather than abort the batch, when its guard misses.
  pub fn or_skip(self) -> Self {
    match self {
      Self::Participant { participant_id, guard, set, .. } => Self::Participant {
        participant_id,
        guard,
        set,
        required: false,
      },
      Self::Match { match_id, expect, transition, .. } => Self::Match {
        match_id,
        expect,
        transition,
        required: false,
      },
      insert => insert,
    }
  }
}

/// Outcome of [`MatchStore::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
  /// Every required guard held. One event per row actually written, in
  /// batch order; skipped writes produce none.
  Applied(Vec<ChangeEvent>),
  /// The required write at this batch index found its guard violated (or
  /// its row missing). Nothing was written.
  Rejected { index: usize },
}

impl Commit {
  pub fn is_applied(&self) -> bool { matches!(self, Self::Applied(_)) }
}

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`MatchStore::list_matches`]. All set fields must hold.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
  pub status:         Option<MatchStatus>,
  /// Initiator or recipient is one of these participants.
  pub involving:      Vec<Uuid>,
  pub recipient:      Option<Uuid>,
  pub created_before: Option<DateTime<Utc>>,
}

impl MatchQuery {
  pub fn pending() -> Self {
    Self { status: Some(MatchStatus::Pending), ..Self::default() }
  }

  pub fn involving(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
    self.involving.extend(ids);
    self
  }

  pub fn addressed_to(mut self, recipient: Uuid) -> Self {
    self.recipient = Some(recipient);
    self
  }

  pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
    self.created_before = Some(at);
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Parley record store backend.
///
/// Participant and match rows change only through [`MatchStore::commit`];
/// messages and conversation records are insert-only.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait MatchStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Participants ──────────────────────────────────────────────────────

  /// Provision a new participant in the `Idle` state.
  fn register_participant(
    &self,
    input: NewParticipant,
  ) -> impl Future<Output = Result<Participant, Self::Error>> + Send + '_;

  fn get_participant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Participant>, Self::Error>> + Send + '_;

  /// Fetch several participants. Order of the result is unspecified;
  /// unknown ids are omitted.
  fn get_participants<'a>(
    &'a self,
    ids: &'a [Uuid],
  ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send + 'a;

  /// Participants that are `Idle` or `Searching`, other than `exclude`,
  /// ordered by id, at most `limit`.
  fn list_available(
    &self,
    exclude: Uuid,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send + '_;

  /// Participants in `status` whose state last changed before `before`.
  fn list_stale(
    &self,
    status: ParticipantStatus,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send + '_;

  // ── Matches ───────────────────────────────────────────────────────────

  fn get_match(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  fn get_match_by_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  /// Matches satisfying `query`, oldest first.
  fn list_matches<'a>(
    &'a self,
    query: &'a MatchQuery,
  ) -> impl Future<Output = Result<Vec<Match>, Self::Error>> + Send + 'a;

  // ── Guarded writes ────────────────────────────────────────────────────

  /// Apply `writes` atomically. See [`Write`] and [`Commit`].
  fn commit(
    &self,
    writes: Vec<Write>,
  ) -> impl Future<Output = Result<Commit, Self::Error>> + Send + '_;

  // ── Messages ──────────────────────────────────────────────────────────

  /// Append a message if, at insert time, the owning match is `Active` and
  /// bound to `input.session_id`. Returns `None` otherwise. The timestamp is
  /// assigned by the store and never precedes the session's latest message.
  fn append_message(
    &self,
    input: NewMessage,
  ) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send + '_;

  /// Messages of a session in append order, optionally only those appended
  /// after the message `after`. An unknown `after` yields every message.
  fn list_messages(
    &self,
    session_id: Uuid,
    after: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send + '_;

  // ── Records ───────────────────────────────────────────────────────────

  /// Conversation records involving `participant_id`, newest first.
  fn list_records(
    &self,
    participant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ConversationRecord>, Self::Error>> + Send + '_;
}
