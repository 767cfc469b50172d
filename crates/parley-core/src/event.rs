//! Row-level change events and the predicates subscribers filter them with.
//!
//! Every committed write produces one [`ChangeEvent`] carrying the new row
//! image. Delivery is at-least-once and unordered across subscriptions, so
//! consumers treat an event as "this is the row now", never as a one-shot
//! edge.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  matching::Match,
  participant::Participant,
  session::{ConversationRecord, Message},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
  Insert,
  Update,
}

/// The new image of a changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Row {
  Participant(Participant),
  Match(Match),
  Message(Message),
  Record(ConversationRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub op:  ChangeOp,
  #[serde(flatten)]
  pub row: Row,
}

impl ChangeEvent {
  pub fn insert(row: Row) -> Self { Self { op: ChangeOp::Insert, row } }

  pub fn update(row: Row) -> Self { Self { op: ChangeOp::Update, row } }
}

/// Table + row predicate selecting the events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
  All,
  /// The participant row with this id.
  Participant(Uuid),
  /// Match rows naming this participant as initiator or recipient.
  MatchesInvolving(Uuid),
  /// Messages of this session, and the match row that owns it.
  Session(Uuid),
  AnyOf(Vec<ChangeFilter>),
}

impl ChangeFilter {
  /// Everything a single participant's client needs to follow: its own row
  /// and every match it is party to.
  pub fn party(participant_id: Uuid) -> Self {
    Self::AnyOf(vec![
      Self::Participant(participant_id),
      Self::MatchesInvolving(participant_id),
    ])
  }

  pub fn matches(&self, event: &ChangeEvent) -> bool {
    match (self, &event.row) {
      (Self::All, _) => true,
      (Self::Participant(id), Row::Participant(p)) => p.participant_id == *id,
      (Self::MatchesInvolving(id), Row::Match(m)) => m.involves(*id),
      (Self::Session(id), Row::Message(msg)) => msg.session_id == *id,
      (Self::Session(id), Row::Match(m)) => m.session_id == Some(*id),
      (Self::AnyOf(filters), _) => filters.iter().any(|f| f.matches(event)),
      _ => false,
    }
  }
}
