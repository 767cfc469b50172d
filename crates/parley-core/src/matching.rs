//! Matches: proposed or realised pairings between two participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// The flavour of conversation a match was proposed for.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchMode {
  /// Shared interests; a friendly conversation.
  Affinity,
  /// Opposing views; a debate.
  Challenge,
}

/// Lifecycle of a match.
///
/// ```text
/// Pending ──accept──▶ Active ──end──▶ Ended
///    │
///    └──reject / superseded / expired──▶ Rejected
/// ```
///
/// `Accepted` is part of the vocabulary for external consumers; this system
/// moves straight from `Pending` to `Active` and never persists it.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
  Pending,
  Accepted,
  Rejected,
  Active,
  Ended,
}

impl MatchStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Rejected | Self::Ended) }
}

/// A match row. The pair is ordered: the initiator sent the invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
  pub match_id:        Uuid,
  pub initiator_id:    Uuid,
  pub recipient_id:    Uuid,
  pub mode:            MatchMode,
  pub status:          MatchStatus,
  /// Assigned on activation.
  pub session_id:      Option<Uuid>,
  pub suggested_topic: Option<String>,
  pub created_at:      DateTime<Utc>,
  pub activated_at:    Option<DateTime<Utc>>,
  /// When the match reached a terminal status.
  pub resolved_at:     Option<DateTime<Utc>>,
}

impl Match {
  /// A fresh pending invitation from `initiator_id` to `recipient_id`.
  pub fn pending(
    initiator_id: Uuid,
    recipient_id: Uuid,
    mode: MatchMode,
    suggested_topic: Option<String>,
  ) -> Self {
    Self {
      match_id: Uuid::new_v4(),
      initiator_id,
      recipient_id,
      mode,
      status: MatchStatus::Pending,
      session_id: None,
      suggested_topic,
      created_at: Utc::now(),
      activated_at: None,
      resolved_at: None,
    }
  }

  pub fn involves(&self, participant_id: Uuid) -> bool {
    self.initiator_id == participant_id || self.recipient_id == participant_id
  }

  /// The other party, if `participant_id` is one of the two.
  pub fn counterpart(&self, participant_id: Uuid) -> Option<Uuid> {
    if participant_id == self.initiator_id {
      Some(self.recipient_id)
    } else if participant_id == self.recipient_id {
      Some(self.initiator_id)
    } else {
      None
    }
  }
}
