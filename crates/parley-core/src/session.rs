//! Chat sessions: messages exchanged while a match is active, and the
//! archived record written when the session ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matching::MatchMode;

/// An append-only chat message. `created_at` is assigned by the store and is
/// non-decreasing within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub message_id: Uuid,
  pub session_id: Uuid,
  pub sender_id:  Uuid,
  pub text:       String,
  pub created_at: DateTime<Utc>,
}

/// Input to [`crate::store::MatchStore::append_message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
  /// The match that owns the session; the insert only happens while it is
  /// active.
  pub match_id:   Uuid,
  pub session_id: Uuid,
  pub sender_id:  Uuid,
  pub text:       String,
}

/// The immutable summary of a terminated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
  pub record_id:    Uuid,
  pub match_id:     Uuid,
  pub initiator_id: Uuid,
  pub recipient_id: Uuid,
  pub mode:         MatchMode,
  pub topic:        Option<String>,
  /// Empty when the summarizer was unavailable.
  pub summary:      String,
  pub key_points:   Vec<String>,
  pub started_at:   DateTime<Utc>,
  pub ended_at:     DateTime<Utc>,
}

impl ConversationRecord {
  pub fn involves(&self, participant_id: Uuid) -> bool {
    self.initiator_id == participant_id || self.recipient_id == participant_id
  }
}
