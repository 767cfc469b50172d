//! Participants (users eligible for matching) and their availability state.
//!
//! A participant's status and current match are stored as two columns, but in
//! memory they form a single [`ParticipantState`]: a match reference exists
//! exactly when the participant is `Matched` or `InChat`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

/// The availability column of a participant row.
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
pub enum ParticipantStatus {
  Idle,
  Searching,
  Matched,
  InChat,
}

/// Status and current match, coupled so the pair can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "current_match_id", rename_all = "snake_case")]
pub enum ParticipantState {
  Idle,
  Searching,
  /// Waiting on an invitation this participant sent.
  Matched(Uuid),
  /// Bound to an active session.
  InChat(Uuid),
}

impl ParticipantState {
  pub fn status(&self) -> ParticipantStatus {
    match self {
      Self::Idle => ParticipantStatus::Idle,
      Self::Searching => ParticipantStatus::Searching,
      Self::Matched(_) => ParticipantStatus::Matched,
      Self::InChat(_) => ParticipantStatus::InChat,
    }
  }

  pub fn current_match_id(&self) -> Option<Uuid> {
    match self {
      Self::Matched(id) | Self::InChat(id) => Some(*id),
      Self::Idle | Self::Searching => None,
    }
  }

  /// Rebuild the state from its stored columns, rejecting rows that violate
  /// the status/match coupling.
  pub fn from_parts(
    participant_id: Uuid,
    status: ParticipantStatus,
    current_match_id: Option<Uuid>,
  ) -> Result<Self> {
    match (status, current_match_id) {
      (ParticipantStatus::Idle, None) => Ok(Self::Idle),
      (ParticipantStatus::Searching, None) => Ok(Self::Searching),
      (ParticipantStatus::Matched, Some(id)) => Ok(Self::Matched(id)),
      (ParticipantStatus::InChat, Some(id)) => Ok(Self::InChat(id)),
      (status, current) => Err(Error::InconsistentParticipant(
        participant_id,
        status.to_string(),
        current,
      )),
    }
  }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

/// Which conversation modes a participant is open to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PreferredMode {
  Affinity,
  Challenge,
  #[default]
  Both,
}

/// A participant row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
  pub participant_id:    Uuid,
  pub display_name:      String,
  pub skills:            Vec<String>,
  pub interests:         Vec<String>,
  pub hobbies:           Vec<String>,
  pub preferred_mode:    PreferredMode,
  #[serde(flatten)]
  pub state:             ParticipantState,
  pub created_at:        DateTime<Utc>,
  /// When `state` last changed; used by the reconciliation sweep.
  pub status_changed_at: DateTime<Utc>,
}

impl Participant {
  pub fn status(&self) -> ParticipantStatus { self.state.status() }

  pub fn current_match_id(&self) -> Option<Uuid> { self.state.current_match_id() }

  pub fn summary(&self) -> ParticipantSummary {
    ParticipantSummary {
      participant_id: self.participant_id,
      display_name:   self.display_name.clone(),
      skills:         self.skills.clone(),
      interests:      self.interests.clone(),
      hobbies:        self.hobbies.clone(),
      status:         self.status(),
    }
  }
}

/// Input to [`crate::store::MatchStore::register_participant`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewParticipant {
  pub display_name:   String,
  #[serde(default)]
  pub skills:         Vec<String>,
  #[serde(default)]
  pub interests:      Vec<String>,
  #[serde(default)]
  pub hobbies:        Vec<String>,
  #[serde(default)]
  pub preferred_mode: PreferredMode,
}

impl NewParticipant {
  pub fn named(display_name: impl Into<String>) -> Self {
    Self { display_name: display_name.into(), ..Self::default() }
  }
}

/// The public face of a participant shown to other participants: profile
/// fields and availability, no match references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
  pub participant_id: Uuid,
  pub display_name:   String,
  pub skills:         Vec<String>,
  pub interests:      Vec<String>,
  pub hobbies:        Vec<String>,
  pub status:         ParticipantStatus,
}
