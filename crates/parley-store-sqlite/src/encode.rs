//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed microsecond
//! precision and a `Z` suffix, so that string comparison in SQL agrees with
//! chronological order. String lists are stored as compact JSON. UUIDs are
//! stored as hyphenated lowercase strings. Enums use their snake_case names.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::{
  matching::{Match, MatchMode, MatchStatus},
  participant::{Participant, ParticipantState, ParticipantStatus, PreferredMode},
  session::{ConversationRecord, Message},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Stored timestamps carry microseconds only; round-trip `dt` through the
/// column format so in-memory values compare equal to what is read back.
pub fn truncate_dt(dt: DateTime<Utc>) -> Result<DateTime<Utc>> {
  decode_dt(&encode_dt(dt))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| {
    Error::Core(parley_core::Error::UnknownVariant { kind, value: s.to_owned() })
  })
}

pub fn decode_participant_status(s: &str) -> Result<ParticipantStatus> {
  decode_enum("participant status", s)
}

pub fn decode_match_status(s: &str) -> Result<MatchStatus> {
  decode_enum("match status", s)
}

pub fn decode_mode(s: &str) -> Result<MatchMode> { decode_enum("match mode", s) }

pub fn decode_preferred_mode(s: &str) -> Result<PreferredMode> {
  decode_enum("preferred mode", s)
}

// ─── Lists ───────────────────────────────────────────────────────────────────

pub fn encode_list(items: &[String]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_list(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

/// JSON array of ids, consumed in SQL with `json_each`.
pub fn encode_uuid_list(ids: &[Uuid]) -> Result<String> {
  let strs: Vec<String> = ids.iter().copied().map(encode_uuid).collect();
  Ok(serde_json::to_string(&strs)?)
}

/// JSON array of status names, consumed in SQL with `json_each`.
pub fn encode_status_list(statuses: &[ParticipantStatus]) -> Result<String> {
  let strs: Vec<&str> = statuses.iter().map(|s| s.as_ref()).collect();
  Ok(serde_json::to_string(&strs)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const PARTICIPANT_COLUMNS: &str = "participant_id, display_name, skills, \
   interests, hobbies, preferred_mode, status, current_match_id, created_at, \
   status_changed_at";

/// Raw strings read directly from a `participants` row.
#[derive(Debug)]
pub struct RawParticipant {
  pub participant_id:    String,
  pub display_name:      String,
  pub skills:            String,
  pub interests:         String,
  pub hobbies:           String,
  pub preferred_mode:    String,
  pub status:            String,
  pub current_match_id:  Option<String>,
  pub created_at:        String,
  pub status_changed_at: String,
}

impl RawParticipant {
  /// Map a row selected with [`PARTICIPANT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      participant_id:    row.get(0)?,
      display_name:      row.get(1)?,
      skills:            row.get(2)?,
      interests:         row.get(3)?,
      hobbies:           row.get(4)?,
      preferred_mode:    row.get(5)?,
      status:            row.get(6)?,
      current_match_id:  row.get(7)?,
      created_at:        row.get(8)?,
      status_changed_at: row.get(9)?,
    })
  }

  pub fn into_participant(self) -> Result<Participant> {
    let participant_id = decode_uuid(&self.participant_id)?;
    let status = decode_participant_status(&self.status)?;
    let current = decode_opt_uuid(self.current_match_id)?;

    Ok(Participant {
      participant_id,
      display_name: self.display_name,
      skills: decode_list(&self.skills)?,
      interests: decode_list(&self.interests)?,
      hobbies: decode_list(&self.hobbies)?,
      preferred_mode: decode_preferred_mode(&self.preferred_mode)?,
      state: ParticipantState::from_parts(participant_id, status, current)?,
      created_at: decode_dt(&self.created_at)?,
      status_changed_at: decode_dt(&self.status_changed_at)?,
    })
  }
}

pub const MATCH_COLUMNS: &str = "match_id, initiator_id, recipient_id, mode, \
   status, session_id, suggested_topic, created_at, activated_at, resolved_at";

/// Raw strings read directly from a `matches` row.
#[derive(Debug)]
pub struct RawMatch {
  pub match_id:        String,
  pub initiator_id:    String,
  pub recipient_id:    String,
  pub mode:            String,
  pub status:          String,
  pub session_id:      Option<String>,
  pub suggested_topic: Option<String>,
  pub created_at:      String,
  pub activated_at:    Option<String>,
  pub resolved_at:     Option<String>,
}

impl RawMatch {
  /// Map a row selected with [`MATCH_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      match_id:        row.get(0)?,
      initiator_id:    row.get(1)?,
      recipient_id:    row.get(2)?,
      mode:            row.get(3)?,
      status:          row.get(4)?,
      session_id:      row.get(5)?,
      suggested_topic: row.get(6)?,
      created_at:      row.get(7)?,
      activated_at:    row.get(8)?,
      resolved_at:     row.get(9)?,
    })
  }

  pub fn into_match(self) -> Result<Match> {
    Ok(Match {
      match_id:        decode_uuid(&self.match_id)?,
      initiator_id:    decode_uuid(&self.initiator_id)?,
      recipient_id:    decode_uuid(&self.recipient_id)?,
      mode:            decode_mode(&self.mode)?,
      status:          decode_match_status(&self.status)?,
      session_id:      decode_opt_uuid(self.session_id)?,
      suggested_topic: self.suggested_topic,
      created_at:      decode_dt(&self.created_at)?,
      activated_at:    decode_opt_dt(self.activated_at)?,
      resolved_at:     decode_opt_dt(self.resolved_at)?,
    })
  }
}

pub const MESSAGE_COLUMNS: &str = "message_id, session_id, sender_id, text, created_at";

/// Raw strings read directly from a `messages` row.
#[derive(Debug)]
pub struct RawMessage {
  pub message_id: String,
  pub session_id: String,
  pub sender_id:  String,
  pub text:       String,
  pub created_at: String,
}

impl RawMessage {
  /// Map a row selected with [`MESSAGE_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      message_id: row.get(0)?,
      session_id: row.get(1)?,
      sender_id:  row.get(2)?,
      text:       row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  pub fn into_message(self) -> Result<Message> {
    Ok(Message {
      message_id: decode_uuid(&self.message_id)?,
      session_id: decode_uuid(&self.session_id)?,
      sender_id:  decode_uuid(&self.sender_id)?,
      text:       self.text,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const RECORD_COLUMNS: &str = "record_id, match_id, initiator_id, recipient_id, \
   mode, topic, summary, key_points, started_at, ended_at";

/// Raw strings read directly from a `records` row.
#[derive(Debug)]
pub struct RawRecord {
  pub record_id:    String,
  pub match_id:     String,
  pub initiator_id: String,
  pub recipient_id: String,
  pub mode:         String,
  pub topic:        Option<String>,
  pub summary:      String,
  pub key_points:   String,
  pub started_at:   String,
  pub ended_at:     String,
}

impl RawRecord {
  /// Map a row selected with [`RECORD_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:    row.get(0)?,
      match_id:     row.get(1)?,
      initiator_id: row.get(2)?,
      recipient_id: row.get(3)?,
      mode:         row.get(4)?,
      topic:        row.get(5)?,
      summary:      row.get(6)?,
      key_points:   row.get(7)?,
      started_at:   row.get(8)?,
      ended_at:     row.get(9)?,
    })
  }

  pub fn into_record(self) -> Result<ConversationRecord> {
    Ok(ConversationRecord {
      record_id:    decode_uuid(&self.record_id)?,
      match_id:     decode_uuid(&self.match_id)?,
      initiator_id: decode_uuid(&self.initiator_id)?,
      recipient_id: decode_uuid(&self.recipient_id)?,
      mode:         decode_mode(&self.mode)?,
      topic:        self.topic,
      summary:      self.summary,
      key_points:   decode_list(&self.key_points)?,
      started_at:   decode_dt(&self.started_at)?,
      ended_at:     decode_dt(&self.ended_at)?,
    })
  }
}
