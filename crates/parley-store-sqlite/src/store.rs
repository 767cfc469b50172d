//! [`SqliteStore`]: the SQLite implementation of [`MatchStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior, types::Value};
use uuid::Uuid;

use parley_core::{
  event::{ChangeEvent, ChangeOp, Row},
  matching::Match,
  participant::{NewParticipant, Participant, ParticipantState, ParticipantStatus},
  session::{ConversationRecord, Message, NewMessage},
  store::{Commit, MatchQuery, MatchStore, MatchTransition, Write},
};

use crate::{
  encode::{
    MATCH_COLUMNS, MESSAGE_COLUMNS, PARTICIPANT_COLUMNS, RECORD_COLUMNS, RawMatch,
    RawMessage, RawParticipant, RawRecord, encode_dt, encode_list, encode_status_list,
    encode_uuid, encode_uuid_list, truncate_dt,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Encoded writes ──────────────────────────────────────────────────────────

/// A [`Write`] with every value already rendered to its column text, so the
/// closure running on the database thread cannot fail on encoding.
enum EncodedWrite {
  InsertMatch {
    match_id:        String,
    initiator_id:    String,
    recipient_id:    String,
    mode:            String,
    status:          String,
    session_id:      Option<String>,
    suggested_topic: Option<String>,
    created_at:      String,
  },
  InsertRecord {
    record_id:    String,
    match_id:     String,
    initiator_id: String,
    recipient_id: String,
    mode:         String,
    topic:        Option<String>,
    summary:      String,
    key_points:   String,
    started_at:   String,
    ended_at:     String,
  },
  Participant {
    participant_id: String,
    statuses:       String,
    current_guard:  Option<String>,
    changed_guard:  Option<String>,
    status:         String,
    current:        Option<String>,
    required:       bool,
  },
  Match {
    match_id:   String,
    expect:     String,
    status:     String,
    session_id: Option<String>,
    required:   bool,
  },
}

fn encode_write(write: Write) -> Result<EncodedWrite> {
  Ok(match write {
    Write::InsertMatch(m) => EncodedWrite::InsertMatch {
      match_id:        encode_uuid(m.match_id),
      initiator_id:    encode_uuid(m.initiator_id),
      recipient_id:    encode_uuid(m.recipient_id),
      mode:            m.mode.as_ref().to_owned(),
      status:          m.status.as_ref().to_owned(),
      session_id:      m.session_id.map(encode_uuid),
      suggested_topic: m.suggested_topic,
      created_at:      encode_dt(m.created_at),
    },
    Write::InsertRecord(r) => EncodedWrite::InsertRecord {
      record_id:    encode_uuid(r.record_id),
      match_id:     encode_uuid(r.match_id),
      initiator_id: encode_uuid(r.initiator_id),
      recipient_id: encode_uuid(r.recipient_id),
      mode:         r.mode.as_ref().to_owned(),
      topic:        r.topic,
      summary:      r.summary,
      key_points:   encode_list(&r.key_points)?,
      started_at:   encode_dt(r.started_at),
      ended_at:     encode_dt(r.ended_at),
    },
    Write::Participant { participant_id, guard, set, required } => {
      EncodedWrite::Participant {
        participant_id: encode_uuid(participant_id),
        statuses: encode_status_list(&guard.statuses)?,
        current_guard: guard.current_match_id.map(encode_uuid),
        changed_guard: guard.changed_at.map(encode_dt),
        status: set.status().as_ref().to_owned(),
        current: set.current_match_id().map(encode_uuid),
        required,
      }
    }
    Write::Match { match_id, expect, transition, required } => EncodedWrite::Match {
      match_id: encode_uuid(match_id),
      expect: expect.as_ref().to_owned(),
      status: transition.target().as_ref().to_owned(),
      session_id: match transition {
        MatchTransition::Activate { session_id } => Some(encode_uuid(session_id)),
        MatchTransition::Reject | MatchTransition::End => None,
      },
      required,
    },
  })
}

// ─── Raw commit results ──────────────────────────────────────────────────────

enum RawRow {
  Participant(RawParticipant),
  Match(RawMatch),
  Record(RawRecord),
}

impl RawRow {
  fn into_row(self) -> Result<Row> {
    Ok(match self {
      Self::Participant(raw) => Row::Participant(raw.into_participant()?),
      Self::Match(raw) => Row::Match(raw.into_match()?),
      Self::Record(raw) => Row::Record(raw.into_record()?),
    })
  }
}

enum RawCommit {
  Applied(Vec<(ChangeOp, RawRow)>),
  Rejected(usize),
}

fn select_participant(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<RawParticipant> {
  conn.query_row(
    &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE participant_id = ?1"),
    rusqlite::params![id],
    RawParticipant::from_row,
  )
}

fn select_match(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<RawMatch> {
  conn.query_row(
    &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE match_id = ?1"),
    rusqlite::params![id],
    RawMatch::from_row,
  )
}

fn select_record(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<RawRecord> {
  conn.query_row(
    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_id = ?1"),
    rusqlite::params![id],
    RawRecord::from_row,
  )
}

/// Apply one encoded batch inside an already-open transaction.
fn apply_batch(
  tx: &rusqlite::Transaction<'_>,
  writes: Vec<EncodedWrite>,
  now: &str,
) -> rusqlite::Result<RawCommit> {
  let mut changes = Vec::with_capacity(writes.len());

  for (index, write) in writes.into_iter().enumerate() {
    match write {
      EncodedWrite::InsertMatch {
        match_id,
        initiator_id,
        recipient_id,
        mode,
        status,
        session_id,
        suggested_topic,
        created_at,
      } => {
        tx.execute(
          "INSERT INTO matches (
             match_id, initiator_id, recipient_id, mode, status,
             session_id, suggested_topic, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            match_id,
            initiator_id,
            recipient_id,
            mode,
            status,
            session_id,
            suggested_topic,
            created_at,
          ],
        )?;
        changes.push((ChangeOp::Insert, RawRow::Match(select_match(tx, &match_id)?)));
      }

      EncodedWrite::InsertRecord {
        record_id,
        match_id,
        initiator_id,
        recipient_id,
        mode,
        topic,
        summary,
        key_points,
        started_at,
        ended_at,
      } => {
        tx.execute(
          "INSERT INTO records (
             record_id, match_id, initiator_id, recipient_id, mode,
             topic, summary, key_points, started_at, ended_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            record_id,
            match_id,
            initiator_id,
            recipient_id,
            mode,
            topic,
            summary,
            key_points,
            started_at,
            ended_at,
          ],
        )?;
        changes.push((ChangeOp::Insert, RawRow::Record(select_record(tx, &record_id)?)));
      }

      EncodedWrite::Participant {
        participant_id,
        statuses,
        current_guard,
        changed_guard,
        status,
        current,
        required,
      } => {
        let updated = tx.execute(
          "UPDATE participants
             SET status = ?1, current_match_id = ?2,
                 status_changed_at = MAX(?3, status_changed_at)
           WHERE participant_id = ?4
             AND status IN (SELECT value FROM json_each(?5))
             AND (?6 IS NULL OR current_match_id = ?6)
             AND (?7 IS NULL OR status_changed_at = ?7)",
          rusqlite::params![
            status,
            current,
            now,
            participant_id,
            statuses,
            current_guard,
            changed_guard,
          ],
        )?;
        if updated == 0 {
          if required {
            return Ok(RawCommit::Rejected(index));
          }
          continue;
        }
        changes.push((
          ChangeOp::Update,
          RawRow::Participant(select_participant(tx, &participant_id)?),
        ));
      }

      EncodedWrite::Match { match_id, expect, status, session_id, required } => {
        let updated = tx.execute(
          "UPDATE matches
             SET status       = ?1,
                 session_id   = COALESCE(?2, session_id),
                 activated_at = CASE WHEN ?1 = 'active' THEN ?3 ELSE activated_at END,
                 resolved_at  = CASE WHEN ?1 IN ('rejected', 'ended') THEN ?3 ELSE resolved_at END
           WHERE match_id = ?4 AND status = ?5",
          rusqlite::params![status, session_id, now, match_id, expect],
        )?;
        if updated == 0 {
          if required {
            return Ok(RawCommit::Rejected(index));
          }
          continue;
        }
        changes.push((ChangeOp::Update, RawRow::Match(select_match(tx, &match_id)?)));
      }
    }
  }

  Ok(RawCommit::Applied(changes))
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Parley record store backed by a single SQLite file.
///
/// Clones share the same reference-counted connection.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_participants(
    &self,
    sql: String,
    params: Vec<Value>,
  ) -> Result<Vec<Participant>> {
    let raws: Vec<RawParticipant> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawParticipant::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawParticipant::into_participant).collect()
  }

  async fn query_one_match(&self, column: &'static str, id: Uuid) -> Result<Option<Match>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawMatch> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE {column} = ?1"),
            rusqlite::params![id_str],
            RawMatch::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawMatch::into_match).transpose()
  }
}

// ─── MatchStore impl ─────────────────────────────────────────────────────────

impl MatchStore for SqliteStore {
  type Error = Error;

  // ── Participants ──────────────────────────────────────────────────────────

  async fn register_participant(&self, input: NewParticipant) -> Result<Participant> {
    let now = truncate_dt(Utc::now())?;
    let participant = Participant {
      participant_id:    Uuid::new_v4(),
      display_name:      input.display_name,
      skills:            input.skills,
      interests:         input.interests,
      hobbies:           input.hobbies,
      preferred_mode:    input.preferred_mode,
      state:             ParticipantState::Idle,
      created_at:        now,
      status_changed_at: now,
    };

    let id_str        = encode_uuid(participant.participant_id);
    let name          = participant.display_name.clone();
    let skills_str    = encode_list(&participant.skills)?;
    let interests_str = encode_list(&participant.interests)?;
    let hobbies_str   = encode_list(&participant.hobbies)?;
    let mode_str      = participant.preferred_mode.as_ref().to_owned();
    let status_str    = participant.status().as_ref().to_owned();
    let at_str        = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO participants (
             participant_id, display_name, skills, interests, hobbies,
             preferred_mode, status, current_match_id, created_at, status_changed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
          rusqlite::params![
            id_str,
            name,
            skills_str,
            interests_str,
            hobbies_str,
            mode_str,
            status_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(participant)
  }

  async fn get_participant(&self, id: Uuid) -> Result<Option<Participant>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawParticipant> = self
      .conn
      .call(move |conn| Ok(select_participant(conn, &id_str).optional()?))
      .await?;

    raw.map(RawParticipant::into_participant).transpose()
  }

  async fn get_participants(&self, ids: &[Uuid]) -> Result<Vec<Participant>> {
    self
      .query_participants(
        format!(
          "SELECT {PARTICIPANT_COLUMNS} FROM participants
           WHERE participant_id IN (SELECT value FROM json_each(?1))"
        ),
        vec![Value::Text(encode_uuid_list(ids)?)],
      )
      .await
  }

  async fn list_available(&self, exclude: Uuid, limit: usize) -> Result<Vec<Participant>> {
    self
      .query_participants(
        format!(
          "SELECT {PARTICIPANT_COLUMNS} FROM participants
           WHERE participant_id != ?1 AND status IN ('idle', 'searching')
           ORDER BY participant_id
           LIMIT ?2"
        ),
        vec![Value::Text(encode_uuid(exclude)), Value::Integer(limit as i64)],
      )
      .await
  }

  async fn list_stale(
    &self,
    status: ParticipantStatus,
    before: DateTime<Utc>,
  ) -> Result<Vec<Participant>> {
    self
      .query_participants(
        format!(
          "SELECT {PARTICIPANT_COLUMNS} FROM participants
           WHERE status = ?1 AND status_changed_at < ?2
           ORDER BY status_changed_at"
        ),
        vec![
          Value::Text(status.as_ref().to_owned()),
          Value::Text(encode_dt(before)),
        ],
      )
      .await
  }

  // ── Matches ───────────────────────────────────────────────────────────────

  async fn get_match(&self, id: Uuid) -> Result<Option<Match>> {
    self.query_one_match("match_id", id).await
  }

  async fn get_match_by_session(&self, session_id: Uuid) -> Result<Option<Match>> {
    self.query_one_match("session_id", session_id).await
  }

  async fn list_matches(&self, query: &MatchQuery) -> Result<Vec<Match>> {
    let status_str    = query.status.map(|s| s.as_ref().to_owned());
    let recipient_str = query.recipient.map(encode_uuid);
    let before_str    = query.created_before.map(encode_dt);
    let involving_str = encode_uuid_list(&query.involving)?;

    let raws: Vec<RawMatch> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MATCH_COLUMNS} FROM matches
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR recipient_id = ?2)
             AND (?3 IS NULL OR created_at < ?3)
             AND (json_array_length(?4) = 0
                  OR initiator_id IN (SELECT value FROM json_each(?4))
                  OR recipient_id IN (SELECT value FROM json_each(?4)))
           ORDER BY created_at, match_id"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![status_str, recipient_str, before_str, involving_str],
            RawMatch::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMatch::into_match).collect()
  }

  // ── Guarded writes ────────────────────────────────────────────────────────

  async fn commit(&self, writes: Vec<Write>) -> Result<Commit> {
    let encoded = writes
      .into_iter()
      .map(encode_write)
      .collect::<Result<Vec<_>>>()?;

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Stamped under the write lock, so stamps follow commit order.
        let now = encode_dt(Utc::now());
        let outcome = apply_batch(&tx, encoded, &now)?;
        // A rejected batch is dropped here, which rolls it back.
        if matches!(outcome, RawCommit::Applied(_)) {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;

    match raw {
      RawCommit::Rejected(index) => {
        tracing::debug!(index, "guarded batch rejected");
        Ok(Commit::Rejected { index })
      }
      RawCommit::Applied(changes) => {
        let events = changes
          .into_iter()
          .map(|(op, raw)| Ok(ChangeEvent { op, row: raw.into_row()? }))
          .collect::<Result<Vec<_>>>()?;
        Ok(Commit::Applied(events))
      }
    }
  }

  // ── Messages ──────────────────────────────────────────────────────────────

  async fn append_message(&self, input: NewMessage) -> Result<Option<Message>> {
    let message_id = encode_uuid(Uuid::new_v4());
    let match_str  = encode_uuid(input.match_id);
    let session    = encode_uuid(input.session_id);
    let sender     = encode_uuid(input.sender_id);
    let text       = input.text;

    let raw: Option<RawMessage> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let open: bool = tx
          .query_row(
            "SELECT 1 FROM matches
             WHERE match_id = ?1 AND session_id = ?2 AND status = 'active'
               AND (initiator_id = ?3 OR recipient_id = ?3)",
            rusqlite::params![match_str, session, sender],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !open {
          return Ok(None);
        }

        // Never stamp a message earlier than the latest one in the session.
        let latest: Option<String> = tx.query_row(
          "SELECT MAX(created_at) FROM messages WHERE session_id = ?1",
          rusqlite::params![session],
          |r| r.get(0),
        )?;
        let now = encode_dt(Utc::now());
        let created_at = match latest {
          Some(latest) if latest > now => latest,
          _ => now,
        };

        tx.execute(
          "INSERT INTO messages (message_id, session_id, sender_id, text, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![message_id, session, sender, text, created_at],
        )?;
        let raw = tx.query_row(
          &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
          rusqlite::params![message_id],
          RawMessage::from_row,
        )?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw.map(RawMessage::into_message).transpose()
  }

  async fn list_messages(
    &self,
    session_id: Uuid,
    after: Option<Uuid>,
  ) -> Result<Vec<Message>> {
    let session   = encode_uuid(session_id);
    let after_str = after.map(encode_uuid);

    let raws: Vec<RawMessage> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MESSAGE_COLUMNS} FROM messages
           WHERE session_id = ?1
             AND seq > COALESCE(
               (SELECT seq FROM messages WHERE session_id = ?1 AND message_id = ?2), 0)
           ORDER BY seq"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![session, after_str], RawMessage::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMessage::into_message).collect()
  }

  // ── Records ───────────────────────────────────────────────────────────────

  async fn list_records(&self, participant_id: Uuid) -> Result<Vec<ConversationRecord>> {
    let id_str = encode_uuid(participant_id);

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM records
           WHERE initiator_id = ?1 OR recipient_id = ?1
           ORDER BY ended_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }
}
