//! Chat sessions of active matches: messages while they run, an archived
//! conversation record once they end.

use std::sync::Arc;

use chrono::Utc;
use parley_core::{
  event::{ChangeEvent, ChangeFilter, Row},
  matching::{Match, MatchStatus},
  participant::{ParticipantState, ParticipantSummary},
  session::{ConversationRecord, Message, NewMessage},
  store::{Commit, MatchStore, MatchTransition, ParticipantGuard, Write},
  upstream::{Summarizer, Summary, SummaryRequest, TranscriptLine},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result, commit,
  config::EngineConfig,
  hub::{ChangeHub, Subscription},
  upstream,
};

/// What a participant sees on entering a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
  pub session: Match,
  pub partner: ParticipantSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEnded {
  pub record:     ConversationRecord,
  /// False when the summarizer failed, timed out, or was skipped for an
  /// empty transcript; the record's summary is then empty.
  pub summarized: bool,
}

pub struct SessionManager<S, Z> {
  store:      Arc<S>,
  hub:        ChangeHub,
  summarizer: Z,
  config:     EngineConfig,
}

impl<S: MatchStore, Z: Summarizer> SessionManager<S, Z> {
  pub fn new(store: Arc<S>, hub: ChangeHub, summarizer: Z, config: EngineConfig) -> Self {
    Self { store, hub, summarizer, config }
  }

  /// The match owning `session_id`, if `participant` is one of its parties.
  async fn session_match(&self, session_id: Uuid, participant: Uuid) -> Result<Match> {
    self
      .store
      .get_match_by_session(session_id)
      .await
      .map_err(Error::store)?
      .filter(|m| m.involves(participant))
      .ok_or(Error::NotFound)
  }

  pub async fn append_message(
    &self,
    session_id: Uuid,
    sender: Uuid,
    text: &str,
  ) -> Result<Message> {
    let owner = self.session_match(session_id, sender).await?;
    let text = text.trim();
    if text.is_empty() {
      return Err(Error::EmptyMessage);
    }
    if owner.status != MatchStatus::Active {
      return Err(Error::InvalidState(format!("session is {}", owner.status)));
    }

    let input = NewMessage {
      match_id: owner.match_id,
      session_id,
      sender_id: sender,
      text: text.to_owned(),
    };
    let message = self
      .store
      .append_message(input)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::InvalidState("session has ended".into()))?;

    tracing::debug!(%session_id, message_id = %message.message_id, "message appended");
    self.hub.publish(ChangeEvent::insert(Row::Message(message.clone())));
    Ok(message)
  }

  /// Messages of the session in send order, optionally only those sent
  /// after the message `after`.
  pub async fn read_messages(
    &self,
    session_id: Uuid,
    requester: Uuid,
    after: Option<Uuid>,
  ) -> Result<Vec<Message>> {
    self.session_match(session_id, requester).await?;
    self.store.list_messages(session_id, after).await.map_err(Error::store)
  }

  /// Live message inserts for a session the requester is party to. Pair
  /// with [`SessionManager::read_messages`] to backfill.
  pub async fn watch_messages(&self, session_id: Uuid, requester: Uuid) -> Result<Subscription> {
    self.session_match(session_id, requester).await?;
    Ok(self.hub.subscribe(ChangeFilter::Session(session_id)))
  }

  pub async fn context(&self, session_id: Uuid, requester: Uuid) -> Result<SessionView> {
    let session = self.session_match(session_id, requester).await?;
    let partner_id = session.counterpart(requester).ok_or(Error::NotFound)?;
    let partner = self
      .store
      .get_participant(partner_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound)?;
    Ok(SessionView { session, partner: partner.summary() })
  }

  /// End an active session: summarize the transcript, archive it, and
  /// release both parties.
  ///
  /// The summarizer is consulted before anything is written. If it fails
  /// the session still ends, with an empty summary.
  pub async fn end_session(&self, session_id: Uuid, requester: Uuid) -> Result<SessionEnded> {
    let owner = self.session_match(session_id, requester).await?;
    let match_id = owner.match_id;
    match owner.status {
      MatchStatus::Active => {}
      MatchStatus::Ended => return Err(Error::AlreadyResolved(match_id)),
      other => return Err(Error::InvalidState(format!("session is {other}"))),
    }

    let transcript = self
      .store
      .list_messages(session_id, None)
      .await
      .map_err(Error::store)?;

    let summary = if transcript.is_empty() {
      None
    } else {
      let request =
        SummaryRequest { transcript: transcript.iter().map(TranscriptLine::from).collect() };
      upstream::bounded(
        "summarizer",
        self.config.upstream_timeout(),
        self.summarizer.summarize(request),
      )
      .await
      .ok()
    };
    let summarized = summary.is_some();
    if !summarized && !transcript.is_empty() {
      tracing::warn!(%session_id, "ending session without a summary");
    }
    let Summary { summary, key_points } = summary.unwrap_or_default();

    let record = ConversationRecord {
      record_id: Uuid::new_v4(),
      match_id,
      initiator_id: owner.initiator_id,
      recipient_id: owner.recipient_id,
      mode: owner.mode,
      topic: owner.suggested_topic.clone(),
      summary,
      key_points,
      started_at: owner.activated_at.unwrap_or(owner.created_at),
      ended_at: Utc::now(),
    };

    let release = |participant_id: Uuid| {
      Write::participant(
        participant_id,
        ParticipantGuard::bound_to(match_id),
        ParticipantState::Idle,
      )
      .or_skip()
    };
    let batch = vec![
      Write::transition(match_id, MatchStatus::Active, MatchTransition::End),
      Write::InsertRecord(record.clone()),
      release(owner.initiator_id),
      release(owner.recipient_id),
    ];

    match commit(&*self.store, &self.hub, batch).await? {
      Commit::Applied(events) => {
        tracing::info!(%session_id, %match_id, summarized, "session ended");
        let record = events
          .into_iter()
          .find_map(|e| match e.row {
            Row::Record(r) if r.match_id == match_id => Some(r),
            _ => None,
          })
          .unwrap_or(record);
        Ok(SessionEnded { record, summarized })
      }
      Commit::Rejected { index: 0 } => Err(Error::AlreadyResolved(match_id)),
      Commit::Rejected { index } => Err(Error::ConcurrentModification(format!(
        "write {index} of session {session_id} termination was refused"
      ))),
    }
  }

  /// Conversation records of `participant_id`, newest first.
  pub async fn history(&self, participant_id: Uuid) -> Result<Vec<ConversationRecord>> {
    self.store.list_records(participant_id).await.map_err(Error::store)
  }
}
