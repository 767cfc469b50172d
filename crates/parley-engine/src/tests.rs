//! Engine tests against an in-memory SQLite store, with scripted upstreams.

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use futures::StreamExt;
use parley_core::{
  event::{ChangeEvent, Row},
  matching::{Match, MatchMode, MatchStatus},
  participant::{NewParticipant, Participant, ParticipantState, ParticipantStatus},
  store::{MatchStore, ParticipantGuard, Write},
  upstream::{
    Recommendation, RecommendationRequest, Recommender, Summarizer, Summary, SummaryRequest,
  },
};
use parley_store_sqlite::SqliteStore;
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
  Engine, EngineConfig, Error, Notification, RelayStream, upstream::UpstreamError,
};

// ─── Fakes ───────────────────────────────────────────────────────────────────

/// Recommends a fixed list.
struct Scripted(Vec<Uuid>);

impl Recommender for Scripted {
  type Error = UpstreamError;

  async fn recommend(&self, _: RecommendationRequest) -> Result<Recommendation, UpstreamError> {
    Ok(Recommendation { candidate_ids: self.0.clone() })
  }
}

/// Every call fails.
struct Down;

impl Recommender for Down {
  type Error = UpstreamError;

  async fn recommend(&self, _: RecommendationRequest) -> Result<Recommendation, UpstreamError> {
    Err(UpstreamError::NotConfigured)
  }
}

impl Summarizer for Down {
  type Error = UpstreamError;

  async fn summarize(&self, _: SummaryRequest) -> Result<Summary, UpstreamError> {
    Err(UpstreamError::NotConfigured)
  }
}

/// Never answers within the test timeout.
struct Stalled;

impl Recommender for Stalled {
  type Error = UpstreamError;

  async fn recommend(&self, _: RecommendationRequest) -> Result<Recommendation, UpstreamError> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Ok(Recommendation::default())
  }
}

/// Summarizes every transcript by its line count and counts its calls.
#[derive(Clone, Default)]
struct Counting(Arc<AtomicUsize>);

impl Summarizer for Counting {
  type Error = UpstreamError;

  async fn summarize(&self, request: SummaryRequest) -> Result<Summary, UpstreamError> {
    self.0.fetch_add(1, Ordering::SeqCst);
    Ok(Summary {
      summary:    format!("{} lines", request.transcript.len()),
      key_points: request.transcript.iter().map(|l| l.text.clone()).collect(),
    })
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn config() -> EngineConfig {
  EngineConfig {
    poll_interval_ms: 50,
    upstream_timeout_ms: 200,
    ..EngineConfig::default()
  }
}

async fn engine_with<R: Recommender, Z: Summarizer>(
  recommender: R,
  summarizer: Z,
  config: EngineConfig,
) -> Engine<SqliteStore, R, Z> {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  Engine::new(Arc::new(store), recommender, summarizer, config)
}

async fn engine() -> Engine<SqliteStore, Down, Down> { engine_with(Down, Down, config()).await }

async fn join<R: Recommender, Z: Summarizer>(
  e: &Engine<SqliteStore, R, Z>,
  name: &str,
) -> Uuid {
  e.coordinator.register(NewParticipant::named(name)).await.unwrap().participant_id
}

async fn state<R: Recommender, Z: Summarizer>(
  e: &Engine<SqliteStore, R, Z>,
  id: Uuid,
) -> ParticipantState {
  e.coordinator.participant(id).await.unwrap().state
}

async fn get_match<R: Recommender, Z: Summarizer>(
  e: &Engine<SqliteStore, R, Z>,
  id: Uuid,
) -> Match {
  e.store.get_match(id).await.unwrap().unwrap()
}

/// Reading a participant decodes the status/match pair, which rejects
/// inconsistent rows. Additionally, any referenced match must name the
/// participant and still be live.
async fn assert_consistent<R: Recommender, Z: Summarizer>(
  e: &Engine<SqliteStore, R, Z>,
  ids: &[Uuid],
) {
  let rows = e.store.get_participants(ids).await.unwrap();
  assert_eq!(rows.len(), ids.len());
  for p in rows {
    if let Some(match_id) = p.current_match_id() {
      let m = get_match(e, match_id).await;
      assert!(m.involves(p.participant_id), "{} holds a foreign match", p.display_name);
      assert!(!m.status.is_terminal(), "{} holds a {} match", p.display_name, m.status);
    }
  }
}

/// Two participants in an active session.
async fn chatting<R: Recommender, Z: Summarizer>(
  e: &Engine<SqliteStore, R, Z>,
) -> (Uuid, Uuid, Match) {
  let a = join(e, "ada").await;
  let b = join(e, "bo").await;
  let m = e
    .coordinator
    .invite(a, b, MatchMode::Affinity, Some("  tea  ".into()))
    .await
    .unwrap();
  let active = e.coordinator.accept(b, m.match_id).await.unwrap();
  (a, b, active)
}

fn session_of(m: &Match) -> Uuid { m.session_id.expect("active match has a session") }

async fn next(stream: &mut RelayStream) -> Notification {
  timeout(Duration::from_secs(2), stream.next())
    .await
    .expect("relay notification")
    .expect("relay open")
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_falls_back_to_available_participants_by_id() {
  let e = engine().await;
  let requester = join(&e, "req").await;
  let mut others = Vec::new();
  for name in ["w", "x", "y", "z"] {
    others.push(join(&e, name).await);
  }
  others.sort();

  let found = e
    .coordinator
    .search_candidates(requester, MatchMode::Affinity, None)
    .await
    .unwrap();

  let ids: Vec<Uuid> = found.iter().map(|c| c.participant_id).collect();
  assert_eq!(ids, others[..3].to_vec());
  assert_eq!(state(&e, requester).await, ParticipantState::Idle);
}

#[tokio::test]
async fn search_keeps_recommender_order_and_drops_unusable_ids() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let register = |name: &'static str| store.register_participant(NewParticipant::named(name));
  let requester = register("req").await.unwrap().participant_id;
  let b = register("b").await.unwrap().participant_id;
  let c = register("c").await.unwrap().participant_id;

  let script = Scripted(vec![c, Uuid::new_v4(), requester, b, c]);
  let e = Engine::new(Arc::new(store), script, Down, config());

  let found = e
    .coordinator
    .search_candidates(requester, MatchMode::Challenge, Some("chess".into()))
    .await
    .unwrap();

  let ids: Vec<Uuid> = found.iter().map(|c| c.participant_id).collect();
  assert_eq!(ids, vec![c, b]);
}

#[tokio::test]
async fn search_survives_recommender_timeout() {
  let e = engine_with(Stalled, Down, config()).await;
  let requester = join(&e, "req").await;
  let other = join(&e, "other").await;

  let found = timeout(
    Duration::from_secs(5),
    e.coordinator.search_candidates(requester, MatchMode::Affinity, None),
  )
  .await
  .expect("search bounded by upstream timeout")
  .unwrap();

  assert_eq!(found.len(), 1);
  assert_eq!(found[0].participant_id, other);
  assert_eq!(state(&e, requester).await, ParticipantState::Idle);
}

#[tokio::test]
async fn search_requires_idle_requester() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  let err = e
    .coordinator
    .search_candidates(a, MatchMode::Affinity, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidState(_)));
  assert!(matches!(state(&e, a).await, ParticipantState::Matched(_)));
}

#[tokio::test]
async fn search_for_unknown_requester_is_not_found() {
  let e = engine().await;
  let err = e
    .coordinator
    .search_candidates(Uuid::new_v4(), MatchMode::Affinity, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound));
}

// ─── Invitations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn invite_creates_pending_match_and_binds_initiator() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;

  let m = e
    .coordinator
    .invite(a, b, MatchMode::Challenge, Some("  pineapple pizza ".into()))
    .await
    .unwrap();

  assert_eq!(m.status, MatchStatus::Pending);
  assert_eq!(m.suggested_topic.as_deref(), Some("pineapple pizza"));
  assert_eq!(state(&e, a).await, ParticipantState::Matched(m.match_id));
  assert_eq!(state(&e, b).await, ParticipantState::Idle);
  assert_consistent(&e, &[a, b]).await;
}

#[tokio::test]
async fn invite_rejects_bad_parties() {
  let e = engine().await;
  let a = join(&e, "a").await;

  let err = e.coordinator.invite(a, a, MatchMode::Affinity, None).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState(_)));

  let err = e
    .coordinator
    .invite(a, Uuid::new_v4(), MatchMode::Affinity, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound));

  let blank = e
    .coordinator
    .invite(a, join(&e, "b").await, MatchMode::Affinity, Some("   ".into()))
    .await
    .unwrap();
  assert_eq!(blank.suggested_topic, None);
}

#[tokio::test]
async fn initiator_with_outstanding_invitation_cannot_invite_again() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let c = join(&e, "c").await;
  e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  let err = e.coordinator.invite(a, c, MatchMode::Affinity, None).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyMatched(id) if id == a));
}

#[tokio::test]
async fn recipient_in_chat_cannot_be_invited() {
  let e = engine().await;
  let (_, b, _) = chatting(&e).await;
  let c = join(&e, "c").await;

  let err = e.coordinator.invite(c, b, MatchMode::Affinity, None).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyMatched(id) if id == b));
  assert_eq!(state(&e, c).await, ParticipantState::Idle);
}

#[tokio::test]
async fn pending_invitations_carry_initiator_summary() {
  let e = engine().await;
  let a = join(&e, "ada").await;
  let b = join(&e, "bo").await;
  let c = join(&e, "cy").await;
  let m1 = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  let m2 = e.coordinator.invite(c, b, MatchMode::Challenge, None).await.unwrap();

  let invitations = e.coordinator.pending_invitations(b).await.unwrap();
  let ids: Vec<Uuid> = invitations.iter().map(|i| i.invitation.match_id).collect();
  assert_eq!(ids, vec![m1.match_id, m2.match_id]);
  assert_eq!(invitations[0].initiator.display_name, "ada");
  assert_eq!(invitations[1].initiator.status, ParticipantStatus::Matched);

  assert!(e.coordinator.pending_invitations(a).await.unwrap().is_empty());
}

// ─── Accept / reject ─────────────────────────────────────────────────────────

#[tokio::test]
async fn accept_supersedes_competing_invitations() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let c = join(&e, "c").await;

  let m1 = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  let m2 = e.coordinator.invite(c, b, MatchMode::Affinity, None).await.unwrap();
  assert_eq!(state(&e, a).await, ParticipantState::Matched(m1.match_id));
  assert_eq!(state(&e, c).await, ParticipantState::Matched(m2.match_id));

  let active = e.coordinator.accept(b, m1.match_id).await.unwrap();
  assert_eq!(active.status, MatchStatus::Active);
  assert!(active.session_id.is_some());
  assert!(active.activated_at.is_some());

  assert_eq!(state(&e, a).await, ParticipantState::InChat(m1.match_id));
  assert_eq!(state(&e, b).await, ParticipantState::InChat(m1.match_id));
  assert_eq!(get_match(&e, m2.match_id).await.status, MatchStatus::Rejected);
  assert_eq!(state(&e, c).await, ParticipantState::Idle);
  assert_consistent(&e, &[a, b, c]).await;
}

#[tokio::test]
async fn accepting_own_outgoing_invitation_target_releases_it() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let d = join(&e, "d").await;

  let outgoing = e.coordinator.invite(b, d, MatchMode::Affinity, None).await.unwrap();
  let incoming = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  e.coordinator.accept(b, incoming.match_id).await.unwrap();

  assert_eq!(get_match(&e, outgoing.match_id).await.status, MatchStatus::Rejected);
  assert_eq!(state(&e, b).await, ParticipantState::InChat(incoming.match_id));
  assert_consistent(&e, &[a, b, d]).await;
}

#[tokio::test]
async fn accept_retry_is_already_resolved_and_changes_nothing() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  let before = e.store.get_participants(&[a, b]).await.unwrap();

  let err = e.coordinator.accept(b, active.match_id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved(id) if id == active.match_id));

  let after = e.store.get_participants(&[a, b]).await.unwrap();
  let key = |mut v: Vec<Participant>| {
    v.sort_by_key(|p| p.participant_id);
    v
  };
  assert_eq!(key(before), key(after));
  assert_eq!(get_match(&e, active.match_id).await, active);
}

#[tokio::test]
async fn only_recipient_may_resolve_an_invitation() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  assert!(matches!(e.coordinator.accept(a, m.match_id).await, Err(Error::NotFound)));
  assert!(matches!(e.coordinator.reject(a, m.match_id).await, Err(Error::NotFound)));
  assert!(matches!(e.coordinator.accept(b, Uuid::new_v4()).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn concurrent_accepts_have_exactly_one_winner() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let c = join(&e, "c").await;
  let m1 = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  let m2 = e.coordinator.invite(c, b, MatchMode::Affinity, None).await.unwrap();

  let (r1, r2) = tokio::join!(
    e.coordinator.accept(b, m1.match_id),
    e.coordinator.accept(b, m2.match_id),
  );

  let (winner, loser, err) = match (r1, r2) {
    (Ok(w), Err(err)) => (w, m2, err),
    (Err(err), Ok(w)) => (w, m1, err),
    other => panic!("expected exactly one winner, got {other:?}"),
  };
  assert!(err.is_race(), "unexpected error {err:?}");
  assert_eq!(state(&e, b).await, ParticipantState::InChat(winner.match_id));
  assert_eq!(get_match(&e, loser.match_id).await.status, MatchStatus::Rejected);
  assert_eq!(state(&e, loser.initiator_id).await, ParticipantState::Idle);
  assert_consistent(&e, &[a, b, c]).await;
}

#[tokio::test]
async fn reject_releases_initiator_and_recipient_can_be_invited_again() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let c = join(&e, "c").await;
  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  let rejected = e.coordinator.reject(b, m.match_id).await.unwrap();
  assert_eq!(rejected.status, MatchStatus::Rejected);
  assert!(rejected.resolved_at.is_some());
  assert_eq!(state(&e, a).await, ParticipantState::Idle);

  let again = e.coordinator.invite(c, b, MatchMode::Challenge, None).await.unwrap();
  assert_eq!(again.status, MatchStatus::Pending);

  let err = e.coordinator.reject(b, m.match_id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved(_)));
  assert_consistent(&e, &[a, b, c]).await;
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn messages_read_back_in_order() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  let sid = session_of(&active);

  let first = e.sessions.append_message(sid, a, "  hello ").await.unwrap();
  assert_eq!(first.text, "hello");
  for i in 0..5 {
    let sender = if i % 2 == 0 { b } else { a };
    e.sessions.append_message(sid, sender, &format!("m{i}")).await.unwrap();
  }

  let all = e.sessions.read_messages(sid, b, None).await.unwrap();
  assert_eq!(all.len(), 6);
  assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
  assert_eq!(all[0].message_id, first.message_id);

  let later = e.sessions.read_messages(sid, a, Some(first.message_id)).await.unwrap();
  assert_eq!(later.len(), 5);
  assert_eq!(later[..], all[1..]);
}

#[tokio::test]
async fn append_checks_party_and_text() {
  let e = engine().await;
  let (a, _, active) = chatting(&e).await;
  let sid = session_of(&active);
  let outsider = join(&e, "outsider").await;

  assert!(matches!(
    e.sessions.append_message(sid, outsider, "hi").await,
    Err(Error::NotFound)
  ));
  assert!(matches!(
    e.sessions.append_message(Uuid::new_v4(), a, "hi").await,
    Err(Error::NotFound)
  ));
  assert!(matches!(e.sessions.append_message(sid, a, " \n ").await, Err(Error::EmptyMessage)));
  assert!(matches!(e.sessions.read_messages(sid, outsider, None).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn session_context_shows_partner_and_topic() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;

  let view = e.sessions.context(session_of(&active), a).await.unwrap();
  assert_eq!(view.partner.participant_id, b);
  assert_eq!(view.partner.status, ParticipantStatus::InChat);
  assert_eq!(view.session.suggested_topic.as_deref(), Some("tea"));
}

#[tokio::test]
async fn end_session_with_failing_summarizer_still_ends() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  let sid = session_of(&active);
  e.sessions.append_message(sid, a, "hi").await.unwrap();
  e.sessions.append_message(sid, b, "hey").await.unwrap();

  let ended = e.sessions.end_session(sid, b).await.unwrap();
  assert!(!ended.summarized);
  assert_eq!(ended.record.summary, "");
  assert!(ended.record.key_points.is_empty());
  assert_eq!(ended.record.match_id, active.match_id);

  assert_eq!(get_match(&e, active.match_id).await.status, MatchStatus::Ended);
  assert_eq!(state(&e, a).await, ParticipantState::Idle);
  assert_eq!(state(&e, b).await, ParticipantState::Idle);
  assert_consistent(&e, &[a, b]).await;

  let err = e.sessions.append_message(sid, a, "too late").await.unwrap_err();
  assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn end_session_archives_summary() {
  let summarizer = Counting::default();
  let e = engine_with(Down, summarizer.clone(), config()).await;
  let (a, b, active) = chatting(&e).await;
  let sid = session_of(&active);
  e.sessions.append_message(sid, a, "tabs").await.unwrap();
  e.sessions.append_message(sid, b, "spaces").await.unwrap();

  let ended = e.sessions.end_session(sid, a).await.unwrap();
  assert!(ended.summarized);
  assert_eq!(ended.record.summary, "2 lines");
  assert_eq!(ended.record.key_points, vec!["tabs", "spaces"]);
  assert_eq!(ended.record.topic.as_deref(), Some("tea"));
  assert_eq!(Some(ended.record.started_at), active.activated_at);
  assert_eq!(summarizer.0.load(Ordering::SeqCst), 1);

  for party in [a, b] {
    let history = e.sessions.history(party).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record_id, ended.record.record_id);
  }
}

#[tokio::test]
async fn empty_transcript_skips_summarizer() {
  let summarizer = Counting::default();
  let e = engine_with(Down, summarizer.clone(), config()).await;
  let (a, _, active) = chatting(&e).await;

  let ended = e.sessions.end_session(session_of(&active), a).await.unwrap();
  assert!(!ended.summarized);
  assert_eq!(summarizer.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ending_twice_is_already_resolved() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  let sid = session_of(&active);
  e.sessions.end_session(sid, a).await.unwrap();

  let err = e.sessions.end_session(sid, b).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved(id) if id == active.match_id));
  assert_eq!(e.sessions.history(a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ended_participants_can_match_again() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  e.sessions.end_session(session_of(&active), a).await.unwrap();

  let m = e.coordinator.invite(b, a, MatchMode::Challenge, None).await.unwrap();
  let again = e.coordinator.accept(a, m.match_id).await.unwrap();
  assert_ne!(again.session_id, active.session_id);
  assert_consistent(&e, &[a, b]).await;
}

#[tokio::test]
async fn watch_messages_follows_inserts() {
  let e = engine().await;
  let (a, b, active) = chatting(&e).await;
  let sid = session_of(&active);
  let outsider = join(&e, "outsider").await;
  assert!(matches!(e.sessions.watch_messages(sid, outsider).await, Err(Error::NotFound)));

  let mut sub = e.sessions.watch_messages(sid, b).await.unwrap();
  let sent = e.sessions.append_message(sid, a, "ping").await.unwrap();

  let delivery = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
  match delivery {
    Some(crate::hub::Delivery::Event(event)) => {
      assert!(matches!(event.row, parley_core::event::Row::Message(m) if m == sent));
    }
    other => panic!("unexpected delivery {other:?}"),
  }
}

// ─── Relay ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_snapshots_then_follows_and_deduplicates() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let mut stream = e.relay.subscribe(b);

  let first = next(&mut stream).await;
  assert!(matches!(&first, Notification::Participant(p) if p.participant_id == b));

  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  match next(&mut stream).await {
    Notification::Match(seen) => {
      assert_eq!(seen.match_id, m.match_id);
      assert_eq!(seen.status, MatchStatus::Pending);
    }
    other => panic!("unexpected {other:?}"),
  }

  // Several polls go by; none of them repeat what was already sent.
  assert!(timeout(Duration::from_millis(300), stream.next()).await.is_err());

  e.coordinator.reject(b, m.match_id).await.unwrap();
  match next(&mut stream).await {
    Notification::Match(seen) => assert_eq!(seen.status, MatchStatus::Rejected),
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn relay_poll_repairs_missed_changes() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let mut stream = e.relay.subscribe(a);
  next(&mut stream).await;

  // Written straight to the store, so the hub never hears of it.
  let applied = e
    .store
    .commit(vec![Write::participant(
      a,
      ParticipantGuard::status(ParticipantStatus::Idle),
      ParticipantState::Searching,
    )])
    .await
    .unwrap();
  assert!(applied.is_applied());

  match next(&mut stream).await {
    Notification::Participant(p) => assert_eq!(p.state, ParticipantState::Searching),
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn relay_drops_pushed_image_older_than_what_it_sent() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let mut stream = e.relay.subscribe(a);
  let idle = match next(&mut stream).await {
    Notification::Participant(p) => p,
    other => panic!("unexpected {other:?}"),
  };

  e.store
    .commit(vec![Write::participant(
      a,
      ParticipantGuard::status(ParticipantStatus::Idle),
      ParticipantState::Searching,
    )])
    .await
    .unwrap();
  match next(&mut stream).await {
    Notification::Participant(p) => assert_eq!(p.state, ParticipantState::Searching),
    other => panic!("unexpected {other:?}"),
  }

  // A late delivery of the earlier image.
  e.hub.publish(ChangeEvent::update(Row::Participant(idle)));
  assert!(timeout(Duration::from_millis(300), stream.next()).await.is_err());
  assert_eq!(state(&e, a).await, ParticipantState::Searching);
}

#[tokio::test]
async fn relay_converges_on_store_after_a_bogus_newer_image() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let mut stream = e.relay.subscribe(a);
  let idle = match next(&mut stream).await {
    Notification::Participant(p) => p,
    other => panic!("unexpected {other:?}"),
  };

  let ahead = Participant {
    state: ParticipantState::Searching,
    status_changed_at: idle.status_changed_at + chrono::Duration::hours(1),
    ..idle.clone()
  };
  e.hub.publish(ChangeEvent::update(Row::Participant(ahead.clone())));
  assert_eq!(next(&mut stream).await, Notification::Participant(ahead));

  // The next poll reads the real row and replaces the cached image.
  let current = e.coordinator.participant(a).await.unwrap();
  assert_eq!(current, idle);
  assert_eq!(next(&mut stream).await, Notification::Participant(current));
}

#[tokio::test]
async fn relay_follows_initiator_through_activation() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let mut stream = e.relay.subscribe(a);
  next(&mut stream).await;

  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  e.coordinator.accept(b, m.match_id).await.unwrap();

  let mut in_chat = false;
  let mut active = false;
  while !(in_chat && active) {
    match next(&mut stream).await {
      Notification::Participant(p) => in_chat |= p.state == ParticipantState::InChat(m.match_id),
      Notification::Match(seen) => active |= seen.status == MatchStatus::Active,
    }
  }
}

#[tokio::test]
async fn dropping_relay_stream_stops_its_task() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let mut stream = e.relay.subscribe(a);
  next(&mut stream).await;
  assert_eq!(e.hub.subscriber_count(), 1);

  drop(stream);
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(e.hub.subscriber_count(), 0);
}

// ─── Sweep ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_releases_stale_searches_and_expires_invitations() {
  let e = engine_with(Down, Down, EngineConfig {
    search_lease_ms: 0,
    invite_ttl_ms: 0,
    ..config()
  })
  .await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let c = join(&e, "c").await;

  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();
  e.store
    .commit(vec![Write::participant(
      c,
      ParticipantGuard::status(ParticipantStatus::Idle),
      ParticipantState::Searching,
    )])
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;

  let report = e.sweeper().sweep_once().await.unwrap();
  assert_eq!(report.searches_released, 1);
  assert_eq!(report.invitations_expired, 1);
  assert_eq!(state(&e, c).await, ParticipantState::Idle);
  assert_eq!(state(&e, a).await, ParticipantState::Idle);
  assert_eq!(get_match(&e, m.match_id).await.status, MatchStatus::Rejected);
  assert_consistent(&e, &[a, b, c]).await;

  assert!(e.sweeper().sweep_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_leaves_fresh_state_alone() {
  let e = engine().await;
  let a = join(&e, "a").await;
  let b = join(&e, "b").await;
  let m = e.coordinator.invite(a, b, MatchMode::Affinity, None).await.unwrap();

  assert!(e.sweeper().sweep_once().await.unwrap().is_empty());
  assert_eq!(get_match(&e, m.match_id).await.status, MatchStatus::Pending);
  assert_eq!(state(&e, a).await, ParticipantState::Matched(m.match_id));
}
