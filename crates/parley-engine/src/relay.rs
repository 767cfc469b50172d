//! Per-client presence relay.
//!
//! A relay follows one participant: its own row, the match it is bound to,
//! and every match addressed to it. Rows reach the relay two ways, pushed
//! from the [`ChangeHub`] and re-read from the store on a fixed interval, and
//! both paths feed the same deduplicating filter. What comes out is
//! level-triggered: each [`Notification`] is the full current row, emitted
//! only when it differs from the last one sent for that row. A pushed image
//! older than the last one sent is dropped; a polled image always wins.

use std::{
  collections::{HashMap, HashSet},
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
  time::Duration,
};

use futures::Stream;
use parley_core::{
  event::{ChangeFilter, Row},
  matching::{Match, MatchStatus},
  participant::Participant,
  store::{MatchQuery, MatchStore},
};
use serde::Serialize;
use tokio::{
  sync::mpsc,
  task::JoinHandle,
  time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::hub::{ChangeHub, Delivery, Subscription};

/// Buffered notifications per client before the relay task waits.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum Notification {
  Participant(Participant),
  Match(Match),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
  Participant(Uuid),
  Match(Uuid),
}

/// Position of a match status along its lifecycle.
fn stage(status: MatchStatus) -> u8 {
  match status {
    MatchStatus::Pending => 0,
    MatchStatus::Accepted => 1,
    MatchStatus::Active => 2,
    MatchStatus::Rejected | MatchStatus::Ended => 3,
  }
}

impl Notification {
  fn from_row(row: Row) -> Option<Self> {
    match row {
      Row::Participant(p) => Some(Self::Participant(p)),
      Row::Match(m) => Some(Self::Match(m)),
      Row::Message(_) | Row::Record(_) => None,
    }
  }

  fn key(&self) -> RowKey {
    match self {
      Self::Participant(p) => RowKey::Participant(p.participant_id),
      Self::Match(m) => RowKey::Match(m.match_id),
    }
  }

  /// Whether this image is at least as recent as `previous` for the same
  /// row. Pushed events may arrive after a poll already saw a newer state.
  fn not_older_than(&self, previous: &Self) -> bool {
    match (self, previous) {
      (Self::Participant(new), Self::Participant(old)) => {
        new.status_changed_at >= old.status_changed_at
      }
      (Self::Match(new), Self::Match(old)) => stage(new.status) >= stage(old.status),
      _ => true,
    }
  }
}

/// Where an image came from. A poll reads the store as it is now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
  Pushed,
  Polled,
}

// ─── Relay ───────────────────────────────────────────────────────────────────

pub struct Relay<S> {
  store:         Arc<S>,
  hub:           ChangeHub,
  poll_interval: Duration,
}

impl<S: MatchStore + 'static> Relay<S> {
  pub fn new(store: Arc<S>, hub: ChangeHub, poll_interval: Duration) -> Self {
    Self { store, hub, poll_interval }
  }

  /// Start following `participant_id`. The first notifications are a
  /// snapshot of the current rows; changes follow. The background task
  /// stops when the returned stream is dropped.
  pub fn subscribe(&self, participant_id: Uuid) -> RelayStream {
    let sub = self.hub.subscribe(ChangeFilter::party(participant_id));
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let watcher = Watcher {
      store: Arc::clone(&self.store),
      participant_id,
      watched: HashSet::new(),
      last: HashMap::new(),
    };
    let task = tokio::spawn(watcher.run(sub, tx, self.poll_interval));
    RelayStream { rx, task }
  }
}

/// The notifications of one relay subscription.
pub struct RelayStream {
  rx:   mpsc::Receiver<Notification>,
  task: JoinHandle<()>,
}

impl Stream for RelayStream {
  type Item = Notification;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Notification>> {
    self.rx.poll_recv(cx)
  }
}

impl Drop for RelayStream {
  fn drop(&mut self) { self.task.abort(); }
}

// ─── Background task ─────────────────────────────────────────────────────────

struct Watcher<S> {
  store:          Arc<S>,
  participant_id: Uuid,
  /// Non-terminal matches seen so far; re-read on every poll.
  watched:        HashSet<Uuid>,
  /// Last image sent per row. Terminal matches are evicted once sent.
  last:           HashMap<RowKey, Notification>,
}

impl<S: MatchStore> Watcher<S> {
  async fn run(
    mut self,
    mut sub: Subscription,
    tx: mpsc::Sender<Notification>,
    poll_interval: Duration,
  ) {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      let fresh: Vec<Notification> = tokio::select! {
        _ = tx.closed() => break,
        delivery = sub.recv() => match delivery {
          Some(Delivery::Event(event)) => {
            Notification::from_row(event.row)
              .and_then(|n| self.admit(n, Source::Pushed))
              .into_iter()
              .collect()
          }
          Some(Delivery::Lagged(missed)) => {
            tracing::debug!(participant = %self.participant_id, missed, "relay lagged, re-polling");
            self.poll().await
          }
          None => break,
        },
        _ = ticker.tick() => self.poll().await,
      };

      for notification in fresh {
        if tx.send(notification).await.is_err() {
          return;
        }
      }
    }
    tracing::debug!(participant = %self.participant_id, "relay stopped");
  }

  /// Record `n` and return it if it is new information.
  fn admit(&mut self, n: Notification, source: Source) -> Option<Notification> {
    let terminal = match &n {
      Notification::Match(m) if m.status.is_terminal() => {
        self.watched.remove(&m.match_id);
        true
      }
      Notification::Match(m) => {
        self.watched.insert(m.match_id);
        false
      }
      Notification::Participant(_) => false,
    };

    let key = n.key();
    if let Some(previous) = self.last.get(&key) {
      let stale = source == Source::Pushed && !n.not_older_than(previous);
      if *previous == n || stale {
        tracing::debug!(participant = %self.participant_id, ?key, "relay suppressed row");
        return None;
      }
    }
    if terminal {
      self.last.remove(&key);
    } else {
      self.last.insert(key, n.clone());
    }
    Some(n)
  }

  /// Re-read every followed row. Read failures are logged and retried on
  /// the next tick.
  async fn poll(&mut self) -> Vec<Notification> {
    let pid = self.participant_id;
    let mut rows = Vec::new();

    match self.store.get_participant(pid).await {
      Ok(Some(p)) => {
        if let Some(match_id) = p.current_match_id() {
          self.watched.insert(match_id);
        }
        rows.push(Notification::Participant(p));
      }
      Ok(None) => {}
      Err(e) => tracing::warn!(participant = %pid, error = %e, "relay failed to read participant"),
    }

    let mut seen = HashSet::new();
    let query = MatchQuery::pending().addressed_to(pid);
    match self.store.list_matches(&query).await {
      Ok(pending) => {
        for m in pending {
          seen.insert(m.match_id);
          rows.push(Notification::Match(m));
        }
      }
      Err(e) => tracing::warn!(participant = %pid, error = %e, "relay failed to list invitations"),
    }

    let watched: Vec<Uuid> = self.watched.difference(&seen).copied().collect();
    for match_id in watched {
      match self.store.get_match(match_id).await {
        Ok(Some(m)) => rows.push(Notification::Match(m)),
        Ok(None) => {
          self.watched.remove(&match_id);
        }
        Err(e) => tracing::warn!(%match_id, error = %e, "relay failed to read match"),
      }
    }

    rows.into_iter().filter_map(|n| self.admit(n, Source::Polled)).collect()
  }
}
