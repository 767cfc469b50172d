//! In-process notification channel for row-level change events.
//!
//! Every committed write is published here as a [`ChangeEvent`]. Subscribers
//! pick the rows they care about with a [`ChangeFilter`]. Delivery is
//! best-effort: a subscriber that falls behind the channel capacity loses the
//! oldest events and is told how many it missed, so it can re-read state
//! instead.

use futures::Stream;
use parley_core::event::{ChangeEvent, ChangeFilter};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt as _, wrappers::BroadcastStream};

/// Broadcast hub for change events.
///
/// Thread-safe, cloneable; all clones share one channel.
#[derive(Clone)]
pub struct ChangeHub {
  tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
  /// Create a hub with default capacity (1024 events).
  pub fn new() -> Self { Self::with_capacity(1024) }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { tx: broadcast::channel(capacity).0 }
  }

  /// Publish one event. No-op if nobody is subscribed.
  pub fn publish(&self, event: ChangeEvent) {
    // A send error only means there are no receivers.
    let _ = self.tx.send(event);
  }

  pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
    for event in events {
      self.publish(event);
    }
  }

  /// Subscribe to events matching `filter`. Dropping the subscription
  /// unsubscribes.
  pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
    Subscription { rx: self.tx.subscribe(), filter }
  }

  pub fn subscriber_count(&self) -> usize { self.tx.receiver_count() }
}

impl Default for ChangeHub {
  fn default() -> Self { Self::new() }
}

/// What a [`Subscription`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
  Event(ChangeEvent),
  /// The subscriber fell behind and this many events were dropped.
  Lagged(u64),
}

/// A filtered view of the hub.
pub struct Subscription {
  rx:     broadcast::Receiver<ChangeEvent>,
  filter: ChangeFilter,
}

impl Subscription {
  /// Wait for the next matching event. Returns `None` once every hub handle
  /// has been dropped.
  pub async fn recv(&mut self) -> Option<Delivery> {
    loop {
      match self.rx.recv().await {
        Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(missed)) => {
          tracing::debug!(missed, "change subscription lagged");
          return Some(Delivery::Lagged(missed));
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Convert into a stream of matching events, silently skipping lag.
  pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
    let filter = self.filter;
    BroadcastStream::new(self.rx).filter_map(move |result| match result {
      Ok(event) if filter.matches(&event) => Some(event),
      Ok(_) => None,
      Err(lagged) => {
        tracing::debug!(%lagged, "change stream lagged");
        None
      }
    })
  }
}
