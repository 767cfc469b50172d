//! `GET /events`: the caller's presence relay as Server-Sent Events.
//!
//! Each event is named after the row it carries (`participant` or `match`)
//! and holds the full current row as JSON. Events are level-triggered, so a
//! reconnecting client simply replaces its view with what it receives.

use std::convert::Infallible;

use axum::{
  extract::State,
  response::sse::{Event, KeepAlive, Sse},
};
use futures::{
  Stream,
  stream::{self, StreamExt},
};
use parley_core::store::MatchStore;
use parley_engine::Notification;

use crate::{AppState, Caller};

fn to_event(notification: &Notification) -> Option<Event> {
  let event = match notification {
    Notification::Participant(p) => Event::default().event("participant").json_data(p),
    Notification::Match(m) => Event::default().event("match").json_data(m),
  };
  match event {
    Ok(event) => Some(event),
    Err(e) => {
      tracing::warn!(error = %e, "failed to encode relay notification");
      None
    }
  }
}

/// `GET /events`
pub async fn stream<S>(
  State(state): State<AppState<S>>,
  Caller(caller): Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
  S: MatchStore + 'static,
{
  tracing::debug!(participant = %caller, "relay client connected");
  let relay = state.engine.relay.subscribe(caller);

  let connected =
    stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });
  let events = relay.filter_map(|n| async move { to_event(&n).map(Ok) });

  Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
