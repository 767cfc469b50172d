//! Error taxonomy for engine operations.
//!
//! `AlreadyMatched`, `AlreadyResolved` and `ConcurrentModification` report a
//! race lost to another client. They are expected under contention: callers
//! refresh their view and re-present options rather than retry blindly.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// The caller is not in the state the operation requires.
  #[error("invalid state: {0}")]
  InvalidState(String),

  /// The participant is already bound to another match.
  #[error("participant {0} is already matched")]
  AlreadyMatched(Uuid),

  /// Another actor already moved the match out of the expected status.
  #[error("match {0} is already resolved")]
  AlreadyResolved(Uuid),

  #[error("concurrent modification: {0}")]
  ConcurrentModification(String),

  /// An external service failed or timed out and no fallback applied.
  #[error("{0} unavailable")]
  UpstreamUnavailable(&'static str),

  /// Missing, or the caller is not a party to it. The two are
  /// indistinguishable on purpose.
  #[error("not found")]
  NotFound,

  #[error("message text is empty")]
  EmptyMessage,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether this is the expected outcome of losing a race.
  pub fn is_race(&self) -> bool {
    matches!(
      self,
      Self::AlreadyMatched(_) | Self::AlreadyResolved(_) | Self::ConcurrentModification(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
