//! Error types for `parley-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} value: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("participant {0} has status {1} but current match {2:?}")]
  InconsistentParticipant(Uuid, String, Option<Uuid>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
