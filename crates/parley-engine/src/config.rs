//! Tunables for the engine, deserialised from the `[engine]` table of the
//! server configuration. Every field has a default.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How often each relay re-reads its participant's rows.
  pub poll_interval_ms:    u64,
  /// Candidates returned by the fallback when the recommender has none.
  pub fallback_cap:        usize,
  /// Upper bound on a recommender or summarizer call.
  pub upstream_timeout_ms: u64,
  pub sweep_interval_ms:   u64,
  /// How long a participant may stay `Searching` before the sweep resets it.
  pub search_lease_ms:     u64,
  /// How long an invitation may stay pending before the sweep rejects it.
  pub invite_ttl_ms:       u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms:    3_000,
      fallback_cap:        3,
      upstream_timeout_ms: 10_000,
      sweep_interval_ms:   30_000,
      search_lease_ms:     60_000,
      invite_ttl_ms:       600_000,
    }
  }
}

impl EngineConfig {
  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }

  pub fn upstream_timeout(&self) -> Duration {
    Duration::from_millis(self.upstream_timeout_ms)
  }

  pub fn sweep_interval(&self) -> Duration { Duration::from_millis(self.sweep_interval_ms) }

  pub fn search_lease(&self) -> Duration { Duration::from_millis(self.search_lease_ms) }

  pub fn invite_ttl(&self) -> Duration { Duration::from_millis(self.invite_ttl_ms) }
}
