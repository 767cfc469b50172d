//! Seams to the external services the core consults but does not own: the
//! candidate recommender and the summarizer.
//!
//! Both may fail or time out. Callers always have a fallback, so
//! implementations should report failure rather than retry internally.
//! Wire types use camelCase field names, matching the JSON the services
//! speak.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{matching::MatchMode, session::Message};

// ─── Recommender ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
  pub requester_id: Uuid,
  pub mode:         MatchMode,
  pub topic_hint:   Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
  /// Best candidate first.
  #[serde(alias = "recommendedUserIds")]
  pub candidate_ids: Vec<Uuid>,
}

/// Orders candidate participants for a requester.
pub trait Recommender: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn recommend(
    &self,
    request: RecommendationRequest,
  ) -> impl Future<Output = Result<Recommendation, Self::Error>> + Send + '_;
}

// ─── Summarizer ──────────────────────────────────────────────────────────────

/// One transcript entry as sent to the summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
  pub sender_id: Uuid,
  pub text:      String,
  pub sent_at:   DateTime<Utc>,
}

impl From<&Message> for TranscriptLine {
  fn from(m: &Message) -> Self {
    Self {
      sender_id: m.sender_id,
      text:      m.text.clone(),
      sent_at:   m.created_at,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
  pub transcript: Vec<TranscriptLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
  pub summary:    String,
  #[serde(default)]
  pub key_points: Vec<String>,
}

/// Condenses a finished conversation into prose and key points.
pub trait Summarizer: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn summarize(
    &self,
    request: SummaryRequest,
  ) -> impl Future<Output = Result<Summary, Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recommendation_accepts_legacy_field_name() {
    let id = Uuid::new_v4();
    let json = format!(r#"{{"recommendedUserIds":["{id}"]}}"#);
    let rec: Recommendation = serde_json::from_str(&json).unwrap();
    assert_eq!(rec.candidate_ids, vec![id]);
  }

  #[test]
  fn summary_key_points_default_to_empty() {
    let s: Summary = serde_json::from_str(r#"{"summary":"short chat"}"#).unwrap();
    assert_eq!(s.summary, "short chat");
    assert!(s.key_points.is_empty());
  }
}
