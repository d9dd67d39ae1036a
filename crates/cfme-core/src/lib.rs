//! Core domain model for the co-founder match engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cfme-core";

/// Opaque, stable user identifier issued by the hosted store.
///
/// Ordered so that ranked output can break ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn default_true() -> bool {
    true
}

/// Founder profile as mapped from the hosted store row.
///
/// `skills` and `interests` arrive as ordered lists and may contain
/// duplicates; scoring treats them as case-insensitive sets. A profile with
/// `active = false` is soft-deactivated and behaves as not-found for every
/// relying computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub work_style: Option<String>,
    #[serde(default)]
    pub weekly_availability: Option<u8>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.id.to_string()
        } else {
            name
        }
    }
}

/// Precomputed server-side similarity row, consumed as-is.
///
/// Directed: a `(subject, candidate)` row carries no guarantee that the
/// reverse row exists or agrees in value. Scores live on the 0-100 scale and
/// are clamped at the read boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub subject_id: UserId,
    pub candidate_id: UserId,
    pub skills_score: f64,
    pub interests_score: f64,
    pub overall_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Requested,
    Matched,
    Mutual,
}

impl ConnectionStatus {
    pub fn is_mutual(self) -> bool {
        matches!(self, ConnectionStatus::Mutual)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Requested => "requested",
            ConnectionStatus::Matched => "matched",
            ConnectionStatus::Mutual => "mutual",
        };
        f.write_str(label)
    }
}

/// Directed connection edge persisted in the store.
///
/// A mutual pair is two rows, one per direction, both eventually `mutual`;
/// a transient one-row window is tolerated and repaired by the lifecycle.
/// `score` is snapshotted when the row is created and survives the status
/// promotion unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub requester_id: UserId,
    pub target_id: UserId,
    pub status: ConnectionStatus,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(requester_id: UserId, target_id: UserId, status: ConnectionStatus, score: f64) -> Self {
        let now = Utc::now();
        Self {
            requester_id,
            target_id,
            status,
            score,
            created_at: now,
            updated_at: now,
        }
    }

    /// The non-`user` side of the edge, if `user` is on it at all.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if self.requester_id == *user {
            Some(&self.target_id)
        } else if self.target_id == *user {
            Some(&self.requester_id)
        } else {
            None
        }
    }
}

/// Pair state as seen from one side of the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairState {
    None,
    Requested,
    Incoming,
    Mutual,
}

/// Where a candidate entry came from, surfaced so callers can distinguish
/// real matches from synthesized fallback entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrigin {
    Precomputed,
    Mutual,
    Fallback,
}

/// Per-dimension compatibility scores, each on 0-100.
///
/// `experience` stays `None` unless the caller supplied a real signal; the
/// declared profile attributes carry none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub skills: f64,
    pub interests: f64,
    pub location: f64,
    #[serde(default)]
    pub experience: Option<f64>,
}

/// Derived, ephemeral candidate entry. Built fresh on every query and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateMatch {
    pub profile: Profile,
    pub breakdown: ScoreBreakdown,
    pub overall: f64,
    pub is_mutual: bool,
    pub origin: MatchOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// Locally generated weighted blend of profile features.
    Hybrid,
    /// Server-produced rows read back through the same table.
    SkillBased,
}

/// Raw feature counts plus the weighted point contribution of each feature,
/// persisted alongside the final score for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationFeatures {
    pub shared_skills: usize,
    pub shared_interests: usize,
    pub skill_points: f64,
    pub interest_points: f64,
    pub collaboration_points: f64,
    pub location_points: f64,
}

/// Persisted, explainable recommendation row, upsert-keyed by
/// `(subject_id, candidate_id, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub subject_id: UserId,
    pub candidate_id: UserId,
    pub score: f64,
    pub kind: RecommendationKind,
    pub features: RecommendationFeatures,
}
