//! Pure compatibility scoring between founder profiles.

use std::collections::HashSet;

use cfme_core::{Profile, ScoreBreakdown};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "cfme-score";

fn normalize_labels(labels: &[String]) -> HashSet<String> {
    labels
        .iter()
        .map(|label| label.trim().to_lowercase())
        .filter(|label| !label.is_empty())
        .collect()
}

/// Case-insensitive Jaccard similarity between two label lists treated as
/// sets: intersection size over union size, in [0, 1].
///
/// Either side empty after normalization yields 0.0 by convention; the
/// empty-union case is guarded explicitly so the result is never NaN.
pub fn set_similarity(a: &[String], b: &[String]) -> f64 {
    let a = normalize_labels(a);
    let b = normalize_labels(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    intersection as f64 / union as f64
}

/// Number of labels the two lists share, case-insensitive.
pub fn shared_count(a: &[String], b: &[String]) -> usize {
    normalize_labels(a).intersection(&normalize_labels(b)).count()
}

#[derive(Debug, Error, PartialEq)]
pub enum WeightError {
    #[error("dimension weight must be a finite non-negative number, got {0}")]
    InvalidWeight(f64),
    #[error("dimension weights sum to {0}; expected a positive total")]
    ZeroTotal(f64),
}

/// Scorer weights plus the two coarse location scores.
///
/// Locations are free-text strings with no geocoding behind them, so the
/// location dimension is exact-match-or-not rather than a distance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub skills_weight: f64,
    pub interests_weight: f64,
    pub location_weight: f64,
    pub experience_weight: f64,
    pub location_match_score: f64,
    pub location_fallback_score: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            skills_weight: 1.0,
            interests_weight: 1.0,
            location_weight: 1.0,
            experience_weight: 1.0,
            location_match_score: 90.0,
            location_fallback_score: 35.0,
        }
    }
}

impl ScorerConfig {
    /// Validates at configuration-load time, never mid-computation.
    pub fn validate(&self) -> Result<(), WeightError> {
        let weights = [
            self.skills_weight,
            self.interests_weight,
            self.location_weight,
            self.experience_weight,
        ];
        for weight in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(WeightError::InvalidWeight(weight));
            }
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(WeightError::ZeroTotal(total));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compatibility {
    pub breakdown: ScoreBreakdown,
    pub overall: f64,
}

/// Weighted multi-dimension compatibility scorer. Side-effect-free; any
/// profile input degrades to zero/neutral dimension values rather than
/// erroring.
#[derive(Debug, Clone)]
pub struct CompatibilityScorer {
    config: ScorerConfig,
}

impl CompatibilityScorer {
    pub fn new(config: ScorerConfig) -> Result<Self, WeightError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Scores skills, interests and location. The experience dimension is
    /// omitted and the overall mean renormalized over the remaining weights;
    /// no synthetic placeholder is ever generated for it.
    pub fn score(&self, subject: &Profile, candidate: &Profile) -> Compatibility {
        self.score_inner(subject, candidate, None)
    }

    /// Scores with a caller-supplied experience signal in [0, 100]. The
    /// engine has no reliable experience data of its own, so the dimension
    /// participates only when a caller provides one.
    pub fn score_with_experience(
        &self,
        subject: &Profile,
        candidate: &Profile,
        experience: f64,
    ) -> Compatibility {
        let experience = if experience.is_finite() {
            experience.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.score_inner(subject, candidate, Some(experience))
    }

    fn location_score(&self, subject: &Profile, candidate: &Profile) -> f64 {
        match (subject.location.as_deref(), candidate.location.as_deref()) {
            (Some(a), Some(b)) => {
                let a = a.trim();
                if !a.is_empty() && a.eq_ignore_ascii_case(b.trim()) {
                    self.config.location_match_score
                } else {
                    self.config.location_fallback_score
                }
            }
            _ => self.config.location_fallback_score,
        }
    }

    fn score_inner(&self, subject: &Profile, candidate: &Profile, experience: Option<f64>) -> Compatibility {
        let skills = (set_similarity(&subject.skills, &candidate.skills) * 100.0).round();
        let interests = (set_similarity(&subject.interests, &candidate.interests) * 100.0).round();
        let location = self.location_score(subject, candidate).clamp(0.0, 100.0);

        let mut weighted = skills * self.config.skills_weight
            + interests * self.config.interests_weight
            + location * self.config.location_weight;
        let mut total_weight =
            self.config.skills_weight + self.config.interests_weight + self.config.location_weight;
        if let Some(exp) = experience {
            weighted += exp * self.config.experience_weight;
            total_weight += self.config.experience_weight;
        }

        let overall = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Compatibility {
            breakdown: ScoreBreakdown {
                skills,
                interests,
                location,
                experience,
            },
            overall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfme_core::UserId;
    use chrono::{TimeZone, Utc};

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mk_profile(id: &str, skills: &[&str], interests: &[&str], location: Option<&str>) -> Profile {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        Profile {
            id: UserId::from(id),
            first_name: None,
            last_name: None,
            avatar_url: None,
            bio: None,
            location: location.map(str::to_string),
            skills: labels(skills),
            interests: labels(interests),
            work_style: None,
            weekly_availability: None,
            active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = labels(&["Rust", "Sales", "Design"]);
        let b = labels(&["rust", "marketing"]);
        assert_eq!(set_similarity(&a, &b), set_similarity(&b, &a));
    }

    #[test]
    fn similarity_of_identical_nonempty_sets_is_one() {
        let a = labels(&["React", "Node"]);
        assert_eq!(set_similarity(&a, &a), 1.0);
    }

    #[test]
    fn empty_inputs_yield_zero_not_nan() {
        let empty: Vec<String> = Vec::new();
        let nonempty = labels(&["React"]);
        assert_eq!(set_similarity(&empty, &empty), 0.0);
        assert_eq!(set_similarity(&empty, &nonempty), 0.0);
        assert_eq!(set_similarity(&nonempty, &empty), 0.0);
    }

    #[test]
    fn duplicates_and_case_do_not_inflate_similarity() {
        let a = labels(&["React", "react", " REACT "]);
        let b = labels(&["React"]);
        assert_eq!(set_similarity(&a, &b), 1.0);
        assert_eq!(shared_count(&a, &b), 1);
    }

    #[test]
    fn one_shared_of_three_scores_a_third() {
        let subject = mk_profile("a", &["React", "Node"], &[], None);
        let candidate = mk_profile("b", &["React", "Python"], &[], None);
        let scorer = CompatibilityScorer::new(ScorerConfig::default()).unwrap();
        let result = scorer.score(&subject, &candidate);
        assert_eq!(result.breakdown.skills, 33.0);
    }

    #[test]
    fn all_dimensions_stay_within_range() {
        let subject = mk_profile("a", &["Rust"], &["Hiking"], Some("Berlin"));
        let candidate = mk_profile("b", &["Rust"], &["Hiking"], Some("berlin"));
        let scorer = CompatibilityScorer::new(ScorerConfig::default()).unwrap();
        let result = scorer.score(&subject, &candidate);
        for value in [
            result.breakdown.skills,
            result.breakdown.interests,
            result.breakdown.location,
            result.overall,
        ] {
            assert!((0.0..=100.0).contains(&value), "out of range: {value}");
        }
        assert_eq!(result.breakdown.location, 90.0);
        assert_eq!(result.breakdown.experience, None);
    }

    #[test]
    fn missing_location_falls_back_to_coarse_score() {
        let subject = mk_profile("a", &[], &[], None);
        let candidate = mk_profile("b", &[], &[], Some("Lisbon"));
        let scorer = CompatibilityScorer::new(ScorerConfig::default()).unwrap();
        assert_eq!(scorer.score(&subject, &candidate).breakdown.location, 35.0);
    }

    #[test]
    fn experience_only_participates_when_supplied() {
        let subject = mk_profile("a", &["Rust"], &[], Some("Berlin"));
        let candidate = mk_profile("b", &["Rust"], &[], Some("Berlin"));
        let scorer = CompatibilityScorer::new(ScorerConfig::default()).unwrap();

        let without = scorer.score(&subject, &candidate);
        // skills 100, interests 0, location 90 under equal weights
        assert!((without.overall - 190.0 / 3.0).abs() < 1e-9);

        let with = scorer.score_with_experience(&subject, &candidate, 50.0);
        assert_eq!(with.breakdown.experience, Some(50.0));
        assert!((with.overall - 240.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_weights_fail_at_construction() {
        let negative = ScorerConfig {
            skills_weight: -1.0,
            ..ScorerConfig::default()
        };
        assert_eq!(
            CompatibilityScorer::new(negative).unwrap_err(),
            WeightError::InvalidWeight(-1.0)
        );

        let zeroed = ScorerConfig {
            skills_weight: 0.0,
            interests_weight: 0.0,
            location_weight: 0.0,
            experience_weight: 0.0,
            ..ScorerConfig::default()
        };
        assert_eq!(
            CompatibilityScorer::new(zeroed).unwrap_err(),
            WeightError::ZeroTotal(0.0)
        );
    }
}
