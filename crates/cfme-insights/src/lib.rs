//! Rule-based analytics over a finalized candidate match set.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use cfme_core::{CandidateMatch, MatchOrigin, UserId};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

pub const CRATE_NAME: &str = "cfme-insights";

/// A dimension at or above this drives the match-reason text.
const REASON_THRESHOLD: f64 = 80.0;
/// Labels at or above this Jaro-Winkler similarity fold into one tally entry.
const LABEL_FOLD_THRESHOLD: f64 = 0.92;
const TOP_TRENDS: usize = 5;

const NO_DATA_SUMMARY: &str =
    "No matches to analyze yet. Connect with more founders to unlock insights.";

#[derive(Debug, Clone, Deserialize)]
pub struct TopicRule {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Fixed keyword taxonomy used for topic clustering.
///
/// This is a deterministic rule-based classifier, not statistical
/// clustering; a real clustering algorithm can replace it behind the same
/// `analyze_with` interface. The rule set can be overridden from a YAML
/// file without code changes.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicTaxonomy {
    pub clusters: Vec<TopicRule>,
}

impl TopicTaxonomy {
    pub fn builtin() -> Self {
        let rule = |name: &str, keywords: &[&str]| TopicRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        Self {
            clusters: vec![
                rule(
                    "Technology",
                    &[
                        "software", "engineer", "developer", "react", "node", "rust", "python",
                        "cloud", "devops", "mobile", "web", "ai", "machine learning",
                    ],
                ),
                rule(
                    "Business Operations",
                    &["sales", "marketing", "operations", "finance", "growth", "strategy", "product"],
                ),
                rule(
                    "Creative",
                    &["design", "ux", "ui", "brand", "content", "video", "writing", "art"],
                ),
                rule(
                    "Data & Analytics",
                    &["data", "analytics", "statistics", "sql", "visualization", "research"],
                ),
                rule(
                    "Consulting",
                    &["consulting", "advisory", "coaching", "mentoring", "legal", "accounting"],
                ),
            ],
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCluster {
    pub name: String,
    pub matches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreBucket {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelTrend {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchInsights {
    pub total_matches: usize,
    pub mutual_count: usize,
    /// Fallback-tagged entries, counted apart so synthetic matches never
    /// masquerade as real ones in reporting.
    pub synthetic_count: usize,
    pub average_score: f64,
    pub top_skills: Vec<LabelTrend>,
    pub top_interests: Vec<LabelTrend>,
    pub clusters: Vec<TopicCluster>,
    pub score_distribution: Vec<ScoreBucket>,
    pub summary: String,
}

const BUCKET_LABELS: [&str; 6] = ["90-100", "80-89", "70-79", "60-69", "50-59", "<50"];

fn bucket_index(score: f64) -> usize {
    if score >= 90.0 {
        0
    } else if score >= 80.0 {
        1
    } else if score >= 70.0 {
        2
    } else if score >= 60.0 {
        3
    } else if score >= 50.0 {
        4
    } else {
        5
    }
}

fn empty_buckets() -> Vec<ScoreBucket> {
    BUCKET_LABELS
        .iter()
        .map(|label| ScoreBucket {
            label: label.to_string(),
            count: 0,
        })
        .collect()
}

/// Tallies label frequency across candidates, folding near-duplicate
/// spellings ("Javascript" / "JavaScript") into the first-seen form.
fn tally_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<LabelTrend> {
    let mut tallies: Vec<(String, String, usize)> = Vec::new();
    for label in labels {
        let display = label.trim();
        if display.is_empty() {
            continue;
        }
        let folded = display.to_lowercase();
        let existing = tallies
            .iter()
            .position(|(_, seen, _)| jaro_winkler(seen.as_str(), &folded) >= LABEL_FOLD_THRESHOLD);
        match existing {
            Some(index) => tallies[index].2 += 1,
            None => tallies.push((display.to_string(), folded, 1)),
        }
    }
    tallies.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    tallies
        .into_iter()
        .take(TOP_TRENDS)
        .map(|(label, _, count)| LabelTrend { label, count })
        .collect()
}

fn cluster_counts(taxonomy: &TopicTaxonomy, candidates: &[CandidateMatch]) -> Vec<TopicCluster> {
    let mut clusters: Vec<TopicCluster> = taxonomy
        .clusters
        .iter()
        .map(|rule| {
            let matches = candidates
                .iter()
                .flat_map(|c| c.profile.skills.iter().chain(c.profile.interests.iter()))
                .map(|label| {
                    let label = label.to_lowercase();
                    rule.keywords
                        .iter()
                        .filter(|keyword| label.contains(&keyword.to_lowercase()))
                        .count()
                })
                .sum();
            TopicCluster {
                name: rule.name.clone(),
                matches,
            }
        })
        .filter(|cluster| cluster.matches > 0)
        .collect();
    clusters.sort_by(|a, b| b.matches.cmp(&a.matches).then_with(|| a.name.cmp(&b.name)));
    clusters
}

fn summary_text(
    total: usize,
    mutual: usize,
    average: f64,
    top_skills: &[LabelTrend],
    top_interests: &[LabelTrend],
) -> String {
    let mut text = format!(
        "Analyzed {total} matches ({mutual} mutual), average compatibility {average:.0}."
    );
    if let Some(skill) = top_skills.first() {
        text.push_str(&format!(" Most common shared skill: {}.", skill.label));
    }
    if let Some(interest) = top_interests.first() {
        text.push_str(&format!(" Most common shared interest: {}.", interest.label));
    }
    text
}

/// Analyzes a candidate set with the built-in taxonomy. Pure and total:
/// empty input produces the explicit no-data insight rather than an error.
pub fn analyze(candidates: &[CandidateMatch]) -> MatchInsights {
    analyze_with(&TopicTaxonomy::builtin(), candidates)
}

pub fn analyze_with(taxonomy: &TopicTaxonomy, candidates: &[CandidateMatch]) -> MatchInsights {
    if candidates.is_empty() {
        return MatchInsights {
            total_matches: 0,
            mutual_count: 0,
            synthetic_count: 0,
            average_score: 0.0,
            top_skills: Vec::new(),
            top_interests: Vec::new(),
            clusters: Vec::new(),
            score_distribution: empty_buckets(),
            summary: NO_DATA_SUMMARY.to_string(),
        };
    }

    let total_matches = candidates.len();
    let mutual_count = candidates.iter().filter(|c| c.is_mutual).count();
    let synthetic_count = candidates
        .iter()
        .filter(|c| c.origin == MatchOrigin::Fallback)
        .count();
    let average_score = candidates
        .iter()
        .map(|c| if c.overall.is_finite() { c.overall } else { 0.0 })
        .sum::<f64>()
        / total_matches as f64;

    let mut score_distribution = empty_buckets();
    for candidate in candidates {
        score_distribution[bucket_index(candidate.overall)].count += 1;
    }

    let top_skills = tally_labels(
        candidates
            .iter()
            .flat_map(|c| c.profile.skills.iter())
            .map(String::as_str),
    );
    let top_interests = tally_labels(
        candidates
            .iter()
            .flat_map(|c| c.profile.interests.iter())
            .map(String::as_str),
    );

    let summary = summary_text(
        total_matches,
        mutual_count,
        average_score,
        &top_skills,
        &top_interests,
    );

    MatchInsights {
        total_matches,
        mutual_count,
        synthetic_count,
        average_score,
        top_skills,
        top_interests,
        clusters: cluster_counts(taxonomy, candidates),
        score_distribution,
        summary,
    }
}

/// Per-candidate templated explanation of why a match scored the way it
/// did, keyed by candidate id. Candidates with a blank id are skipped.
pub fn match_reasons(candidates: &[CandidateMatch]) -> BTreeMap<UserId, String> {
    let mut reasons = BTreeMap::new();
    for candidate in candidates {
        if candidate.profile.id.is_blank() {
            continue;
        }
        let reason = if candidate.breakdown.skills >= REASON_THRESHOLD {
            "Strong skill alignment: you share most of your core skills.".to_string()
        } else if candidate.breakdown.interests >= REASON_THRESHOLD {
            "You care about the same topics and interests.".to_string()
        } else if candidate.breakdown.location >= REASON_THRESHOLD {
            "Based in the same area, which makes working together easier.".to_string()
        } else if candidate.is_mutual {
            "You both expressed interest in working together.".to_string()
        } else {
            format!(
                "Balanced compatibility across skills, interests and location ({:.0} overall).",
                candidate.overall
            )
        };
        reasons.insert(candidate.profile.id.clone(), reason);
    }
    reasons
}
