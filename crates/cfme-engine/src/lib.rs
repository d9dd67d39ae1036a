//! Candidate aggregation, connection lifecycle and recommendation generation.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use cfme_core::{
    CandidateMatch, Connection, ConnectionStatus, MatchOrigin, PairState, Profile, Recommendation,
    RecommendationFeatures, RecommendationKind, ScoreBreakdown, SimilarityRecord, UserId,
};
use cfme_score::{shared_count, CompatibilityScorer, ScorerConfig};
use cfme_store::{ConnectionChange, MatchRepository, RepositoryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cfme-engine";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

const WEIGHT_SUM_TOLERANCE: f64 = 0.05;
const POINTS_PER_SHARED_LABEL: f64 = 20.0;
const MAX_FEATURE_POINTS: f64 = 100.0;

fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Feature weights of the hybrid recommendation blend. Configuration, not
/// magic numbers; validated to sum to 1.0 within tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationWeights {
    pub skills_weight: f64,
    pub interests_weight: f64,
    pub collaboration_weight: f64,
    pub location_weight: f64,
}

impl Default for RecommendationWeights {
    fn default() -> Self {
        Self {
            skills_weight: 0.4,
            interests_weight: 0.3,
            collaboration_weight: 0.2,
            location_weight: 0.1,
        }
    }
}

impl RecommendationWeights {
    pub fn validate(&self) -> EngineResult<()> {
        let weights = [
            self.skills_weight,
            self.interests_weight,
            self.collaboration_weight,
            self.location_weight,
        ];
        for weight in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::InvalidConfiguration(format!(
                    "recommendation weight {weight} must be a finite non-negative number"
                )));
            }
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::InvalidConfiguration(format!(
                "recommendation weights sum to {total}, expected 1.0"
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fallback_sample_size: usize,
    /// Neutral band fallback candidate scores are clamped into.
    pub fallback_score_floor: f64,
    pub fallback_score_ceiling: f64,
    pub recommendation_pool_size: usize,
    pub weights: RecommendationWeights,
    pub scorer: ScorerConfig,
    /// Cron expression of the scheduled reconciliation sweep; unset disables it.
    pub reconcile_cron: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_sample_size: 8,
            fallback_score_floor: 55.0,
            fallback_score_ceiling: 75.0,
            recommendation_pool_size: 20,
            weights: RecommendationWeights::default(),
            scorer: ScorerConfig::default(),
            reconcile_cron: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fallback_sample_size: env_parse("CFME_FALLBACK_SAMPLE_SIZE", defaults.fallback_sample_size),
            fallback_score_floor: env_parse("CFME_FALLBACK_SCORE_FLOOR", defaults.fallback_score_floor),
            fallback_score_ceiling: env_parse(
                "CFME_FALLBACK_SCORE_CEILING",
                defaults.fallback_score_ceiling,
            ),
            recommendation_pool_size: env_parse("CFME_RECO_POOL_SIZE", defaults.recommendation_pool_size),
            weights: RecommendationWeights {
                skills_weight: env_parse("CFME_WEIGHT_SKILLS", defaults.weights.skills_weight),
                interests_weight: env_parse("CFME_WEIGHT_INTERESTS", defaults.weights.interests_weight),
                collaboration_weight: env_parse(
                    "CFME_WEIGHT_COLLABORATION",
                    defaults.weights.collaboration_weight,
                ),
                location_weight: env_parse("CFME_WEIGHT_LOCATION", defaults.weights.location_weight),
            },
            scorer: defaults.scorer,
            reconcile_cron: std::env::var("CFME_RECONCILE_CRON").ok(),
        }
    }

    /// Fails fast at configuration-load time, before any I/O.
    pub fn validate(&self) -> EngineResult<()> {
        self.weights.validate()?;
        self.scorer
            .validate()
            .map_err(|err| EngineError::InvalidConfiguration(err.to_string()))?;
        if self.fallback_sample_size == 0 || self.recommendation_pool_size == 0 {
            return Err(EngineError::InvalidConfiguration(
                "fallback sample and recommendation pool sizes must be at least 1".to_string(),
            ));
        }
        let floor = self.fallback_score_floor;
        let ceiling = self.fallback_score_ceiling;
        if !(0.0..=100.0).contains(&floor) || !(0.0..=100.0).contains(&ceiling) || floor > ceiling {
            return Err(EngineError::InvalidConfiguration(format!(
                "fallback score band {floor}..{ceiling} is not a range within 0..100"
            )));
        }
        Ok(())
    }
}

fn sort_candidates(candidates: &mut [CandidateMatch]) {
    candidates.sort_by(|a, b| {
        b.is_mutual
            .cmp(&a.is_mutual)
            .then_with(|| b.overall.total_cmp(&a.overall))
            .then_with(|| a.profile.id.cmp(&b.profile.id))
    });
}

/// Result of one aggregation call. Never persisted; rebuilt on every query.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSet {
    pub subject_id: UserId,
    pub candidates: Vec<CandidateMatch>,
    /// Referenced candidates whose profile could not be read.
    pub skipped_records: usize,
}

/// Merges precomputed similarity rows with mutual connections into a
/// deduplicated, deterministically ordered candidate list, falling back to
/// a bounded synthetic sample only when no real candidate exists.
pub struct CandidateAggregator {
    repo: Arc<dyn MatchRepository>,
    scorer: CompatibilityScorer,
    config: EngineConfig,
}

impl CandidateAggregator {
    pub fn new(repo: Arc<dyn MatchRepository>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let scorer = CompatibilityScorer::new(config.scorer.clone())
            .map_err(|err| EngineError::InvalidConfiguration(err.to_string()))?;
        Ok(Self { repo, scorer, config })
    }

    pub async fn build_candidates(&self, subject: &UserId) -> EngineResult<CandidateSet> {
        let subject_profile = self.repo.profile(subject).await?;
        let records = self.repo.similarity_records(subject).await?;
        let mutual_rows = self
            .repo
            .connections_for(subject, Some(ConnectionStatus::Mutual))
            .await?;

        let mut mutual_scores: BTreeMap<UserId, f64> = BTreeMap::new();
        for row in &mutual_rows {
            if let Some(other) = row.counterpart(subject) {
                mutual_scores.entry(other.clone()).or_insert(row.score);
            }
        }

        // mutual status is ground truth; a stale precomputed row for the
        // same candidate is dropped here
        let mut precomputed: BTreeMap<UserId, SimilarityRecord> = BTreeMap::new();
        for record in records {
            if record.candidate_id == *subject || mutual_scores.contains_key(&record.candidate_id) {
                continue;
            }
            precomputed.entry(record.candidate_id.clone()).or_insert(record);
        }

        let ids: Vec<UserId> = mutual_scores
            .keys()
            .chain(precomputed.keys())
            .cloned()
            .collect();
        let profiles: BTreeMap<UserId, Profile> = self
            .repo
            .profiles(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut skipped_records = 0usize;
        let mut candidates = Vec::new();

        for (id, snapshot) in &mutual_scores {
            match profiles.get(id) {
                Some(profile) => {
                    let scored = self.scorer.score(&subject_profile, profile);
                    candidates.push(CandidateMatch {
                        profile: profile.clone(),
                        breakdown: scored.breakdown,
                        overall: clamp_score(*snapshot),
                        is_mutual: true,
                        origin: MatchOrigin::Mutual,
                    });
                }
                None => {
                    warn!(candidate = %id, "skipping mutual connection without a readable profile");
                    skipped_records += 1;
                }
            }
        }

        for (id, record) in &precomputed {
            match profiles.get(id) {
                Some(profile) => {
                    let local = self.scorer.score(&subject_profile, profile);
                    candidates.push(CandidateMatch {
                        profile: profile.clone(),
                        breakdown: ScoreBreakdown {
                            skills: clamp_score(record.skills_score),
                            interests: clamp_score(record.interests_score),
                            location: local.breakdown.location,
                            experience: None,
                        },
                        overall: clamp_score(record.overall_score),
                        is_mutual: false,
                        origin: MatchOrigin::Precomputed,
                    });
                }
                None => {
                    warn!(candidate = %id, "skipping similarity record without a readable profile");
                    skipped_records += 1;
                }
            }
        }

        sort_candidates(&mut candidates);

        if candidates.is_empty() {
            candidates = self.fallback_candidates(&subject_profile).await?;
        }

        Ok(CandidateSet {
            subject_id: subject.clone(),
            candidates,
            skipped_records,
        })
    }

    /// Synthesizes fallback entries from a bounded deterministic profile
    /// sample. Scores are the locally computed compatibility clamped into
    /// the configured neutral band; no randomness is involved, so repeated
    /// calls over unchanged data return the same list.
    async fn fallback_candidates(&self, subject: &Profile) -> EngineResult<Vec<CandidateMatch>> {
        let sample = self
            .repo
            .sample_profiles(&subject.id, self.config.fallback_sample_size)
            .await?;
        let mut candidates: Vec<CandidateMatch> = sample
            .into_iter()
            .map(|profile| {
                let scored = self.scorer.score(subject, &profile);
                let overall = scored
                    .overall
                    .clamp(self.config.fallback_score_floor, self.config.fallback_score_ceiling);
                CandidateMatch {
                    profile,
                    breakdown: scored.breakdown,
                    overall,
                    is_mutual: false,
                    origin: MatchOrigin::Fallback,
                }
            })
            .collect();
        sort_candidates(&mut candidates);
        Ok(candidates)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub examined_pairs: usize,
    pub repaired_pairs: usize,
}

#[derive(Debug, Default)]
struct PairRows {
    forward: Option<Connection>,
    reverse: Option<Connection>,
}

fn pair_key(row: &Connection) -> ((UserId, UserId), bool) {
    if row.requester_id <= row.target_id {
        ((row.requester_id.clone(), row.target_id.clone()), true)
    } else {
        ((row.target_id.clone(), row.requester_id.clone()), false)
    }
}

/// Request/accept/mutual/decline state machine over single-row atomic
/// upserts. The store offers no cross-row atomicity, so half-promoted pairs
/// and crossed concurrent requests are expected states, healed lazily on
/// read or by the scheduled sweep.
pub struct ConnectionLifecycle {
    repo: Arc<dyn MatchRepository>,
    scorer: CompatibilityScorer,
}

impl ConnectionLifecycle {
    pub fn new(repo: Arc<dyn MatchRepository>, scorer: CompatibilityScorer) -> Self {
        Self { repo, scorer }
    }

    async fn score_pair(&self, a: &UserId, b: &UserId) -> EngineResult<f64> {
        let subject = self.repo.profile(a).await?;
        let candidate = self.repo.profile(b).await?;
        Ok(self.scorer.score(&subject, &candidate).overall)
    }

    async fn promote(&self, row: Connection) -> EngineResult<()> {
        if row.status.is_mutual() {
            return Ok(());
        }
        let mut row = row;
        row.status = ConnectionStatus::Mutual;
        row.updated_at = Utc::now();
        self.repo.upsert_connection(row).await?;
        Ok(())
    }

    /// Rebuilds the absent counterpart of a half-promoted mutual pair,
    /// reusing the surviving row's score snapshot.
    async fn restore_missing_side(&self, from: &Connection) -> EngineResult<()> {
        let row = Connection::new(
            from.target_id.clone(),
            from.requester_id.clone(),
            ConnectionStatus::Mutual,
            from.score,
        );
        self.repo.upsert_connection(row).await?;
        Ok(())
    }

    /// Pair state from `a`'s perspective. Reads that observe an impossible
    /// intermediate state repair it in place rather than surfacing it.
    pub async fn state(&self, a: &UserId, b: &UserId) -> EngineResult<PairState> {
        let outbound = self.repo.connection(a, b).await?;
        let inbound = self.repo.connection(b, a).await?;
        match (outbound, inbound) {
            (Some(out), Some(inb)) => {
                if out.status.is_mutual() && inb.status.is_mutual() {
                    Ok(PairState::Mutual)
                } else {
                    // either half-promoted, or both sides requested each
                    // other concurrently; both converge to mutual
                    warn!(from = %a, to = %b, "healing inconsistent connection pair");
                    self.promote(out).await?;
                    self.promote(inb).await?;
                    Ok(PairState::Mutual)
                }
            }
            (Some(out), None) => {
                if out.status.is_mutual() {
                    warn!(from = %a, to = %b, "restoring missing side of mutual pair");
                    self.restore_missing_side(&out).await?;
                    Ok(PairState::Mutual)
                } else {
                    Ok(PairState::Requested)
                }
            }
            (None, Some(inb)) => {
                if inb.status.is_mutual() {
                    warn!(from = %a, to = %b, "restoring missing side of mutual pair");
                    self.restore_missing_side(&inb).await?;
                    Ok(PairState::Mutual)
                } else {
                    Ok(PairState::Incoming)
                }
            }
            (None, None) => Ok(PairState::None),
        }
    }

    /// `a` requests a connection to `b`. Idempotent; a pair already at
    /// mutual is never decreased. The score snapshot is computed at request
    /// time and survives promotion unchanged.
    pub async fn request(&self, a: &UserId, b: &UserId) -> EngineResult<PairState> {
        let outbound = self.repo.connection(a, b).await?;
        if outbound.as_ref().is_some_and(|c| c.status.is_mutual()) {
            return Ok(PairState::Mutual);
        }
        let inbound = self.repo.connection(b, a).await?;

        if let Some(inbound) = inbound {
            // the other side already reached out: promote both directions
            let now = Utc::now();
            let outbound_row = match outbound {
                Some(mut existing) => {
                    existing.status = ConnectionStatus::Mutual;
                    existing.updated_at = now;
                    existing
                }
                None => {
                    let score = match self.score_pair(a, b).await {
                        Ok(score) => score,
                        Err(EngineError::Repository(RepositoryError::ProfileNotFound(id))) => {
                            warn!(profile = %id, "scoring unavailable, reusing inbound snapshot");
                            inbound.score
                        }
                        Err(err) => return Err(err),
                    };
                    Connection::new(a.clone(), b.clone(), ConnectionStatus::Mutual, score)
                }
            };
            self.repo.upsert_connection(outbound_row).await?;
            self.promote(inbound).await?;
            return Ok(PairState::Mutual);
        }

        if outbound.is_some() {
            // re-requesting an open request changes nothing
            return Ok(PairState::Requested);
        }

        let score = self.score_pair(a, b).await?;
        self.repo
            .upsert_connection(Connection::new(
                a.clone(),
                b.clone(),
                ConnectionStatus::Requested,
                score,
            ))
            .await?;
        Ok(PairState::Requested)
    }

    /// Accepting an incoming request is the same transition as requesting
    /// back.
    pub async fn accept(&self, a: &UserId, b: &UserId) -> EngineResult<PairState> {
        self.request(a, b).await
    }

    /// `a` declines `b`'s request: deletes the inbound row only. A missing
    /// inbound row is a no-op and a mutual pair is never demoted.
    pub async fn decline(&self, a: &UserId, b: &UserId) -> EngineResult<()> {
        match self.repo.connection(b, a).await? {
            None => Ok(()),
            Some(inbound) if inbound.status.is_mutual() => Ok(()),
            Some(_) => {
                self.repo.delete_connection(b, a).await?;
                Ok(())
            }
        }
    }

    /// Explicit repair entry point for one pair; `state` already heals
    /// lazily on read.
    pub async fn reconcile(&self, a: &UserId, b: &UserId) -> EngineResult<PairState> {
        self.state(a, b).await
    }

    async fn repair_rows(&self, rows: PairRows) -> EngineResult<bool> {
        match (rows.forward, rows.reverse) {
            (Some(forward), Some(reverse)) => {
                if forward.status.is_mutual() && reverse.status.is_mutual() {
                    return Ok(false);
                }
                self.promote(forward).await?;
                self.promote(reverse).await?;
                Ok(true)
            }
            (Some(row), None) | (None, Some(row)) => {
                if row.status.is_mutual() {
                    self.restore_missing_side(&row).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            (None, None) => Ok(false),
        }
    }

    /// Full reconciliation pass over every connection row, converging
    /// crossed requests and half-promoted pairs to both-mutual.
    pub async fn sweep(&self) -> EngineResult<ReconcileSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let rows = self.repo.all_connections().await?;

        let mut pairs: BTreeMap<(UserId, UserId), PairRows> = BTreeMap::new();
        for row in rows {
            let (key, forward) = pair_key(&row);
            let slot = pairs.entry(key).or_default();
            if forward {
                slot.forward = Some(row);
            } else {
                slot.reverse = Some(row);
            }
        }

        let examined_pairs = pairs.len();
        let mut repaired_pairs = 0usize;
        for rows in pairs.into_values() {
            if self.repair_rows(rows).await? {
                repaired_pairs += 1;
            }
        }

        let finished_at = Utc::now();
        info!(%run_id, examined = examined_pairs, repaired = repaired_pairs, "reconciliation sweep complete");
        Ok(ReconcileSummary {
            run_id,
            started_at,
            finished_at,
            examined_pairs,
            repaired_pairs,
        })
    }
}

/// Builds the optional scheduled reconciliation job. Returns `None` when no
/// cron expression is configured.
pub async fn maybe_build_reconciler(
    lifecycle: Arc<ConnectionLifecycle>,
    cron: Option<&str>,
) -> anyhow::Result<Option<JobScheduler>> {
    let Some(cron) = cron else {
        return Ok(None);
    };
    let sched = JobScheduler::new()
        .await
        .context("creating reconciliation scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move {
            match lifecycle.sweep().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    repaired = summary.repaired_pairs,
                    "scheduled reconciliation finished"
                ),
                Err(err) => warn!(error = %err, "scheduled reconciliation failed"),
            }
        })
    })
    .with_context(|| format!("creating reconciliation job for cron {cron}"))?;
    sched.add(job).await.context("adding reconciliation job")?;
    Ok(Some(sched))
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub run_id: Uuid,
    pub subject_id: UserId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pool_size: usize,
    pub generated: usize,
    pub skipped: usize,
}

/// Hybrid recommendation generator: ranks a bounded pool of skill-sharing
/// profiles with a weighted feature blend and upserts one explainable row
/// per candidate.
pub struct RecommendationGenerator {
    repo: Arc<dyn MatchRepository>,
    weights: RecommendationWeights,
    pool_size: usize,
}

impl RecommendationGenerator {
    pub fn new(
        repo: Arc<dyn MatchRepository>,
        weights: RecommendationWeights,
        pool_size: usize,
    ) -> EngineResult<Self> {
        weights.validate()?;
        if pool_size == 0 {
            return Err(EngineError::InvalidConfiguration(
                "recommendation pool size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            repo,
            weights,
            pool_size,
        })
    }

    pub async fn generate(&self, subject: &UserId) -> EngineResult<GenerationSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        // only the subject fetch and the pool fetch are hard failures
        let subject_profile = self.repo.profile(subject).await?;
        let pool = self
            .repo
            .profiles_sharing_skills(subject, &subject_profile.skills)
            .await?;

        let mut ranked: Vec<(usize, Profile)> = pool
            .into_iter()
            .filter(|p| p.id != *subject)
            .map(|p| (shared_count(&subject_profile.skills, &p.skills), p))
            .filter(|(shared, _)| *shared > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        ranked.truncate(self.pool_size);
        let pool_size = ranked.len();

        let mut generated = 0usize;
        let mut skipped = 0usize;
        for (shared_skills, candidate) in ranked {
            let recommendation = self.build_recommendation(&subject_profile, &candidate, shared_skills);
            match self.repo.upsert_recommendation(recommendation).await {
                Ok(()) => generated += 1,
                Err(err) => {
                    warn!(candidate = %candidate.id, error = %err, "skipping recommendation");
                    skipped += 1;
                }
            }
        }

        let finished_at = Utc::now();
        info!(%run_id, subject = %subject, generated, skipped, "recommendation run complete");
        Ok(GenerationSummary {
            run_id,
            subject_id: subject.clone(),
            started_at,
            finished_at,
            pool_size,
            generated,
            skipped,
        })
    }

    fn build_recommendation(
        &self,
        subject: &Profile,
        candidate: &Profile,
        shared_skills: usize,
    ) -> Recommendation {
        let shared_interests = shared_count(&subject.interests, &candidate.interests);

        let skill_raw = (shared_skills as f64 * POINTS_PER_SHARED_LABEL).min(MAX_FEATURE_POINTS);
        let interest_raw = (shared_interests as f64 * POINTS_PER_SHARED_LABEL).min(MAX_FEATURE_POINTS);
        let collaboration_raw = exact_tag_match(
            subject.work_style.as_deref(),
            candidate.work_style.as_deref(),
        );
        let location_raw = exact_tag_match(subject.location.as_deref(), candidate.location.as_deref());

        let features = RecommendationFeatures {
            shared_skills,
            shared_interests,
            skill_points: skill_raw * self.weights.skills_weight,
            interest_points: interest_raw * self.weights.interests_weight,
            collaboration_points: collaboration_raw * self.weights.collaboration_weight,
            location_points: location_raw * self.weights.location_weight,
        };
        let score = (features.skill_points
            + features.interest_points
            + features.collaboration_points
            + features.location_points)
            .clamp(0.0, 100.0);

        Recommendation {
            subject_id: subject.id.clone(),
            candidate_id: candidate.id.clone(),
            score,
            kind: RecommendationKind::Hybrid,
            features,
        }
    }
}

fn exact_tag_match(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let a = a.trim();
            if !a.is_empty() && a.eq_ignore_ascii_case(b.trim()) {
                MAX_FEATURE_POINTS
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Facade wiring the three engine components over one shared repository.
pub struct MatchEngine {
    repo: Arc<dyn MatchRepository>,
    pub aggregator: CandidateAggregator,
    pub lifecycle: Arc<ConnectionLifecycle>,
    pub generator: RecommendationGenerator,
    reconcile_cron: Option<String>,
}

impl MatchEngine {
    pub fn new(repo: Arc<dyn MatchRepository>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let scorer = CompatibilityScorer::new(config.scorer.clone())
            .map_err(|err| EngineError::InvalidConfiguration(err.to_string()))?;
        let aggregator = CandidateAggregator::new(repo.clone(), config.clone())?;
        let lifecycle = Arc::new(ConnectionLifecycle::new(repo.clone(), scorer));
        let generator = RecommendationGenerator::new(
            repo.clone(),
            config.weights.clone(),
            config.recommendation_pool_size,
        )?;
        Ok(Self {
            repo,
            aggregator,
            lifecycle,
            generator,
            reconcile_cron: config.reconcile_cron,
        })
    }

    pub fn from_env(repo: Arc<dyn MatchRepository>) -> EngineResult<Self> {
        Self::new(repo, EngineConfig::from_env())
    }

    /// Row-change notifications for connections targeting `user`; a refresh
    /// trigger only.
    pub async fn watch(&self, user: &UserId) -> EngineResult<broadcast::Receiver<ConnectionChange>> {
        Ok(self.repo.subscribe_connections(user).await?)
    }

    pub async fn maybe_build_reconciler(&self) -> anyhow::Result<Option<JobScheduler>> {
        maybe_build_reconciler(self.lifecycle.clone(), self.reconcile_cron.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfme_store::InMemoryRepository;
    use chrono::TimeZone;

    fn mk_profile(id: &str, skills: &[&str], interests: &[&str], location: Option<&str>) -> Profile {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        Profile {
            id: UserId::from(id),
            first_name: None,
            last_name: None,
            avatar_url: None,
            bio: None,
            location: location.map(str::to_string),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            interests: interests.iter().map(|s| s.to_string()).collect(),
            work_style: None,
            weekly_availability: None,
            active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn mk_similarity(subject: &str, candidate: &str, overall: f64) -> SimilarityRecord {
        SimilarityRecord {
            subject_id: UserId::from(subject),
            candidate_id: UserId::from(candidate),
            skills_score: overall,
            interests_score: overall,
            overall_score: overall,
        }
    }

    fn engine(repo: Arc<InMemoryRepository>) -> MatchEngine {
        MatchEngine::new(repo, EngineConfig::default()).expect("default config is valid")
    }

    #[tokio::test]
    async fn mutual_snapshot_wins_over_stale_precomputed_record() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &["Rust"], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &["Rust"], &[], None)).await;
        repo.insert_similarity(mk_similarity("alice", "bob", 95.0)).await;
        repo.upsert_connection(Connection::new(
            UserId::from("alice"),
            UserId::from("bob"),
            ConnectionStatus::Mutual,
            70.0,
        ))
        .await
        .unwrap();

        let engine = engine(repo);
        let set = engine
            .aggregator
            .build_candidates(&UserId::from("alice"))
            .await
            .unwrap();

        assert_eq!(set.candidates.len(), 1);
        let only = &set.candidates[0];
        assert_eq!(only.profile.id.as_str(), "bob");
        assert_eq!(only.origin, MatchOrigin::Mutual);
        assert!(only.is_mutual);
        assert_eq!(only.overall, 70.0);
    }

    #[tokio::test]
    async fn mutual_candidates_sort_before_higher_scoring_precomputed_ones() {
        let repo = Arc::new(InMemoryRepository::new());
        for id in ["me", "low-mutual", "high-precomputed", "mid-precomputed"] {
            repo.insert_profile(mk_profile(id, &[], &[], None)).await;
        }
        repo.upsert_connection(Connection::new(
            UserId::from("me"),
            UserId::from("low-mutual"),
            ConnectionStatus::Mutual,
            40.0,
        ))
        .await
        .unwrap();
        repo.insert_similarity(mk_similarity("me", "high-precomputed", 99.0)).await;
        repo.insert_similarity(mk_similarity("me", "mid-precomputed", 60.0)).await;

        let engine = engine(repo);
        let set = engine
            .aggregator
            .build_candidates(&UserId::from("me"))
            .await
            .unwrap();

        let ids: Vec<&str> = set.candidates.iter().map(|c| c.profile.id.as_str()).collect();
        assert_eq!(ids, vec!["low-mutual", "high-precomputed", "mid-precomputed"]);
        let unique: std::collections::BTreeSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn unreadable_candidate_profiles_are_skipped_not_fatal() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("me", &[], &[], None)).await;
        repo.insert_profile(mk_profile("real", &[], &[], None)).await;
        repo.insert_similarity(mk_similarity("me", "real", 80.0)).await;
        repo.insert_similarity(mk_similarity("me", "ghost", 90.0)).await;

        let engine = engine(repo);
        let set = engine
            .aggregator
            .build_candidates(&UserId::from("me"))
            .await
            .unwrap();

        assert_eq!(set.candidates.len(), 1);
        assert_eq!(set.candidates[0].profile.id.as_str(), "real");
        assert_eq!(set.skipped_records, 1);
    }

    #[tokio::test]
    async fn fallback_fills_in_only_when_no_real_candidate_exists() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("me", &[], &[], None)).await;
        for id in ["p1", "p2", "p3"] {
            repo.insert_profile(mk_profile(id, &[], &[], None)).await;
        }

        let engine = engine(repo);
        let set = engine
            .aggregator
            .build_candidates(&UserId::from("me"))
            .await
            .unwrap();

        assert_eq!(set.candidates.len(), 3);
        assert!(set
            .candidates
            .iter()
            .all(|c| c.origin == MatchOrigin::Fallback));
        for candidate in &set.candidates {
            assert!((55.0..=75.0).contains(&candidate.overall));
        }
    }

    #[tokio::test]
    async fn fallback_never_replaces_a_real_result_set() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("me", &[], &[], None)).await;
        repo.insert_profile(mk_profile("real", &[], &[], None)).await;
        repo.insert_profile(mk_profile("idle", &[], &[], None)).await;
        repo.insert_similarity(mk_similarity("me", "real", 20.0)).await;

        let engine = engine(repo);
        let set = engine
            .aggregator
            .build_candidates(&UserId::from("me"))
            .await
            .unwrap();

        assert_eq!(set.candidates.len(), 1);
        assert_eq!(set.candidates[0].origin, MatchOrigin::Precomputed);
    }

    #[tokio::test]
    async fn request_then_counter_request_promotes_both_rows() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &["Rust"], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &["Rust"], &[], None)).await;
        let engine = engine(repo.clone());
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        assert_eq!(
            engine.lifecycle.request(&alice, &bob).await.unwrap(),
            PairState::Requested
        );
        let snapshot = repo.connection(&alice, &bob).await.unwrap().unwrap().score;

        assert_eq!(
            engine.lifecycle.request(&bob, &alice).await.unwrap(),
            PairState::Mutual
        );
        let outbound = repo.connection(&alice, &bob).await.unwrap().unwrap();
        let inbound = repo.connection(&bob, &alice).await.unwrap().unwrap();
        assert_eq!(outbound.status, ConnectionStatus::Mutual);
        assert_eq!(inbound.status, ConnectionStatus::Mutual);
        // the original snapshot survives promotion
        assert_eq!(outbound.score, snapshot);
    }

    #[tokio::test]
    async fn decline_without_an_inbound_row_is_a_noop() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &[], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &[], &[], None)).await;
        let engine = engine(repo.clone());

        engine
            .lifecycle
            .decline(&UserId::from("alice"), &UserId::from("bob"))
            .await
            .unwrap();
        assert!(repo.all_connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decline_removes_the_inbound_row_and_never_demotes_mutual() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &[], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &[], &[], None)).await;
        let engine = engine(repo.clone());
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        engine.lifecycle.request(&bob, &alice).await.unwrap();
        assert_eq!(
            engine.lifecycle.state(&alice, &bob).await.unwrap(),
            PairState::Incoming
        );
        engine.lifecycle.decline(&alice, &bob).await.unwrap();
        assert!(repo.connection(&bob, &alice).await.unwrap().is_none());

        engine.lifecycle.request(&alice, &bob).await.unwrap();
        engine.lifecycle.request(&bob, &alice).await.unwrap();
        engine.lifecycle.decline(&alice, &bob).await.unwrap();
        assert_eq!(
            engine.lifecycle.state(&alice, &bob).await.unwrap(),
            PairState::Mutual
        );
    }

    #[tokio::test]
    async fn half_promoted_pair_heals_on_read() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &[], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &[], &[], None)).await;
        repo.upsert_connection(Connection::new(
            UserId::from("alice"),
            UserId::from("bob"),
            ConnectionStatus::Mutual,
            64.0,
        ))
        .await
        .unwrap();

        let engine = engine(repo.clone());
        let state = engine
            .lifecycle
            .state(&UserId::from("alice"), &UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(state, PairState::Mutual);

        let restored = repo
            .connection(&UserId::from("bob"), &UserId::from("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.status, ConnectionStatus::Mutual);
        assert_eq!(restored.score, 64.0);
    }

    #[tokio::test]
    async fn sweep_converges_crossed_requests() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("alice", &[], &[], None)).await;
        repo.insert_profile(mk_profile("bob", &[], &[], None)).await;
        // both sides requested before either saw the other: the accepted race
        repo.upsert_connection(Connection::new(
            UserId::from("alice"),
            UserId::from("bob"),
            ConnectionStatus::Requested,
            50.0,
        ))
        .await
        .unwrap();
        repo.upsert_connection(Connection::new(
            UserId::from("bob"),
            UserId::from("alice"),
            ConnectionStatus::Requested,
            52.0,
        ))
        .await
        .unwrap();

        let engine = engine(repo.clone());
        let summary = engine.lifecycle.sweep().await.unwrap();
        assert_eq!(summary.examined_pairs, 1);
        assert_eq!(summary.repaired_pairs, 1);
        for row in repo.all_connections().await.unwrap() {
            assert_eq!(row.status, ConnectionStatus::Mutual);
        }

        let second = engine.lifecycle.sweep().await.unwrap();
        assert_eq!(second.repaired_pairs, 0);
    }

    #[tokio::test]
    async fn generation_is_idempotent_over_unchanged_data() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("me", &["Rust", "Sales"], &["AI"], Some("Berlin"))).await;
        repo.insert_profile(mk_profile("a", &["Rust"], &["AI"], Some("Berlin"))).await;
        repo.insert_profile(mk_profile("b", &["Sales", "Rust"], &[], None)).await;

        let engine = engine(repo.clone());
        let me = UserId::from("me");
        let first = engine.generator.generate(&me).await.unwrap();
        let stored_first = repo.recommendations_for(&me).await.unwrap();
        let second = engine.generator.generate(&me).await.unwrap();
        let stored_second = repo.recommendations_for(&me).await.unwrap();

        assert_eq!(first.generated, 2);
        assert_eq!(second.generated, 2);
        assert_eq!(stored_first, stored_second);
    }

    #[tokio::test]
    async fn recommendation_pool_is_bounded_and_ranked_by_shared_skills() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_profile(mk_profile("me", &["Rust", "Go"], &[], None)).await;
        for i in 0..25 {
            let id = format!("candidate-{i:02}");
            let skills: &[&str] = if i == 0 { &["Rust", "Go"] } else { &["Rust"] };
            repo.insert_profile(mk_profile(&id, skills, &[], None)).await;
        }

        let engine = engine(repo.clone());
        let summary = engine.generator.generate(&UserId::from("me")).await.unwrap();
        assert_eq!(summary.pool_size, 20);
        assert_eq!(summary.generated, 20);
        assert_eq!(summary.skipped, 0);

        let stored = repo.recommendations_for(&UserId::from("me")).await.unwrap();
        let best = stored
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!(best.candidate_id.as_str(), "candidate-00");
        assert_eq!(best.features.shared_skills, 2);
    }

    #[tokio::test]
    async fn misconfigured_weights_fail_before_any_io() {
        let repo: Arc<InMemoryRepository> = Arc::new(InMemoryRepository::new());
        let config = EngineConfig {
            weights: RecommendationWeights {
                skills_weight: 1.5,
                interests_weight: 0.3,
                collaboration_weight: 0.2,
                location_weight: 0.1,
            },
            ..EngineConfig::default()
        };
        let result = MatchEngine::new(repo, config);
        assert!(matches!(
            result.err(),
            Some(EngineError::InvalidConfiguration(_))
        ));
    }
}
