//! Repository boundary to the hosted row store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use cfme_core::{
    Connection, ConnectionStatus, Profile, Recommendation, RecommendationFeatures,
    RecommendationKind, SimilarityRecord, UserId,
};
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::warn;

pub const CRATE_NAME: &str = "cfme-store";

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The store could not be reached or refused the call. Fatal to the
    /// current operation; the engine propagates it without retrying.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    /// Missing or soft-deactivated profile. Recoverable per record.
    #[error("profile {0} not found")]
    ProfileNotFound(UserId),
    /// A store row that could not be mapped into the typed domain model.
    #[error("malformed row from store: {0}")]
    Malformed(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Row-change notification payload. Consumers use it only as a refresh
/// trigger, never as a data source.
#[derive(Debug, Clone)]
pub struct ConnectionChange {
    pub requester_id: UserId,
    pub target_id: UserId,
    pub status: ConnectionStatus,
}

/// The engine's sole source of truth. Every write is a single atomic
/// upsert/insert/delete; no cross-row atomicity is offered.
#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn profile(&self, id: &UserId) -> RepoResult<Profile>;
    /// Bulk fetch; missing or deactivated ids are silently absent.
    async fn profiles(&self, ids: &[UserId]) -> RepoResult<Vec<Profile>>;
    /// Bounded sample of active profiles ordered by id, for the fallback path.
    async fn sample_profiles(&self, exclude: &UserId, limit: usize) -> RepoResult<Vec<Profile>>;
    /// Active profiles sharing at least one skill (case-insensitive).
    async fn profiles_sharing_skills(
        &self,
        exclude: &UserId,
        skills: &[String],
    ) -> RepoResult<Vec<Profile>>;
    async fn similarity_records(&self, subject: &UserId) -> RepoResult<Vec<SimilarityRecord>>;
    async fn connection(&self, requester: &UserId, target: &UserId) -> RepoResult<Option<Connection>>;
    /// Rows where `user` is on either side, optionally filtered by status.
    async fn connections_for(
        &self,
        user: &UserId,
        status: Option<ConnectionStatus>,
    ) -> RepoResult<Vec<Connection>>;
    /// Full connection scan; input to the reconciliation sweep.
    async fn all_connections(&self) -> RepoResult<Vec<Connection>>;
    async fn upsert_connection(&self, connection: Connection) -> RepoResult<()>;
    /// Idempotent: deleting an absent row succeeds.
    async fn delete_connection(&self, requester: &UserId, target: &UserId) -> RepoResult<()>;
    async fn upsert_recommendation(&self, recommendation: Recommendation) -> RepoResult<()>;
    async fn recommendations_for(&self, subject: &UserId) -> RepoResult<Vec<Recommendation>>;
    /// Row-change notifications for connections targeting `target`.
    async fn subscribe_connections(
        &self,
        target: &UserId,
    ) -> RepoResult<broadcast::Receiver<ConnectionChange>>;
}

fn normalize_skill_set(skills: &[String]) -> HashSet<String> {
    skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    profiles: BTreeMap<UserId, Profile>,
    similarities: BTreeMap<(UserId, UserId), SimilarityRecord>,
    connections: BTreeMap<(UserId, UserId), Connection>,
    recommendations: BTreeMap<(UserId, UserId, RecommendationKind), Recommendation>,
}

/// Deterministic in-memory backend for tests and local demos. Iteration
/// order follows id order, so samples and scans are reproducible.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
    watchers: Mutex<HashMap<UserId, broadcast::Sender<ConnectionChange>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_profile(&self, profile: Profile) {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile);
    }

    pub async fn insert_similarity(&self, record: SimilarityRecord) {
        self.state.write().await.similarities.insert(
            (record.subject_id.clone(), record.candidate_id.clone()),
            record,
        );
    }

    async fn notify(&self, change: ConnectionChange) {
        let watchers = self.watchers.lock().await;
        if let Some(sender) = watchers.get(&change.target_id) {
            let _ = sender.send(change);
        }
    }
}

#[async_trait]
impl MatchRepository for InMemoryRepository {
    async fn profile(&self, id: &UserId) -> RepoResult<Profile> {
        let state = self.state.read().await;
        state
            .profiles
            .get(id)
            .filter(|p| p.active)
            .cloned()
            .ok_or_else(|| RepositoryError::ProfileNotFound(id.clone()))
    }

    async fn profiles(&self, ids: &[UserId]) -> RepoResult<Vec<Profile>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.profiles.get(id))
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn sample_profiles(&self, exclude: &UserId, limit: usize) -> RepoResult<Vec<Profile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .filter(|p| p.active && p.id != *exclude)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn profiles_sharing_skills(
        &self,
        exclude: &UserId,
        skills: &[String],
    ) -> RepoResult<Vec<Profile>> {
        let wanted = normalize_skill_set(skills);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .filter(|p| p.active && p.id != *exclude)
            .filter(|p| {
                p.skills
                    .iter()
                    .any(|s| wanted.contains(&s.trim().to_lowercase()))
            })
            .cloned()
            .collect())
    }

    async fn similarity_records(&self, subject: &UserId) -> RepoResult<Vec<SimilarityRecord>> {
        let state = self.state.read().await;
        Ok(state
            .similarities
            .iter()
            .filter(|((s, _), _)| s == subject)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn connection(&self, requester: &UserId, target: &UserId) -> RepoResult<Option<Connection>> {
        let state = self.state.read().await;
        Ok(state
            .connections
            .get(&(requester.clone(), target.clone()))
            .cloned())
    }

    async fn connections_for(
        &self,
        user: &UserId,
        status: Option<ConnectionStatus>,
    ) -> RepoResult<Vec<Connection>> {
        let state = self.state.read().await;
        Ok(state
            .connections
            .values()
            .filter(|c| c.requester_id == *user || c.target_id == *user)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn all_connections(&self) -> RepoResult<Vec<Connection>> {
        let state = self.state.read().await;
        Ok(state.connections.values().cloned().collect())
    }

    async fn upsert_connection(&self, connection: Connection) -> RepoResult<()> {
        let change = ConnectionChange {
            requester_id: connection.requester_id.clone(),
            target_id: connection.target_id.clone(),
            status: connection.status,
        };
        self.state.write().await.connections.insert(
            (connection.requester_id.clone(), connection.target_id.clone()),
            connection,
        );
        self.notify(change).await;
        Ok(())
    }

    async fn delete_connection(&self, requester: &UserId, target: &UserId) -> RepoResult<()> {
        let removed = self
            .state
            .write()
            .await
            .connections
            .remove(&(requester.clone(), target.clone()));
        if let Some(row) = removed {
            self.notify(ConnectionChange {
                requester_id: row.requester_id,
                target_id: row.target_id,
                status: row.status,
            })
            .await;
        }
        Ok(())
    }

    async fn upsert_recommendation(&self, recommendation: Recommendation) -> RepoResult<()> {
        self.state.write().await.recommendations.insert(
            (
                recommendation.subject_id.clone(),
                recommendation.candidate_id.clone(),
                recommendation.kind,
            ),
            recommendation,
        );
        Ok(())
    }

    async fn recommendations_for(&self, subject: &UserId) -> RepoResult<Vec<Recommendation>> {
        let state = self.state.read().await;
        Ok(state
            .recommendations
            .iter()
            .filter(|((s, _, _), _)| s == subject)
            .map(|(_, rec)| rec.clone())
            .collect())
    }

    async fn subscribe_connections(
        &self,
        target: &UserId,
    ) -> RepoResult<broadcast::Receiver<ConnectionChange>> {
        let mut watchers = self.watchers.lock().await;
        let sender = watchers
            .entry(target.clone())
            .or_insert_with(|| broadcast::channel(32).0);
        Ok(sender.subscribe())
    }
}

// ---------------------------------------------------------------------------
// Hosted REST backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_transport_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Interval of the row-change polling watcher behind `subscribe_connections`.
    pub poll_interval: Duration,
}

impl RestConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("CFME_STORE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            api_key: std::env::var("CFME_STORE_API_KEY").ok(),
            timeout: Duration::from_secs(
                std::env::var("CFME_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_secs(
                std::env::var("CFME_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

/// PostgREST-style client over the hosted row store. Change subscriptions
/// are modeled as a polling watcher because the store's push channel is
/// owned by the presentation layer.
#[derive(Debug, Clone)]
pub struct RestRepository {
    client: reqwest::Client,
    config: RestConfig,
}

impl RestRepository {
    pub fn new(config: RestConfig) -> RepoResult<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if query.is_empty() {
            format!("{base}/{table}")
        } else {
            format!("{base}/{table}?{query}")
        }
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        upsert: bool,
    ) -> RepoResult<reqwest::Response> {
        for attempt in 0..=self.config.backoff.max_retries {
            let mut request = self.client.request(method.clone(), url);
            if let Some(key) = &self.config.api_key {
                request = request.header("apikey", key).bearer_auth(key);
            }
            if upsert {
                request = request.header("Prefer", "resolution=merge-duplicates");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(RepositoryError::Unavailable(format!(
                        "http status {} for {url}",
                        status.as_u16()
                    )));
                }
                Err(err) => {
                    if classify_transport_error(&err) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(RepositoryError::Unavailable(err.to_string()));
                }
            }
        }
        Err(RepositoryError::Unavailable(format!(
            "retries exhausted for {url}"
        )))
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str, query: &str) -> RepoResult<Vec<T>> {
        let url = self.table_url(table, query);
        let resp = self.send_with_retry(Method::GET, &url, None, false).await?;
        resp.json::<Vec<T>>()
            .await
            .map_err(|err| RepositoryError::Malformed(err.to_string()))
    }

    async fn write(
        &self,
        method: Method,
        table: &str,
        query: &str,
        body: Option<&serde_json::Value>,
        upsert: bool,
    ) -> RepoResult<()> {
        let url = self.table_url(table, query);
        self.send_with_retry(method, &url, body, upsert).await?;
        Ok(())
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    skills: Option<Vec<String>>,
    #[serde(default)]
    interests: Option<Vec<String>>,
    #[serde(default)]
    work_style: Option<String>,
    #[serde(default)]
    weekly_availability: Option<u8>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    fn into_profile(self) -> RepoResult<Profile> {
        if self.id.trim().is_empty() {
            return Err(RepositoryError::Malformed("profile row with empty id".into()));
        }
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(Profile {
            id: UserId::from(self.id),
            first_name: self.first_name,
            last_name: self.last_name,
            avatar_url: self.avatar_url,
            bio: self.bio,
            location: self.location,
            skills: self.skills.unwrap_or_default(),
            interests: self.interests.unwrap_or_default(),
            work_style: self.work_style,
            weekly_availability: self.weekly_availability,
            active: self.active,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SimilarityRow {
    subject_id: String,
    candidate_id: String,
    #[serde(default)]
    skills_score: f64,
    #[serde(default)]
    interests_score: f64,
    #[serde(default)]
    overall_score: f64,
}

impl SimilarityRow {
    fn into_record(self) -> SimilarityRecord {
        SimilarityRecord {
            subject_id: UserId::from(self.subject_id),
            candidate_id: UserId::from(self.candidate_id),
            skills_score: clamp_score(self.skills_score),
            interests_score: clamp_score(self.interests_score),
            overall_score: clamp_score(self.overall_score),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectionRow {
    requester_id: String,
    target_id: String,
    status: ConnectionStatus,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ConnectionRow {
    fn into_connection(self) -> Connection {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Connection {
            requester_id: UserId::from(self.requester_id),
            target_id: UserId::from(self.target_id),
            status: self.status,
            score: clamp_score(self.score),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationRow {
    subject_id: String,
    candidate_id: String,
    #[serde(default)]
    score: f64,
    kind: RecommendationKind,
    features: RecommendationFeatures,
}

impl RecommendationRow {
    fn into_recommendation(self) -> Recommendation {
        Recommendation {
            subject_id: UserId::from(self.subject_id),
            candidate_id: UserId::from(self.candidate_id),
            score: clamp_score(self.score),
            kind: self.kind,
            features: self.features,
        }
    }
}

fn quoted_list(values: impl Iterator<Item = String>) -> String {
    values
        .map(|v| format!("\"{v}\""))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl MatchRepository for RestRepository {
    async fn profile(&self, id: &UserId) -> RepoResult<Profile> {
        let rows: Vec<ProfileRow> = self
            .get_rows("profiles", &format!("id=eq.{id}&active=is.true&limit=1"))
            .await?;
        match rows.into_iter().next() {
            Some(row) => row.into_profile(),
            None => Err(RepositoryError::ProfileNotFound(id.clone())),
        }
    }

    async fn profiles(&self, ids: &[UserId]) -> RepoResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = quoted_list(ids.iter().map(|id| id.to_string()));
        let rows: Vec<ProfileRow> = self
            .get_rows("profiles", &format!("id=in.({list})&active=is.true"))
            .await?;
        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_profile() {
                Ok(profile) => profiles.push(profile),
                Err(err) => warn!(error = %err, "dropping unmappable profile row"),
            }
        }
        Ok(profiles)
    }

    async fn sample_profiles(&self, exclude: &UserId, limit: usize) -> RepoResult<Vec<Profile>> {
        let rows: Vec<ProfileRow> = self
            .get_rows(
                "profiles",
                &format!("active=is.true&id=neq.{exclude}&order=id.asc&limit={limit}"),
            )
            .await?;
        Ok(rows.into_iter().filter_map(|r| r.into_profile().ok()).collect())
    }

    async fn profiles_sharing_skills(
        &self,
        exclude: &UserId,
        skills: &[String],
    ) -> RepoResult<Vec<Profile>> {
        let mut wanted: Vec<String> = normalize_skill_set(skills).into_iter().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        wanted.sort();
        let overlap = quoted_list(wanted.into_iter());
        let rows: Vec<ProfileRow> = self
            .get_rows(
                "profiles",
                &format!("active=is.true&id=neq.{exclude}&skills=ov.{{{overlap}}}"),
            )
            .await?;
        Ok(rows.into_iter().filter_map(|r| r.into_profile().ok()).collect())
    }

    async fn similarity_records(&self, subject: &UserId) -> RepoResult<Vec<SimilarityRecord>> {
        let rows: Vec<SimilarityRow> = self
            .get_rows("similarity_scores", &format!("subject_id=eq.{subject}"))
            .await?;
        Ok(rows.into_iter().map(SimilarityRow::into_record).collect())
    }

    async fn connection(&self, requester: &UserId, target: &UserId) -> RepoResult<Option<Connection>> {
        let rows: Vec<ConnectionRow> = self
            .get_rows(
                "connections",
                &format!("requester_id=eq.{requester}&target_id=eq.{target}&limit=1"),
            )
            .await?;
        Ok(rows.into_iter().next().map(ConnectionRow::into_connection))
    }

    async fn connections_for(
        &self,
        user: &UserId,
        status: Option<ConnectionStatus>,
    ) -> RepoResult<Vec<Connection>> {
        let mut query = format!("or=(requester_id.eq.{user},target_id.eq.{user})");
        if let Some(status) = status {
            query.push_str(&format!("&status=eq.{status}"));
        }
        let rows: Vec<ConnectionRow> = self.get_rows("connections", &query).await?;
        Ok(rows.into_iter().map(ConnectionRow::into_connection).collect())
    }

    async fn all_connections(&self) -> RepoResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = self
            .get_rows("connections", "order=requester_id.asc")
            .await?;
        Ok(rows.into_iter().map(ConnectionRow::into_connection).collect())
    }

    async fn upsert_connection(&self, connection: Connection) -> RepoResult<()> {
        let body = serde_json::to_value(&connection)
            .map_err(|err| RepositoryError::Malformed(err.to_string()))?;
        self.write(
            Method::POST,
            "connections",
            "on_conflict=requester_id,target_id",
            Some(&body),
            true,
        )
        .await
    }

    async fn delete_connection(&self, requester: &UserId, target: &UserId) -> RepoResult<()> {
        self.write(
            Method::DELETE,
            "connections",
            &format!("requester_id=eq.{requester}&target_id=eq.{target}"),
            None,
            false,
        )
        .await
    }

    async fn upsert_recommendation(&self, recommendation: Recommendation) -> RepoResult<()> {
        let body = serde_json::to_value(&recommendation)
            .map_err(|err| RepositoryError::Malformed(err.to_string()))?;
        self.write(
            Method::POST,
            "recommendations",
            "on_conflict=subject_id,candidate_id,kind",
            Some(&body),
            true,
        )
        .await
    }

    async fn recommendations_for(&self, subject: &UserId) -> RepoResult<Vec<Recommendation>> {
        let rows: Vec<RecommendationRow> = self
            .get_rows("recommendations", &format!("subject_id=eq.{subject}"))
            .await?;
        Ok(rows
            .into_iter()
            .map(RecommendationRow::into_recommendation)
            .collect())
    }

    async fn subscribe_connections(
        &self,
        target: &UserId,
    ) -> RepoResult<broadcast::Receiver<ConnectionChange>> {
        let (tx, rx) = broadcast::channel(32);
        let repo = self.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let mut watermark = Utc::now();
            let mut ticker = tokio::time::interval(repo.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.receiver_count() == 0 {
                    break;
                }
                let query = format!(
                    "target_id=eq.{target}&updated_at=gt.{}&order=updated_at.asc",
                    watermark.to_rfc3339()
                );
                match repo.get_rows::<ConnectionRow>("connections", &query).await {
                    Ok(rows) => {
                        for row in rows {
                            let connection = row.into_connection();
                            if connection.updated_at > watermark {
                                watermark = connection.updated_at;
                            }
                            let _ = tx.send(ConnectionChange {
                                requester_id: connection.requester_id,
                                target_id: connection.target_id,
                                status: connection.status,
                            });
                        }
                    }
                    Err(err) => {
                        warn!(user = %target, error = %err, "connection change poll failed")
                    }
                }
            }
        });
        Ok(rx)
    }
}
