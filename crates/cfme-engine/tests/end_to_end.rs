//! End-to-end flows across scoring, aggregation, lifecycle and insights.

use std::sync::Arc;

use cfme_core::{ConnectionStatus, MatchOrigin, PairState, Profile, UserId};
use cfme_engine::{EngineConfig, MatchEngine};
use cfme_score::{CompatibilityScorer, ScorerConfig};
use cfme_store::{InMemoryRepository, MatchRepository};
use chrono::{TimeZone, Utc};

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

#[test]
fn partial_skill_overlap_scores_one_third() {
    let subject = mk_profile("a", &["React", "Node"], &["Climbing"], Some("Berlin"));
    let candidate = mk_profile("b", &["React", "Python"], &["Climbing"], Some("Lisbon"));
    let scorer = CompatibilityScorer::new(ScorerConfig::default()).unwrap();

    let result = scorer.score(&subject, &candidate);
    assert_eq!(result.breakdown.skills, 33.0);
    assert_eq!(result.breakdown.interests, 100.0);
    assert_eq!(result.breakdown.location, 35.0);
    assert!((result.overall - 56.0).abs() < 1.0);
}

#[tokio::test]
async fn crossed_requests_converge_to_mutual_from_either_side() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_profile(mk_profile("alice", &["Rust"], &[], None)).await;
    repo.insert_profile(mk_profile("bob", &["Rust"], &[], None)).await;
    let engine = MatchEngine::new(repo.clone(), EngineConfig::default()).unwrap();
    let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

    // simulate the race: both requests landed before either saw the other
    let first = engine.lifecycle.request(&alice, &bob).await.unwrap();
    assert_eq!(first, PairState::Requested);
    let second = engine.lifecycle.request(&bob, &alice).await.unwrap();
    assert_eq!(second, PairState::Mutual);

    for row in repo.all_connections().await.unwrap() {
        assert_eq!(row.status, ConnectionStatus::Mutual);
    }

    // further requests from either side change nothing
    assert_eq!(engine.lifecycle.request(&alice, &bob).await.unwrap(), PairState::Mutual);
    assert_eq!(engine.lifecycle.request(&bob, &alice).await.unwrap(), PairState::Mutual);
}

#[tokio::test]
async fn sparse_data_yields_a_fully_fallback_tagged_sample() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_profile(mk_profile("me", &["Rust"], &[], None)).await;
    for id in ["p1", "p2", "p3", "p4", "p5"] {
        repo.insert_profile(mk_profile(id, &[], &[], None)).await;
    }
    let engine = MatchEngine::new(repo, EngineConfig::default()).unwrap();

    let set = engine
        .aggregator
        .build_candidates(&UserId::from("me"))
        .await
        .unwrap();

    assert_eq!(set.candidates.len(), 5);
    assert!(set.candidates.iter().all(|c| c.origin == MatchOrigin::Fallback));
    assert!(!set.candidates.is_empty());
}

#[tokio::test]
async fn insights_over_an_empty_and_a_populated_match_set() {
    let empty = cfme_insights::analyze(&[]);
    assert_eq!(empty.total_matches, 0);
    assert!(empty.clusters.is_empty());
    assert!(empty.summary.contains("No matches"));

    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_profile(mk_profile("me", &["Rust"], &["AI"], Some("Berlin"))).await;
    repo.insert_profile(mk_profile("peer", &["Rust", "Sales"], &["AI"], Some("Berlin"))).await;
    let engine = MatchEngine::new(repo, EngineConfig::default()).unwrap();

    let set = engine
        .aggregator
        .build_candidates(&UserId::from("me"))
        .await
        .unwrap();
    let insights = cfme_insights::analyze(&set.candidates);
    assert_eq!(insights.total_matches, 1);
    assert_eq!(insights.synthetic_count, 1);
    assert!(!insights.summary.is_empty());

    let reasons = cfme_insights::match_reasons(&set.candidates);
    assert_eq!(reasons.len(), 1);
}
