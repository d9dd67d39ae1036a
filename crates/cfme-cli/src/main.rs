use std::sync::Arc;

use anyhow::Result;
use cfme_core::UserId;
use cfme_engine::MatchEngine;
use cfme_store::{RestConfig, RestRepository};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cfme-cli")]
#[command(about = "Co-founder match engine command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rank candidate matches for a user.
    Candidates { user: String },
    /// Generate and persist hybrid recommendations for a user.
    Recommend { user: String },
    /// Summarize a user's match set.
    Insights { user: String },
    /// Run one reconciliation sweep over all connection rows.
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let repo = Arc::new(RestRepository::new(RestConfig::from_env())?);
    let engine = MatchEngine::from_env(repo)?;

    match cli.command {
        Commands::Candidates { user } => {
            let set = engine.aggregator.build_candidates(&UserId::from(user)).await?;
            println!(
                "candidates for {}: {} entries, {} skipped",
                set.subject_id,
                set.candidates.len(),
                set.skipped_records
            );
            for candidate in &set.candidates {
                println!(
                    "  {:<24} overall={:>5.1} origin={:?} mutual={}",
                    candidate.profile.display_name(),
                    candidate.overall,
                    candidate.origin,
                    candidate.is_mutual
                );
            }
        }
        Commands::Recommend { user } => {
            let summary = engine.generator.generate(&UserId::from(user)).await?;
            println!(
                "recommendations complete: run_id={} pool={} generated={} skipped={}",
                summary.run_id, summary.pool_size, summary.generated, summary.skipped
            );
        }
        Commands::Insights { user } => {
            let set = engine.aggregator.build_candidates(&UserId::from(user)).await?;
            let insights = cfme_insights::analyze(&set.candidates);
            println!("{}", insights.summary);
            for cluster in &insights.clusters {
                println!("  {:<20} {}", cluster.name, cluster.matches);
            }
            for bucket in &insights.score_distribution {
                println!("  {:<7} {}", bucket.label, bucket.count);
            }
        }
        Commands::Sweep => {
            let summary = engine.lifecycle.sweep().await?;
            println!(
                "sweep complete: run_id={} examined={} repaired={}",
                summary.run_id, summary.examined_pairs, summary.repaired_pairs
            );
        }
    }

    Ok(())
}
