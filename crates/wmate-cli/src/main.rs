//! Command line entrypoint for the welfare catalog pipeline.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wmate_crawl::{
    candidates_from_snapshot, CrawlMode, CrawlOrchestrator, GovPortalFetcher,
};
use wmate_storage::{BatchStore, HttpFetcher};
use wmate_sync::{enrich, targets, view::BenefitViews, ServiceListClient, SnapshotPipeline, SyncConfig};

#[derive(Parser)]
#[command(name = "wmate", about = "Welfare benefit catalog pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the service catalog and refresh the normalized snapshot.
    Snapshot,
    /// Crawl detail pages for the current snapshot.
    Crawl {
        /// Crawl only the fixed probe ids into the sample file.
        #[arg(long, conflicts_with_all = ["limit", "incremental"])]
        sample: bool,
        /// Stop after this many candidates.
        #[arg(long)]
        limit: Option<usize>,
        /// Refetch only pages whose upstream stamp changed.
        #[arg(long, conflicts_with = "limit")]
        incremental: bool,
    },
    /// Rewrite every benefit into the fixed display shape.
    Enrich,
    /// Extract narrow-eligibility target flags.
    Targets,
    /// Print everything known about one benefit.
    Show { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;
    let store = BatchStore::new(&config.data_dir);

    match cli.command {
        Command::Snapshot => {
            let http = HttpFetcher::new(config.http_client_config())?;
            let client = ServiceListClient::new(http, &config);
            let outcome = SnapshotPipeline::new(client, store).run_once().await?;
            println!(
                "snapshot: {} total ({} added, {} modified, {} unchanged){}",
                outcome.total,
                outcome.added,
                outcome.modified,
                outcome.unchanged,
                if outcome.saved { "" } else { ", nothing to save" }
            );
        }
        Command::Crawl {
            sample,
            limit,
            incremental,
        } => {
            let mode = if sample {
                CrawlMode::Sample
            } else if incremental {
                CrawlMode::Incremental
            } else {
                CrawlMode::Full { limit }
            };

            let candidates = if sample {
                Vec::new()
            } else {
                let snapshot = store
                    .load_snapshot()
                    .await?
                    .context("no snapshot on disk, run `wmate snapshot` first")?;
                candidates_from_snapshot(&snapshot)
            };

            let http = HttpFetcher::new(config.http_client_config())?;
            let fetcher = GovPortalFetcher::new(http, config.detail_base_url.clone());
            let orchestrator = CrawlOrchestrator::new(fetcher, store)
                .with_delay(Duration::from_millis(config.crawl_delay_ms));

            let outcome = orchestrator.run(mode, &candidates).await?;
            println!(
                "crawl: {}/{} ok ({} fetched, {} reused, {} failed)",
                outcome.batch.success_count,
                outcome.batch.total_count,
                outcome.fetched,
                outcome.reused,
                outcome.batch.failed_ids.len()
            );
        }
        Command::Enrich => {
            let count = enrich::run_enrichment(&store, Utc::now()).await?;
            println!("enriched {count} benefits");
        }
        Command::Targets => {
            let count = targets::run_targets(&store, Utc::now()).await?;
            println!("flagged {count} benefits");
        }
        Command::Show { id } => {
            let views = BenefitViews::load(&store).await?;
            let merged = views
                .get(&id)
                .with_context(|| format!("no benefit with id {id}"))?;

            println!("{} [{}]", merged.record.title, merged.record.id);
            println!("  one-liner: {}", merged.record.summary.one_liner);
            if let Some(regions) = &merged.regions {
                println!("  regions: {}", regions.join(", "));
            }
            if let Some(enrichment) = merged.enrichment {
                println!("  summary: {}", enrichment.summary);
                for line in &enrichment.benefits {
                    println!("  benefit: {} {}", line.label, line.value);
                }
                if let Some(warning) = &enrichment.warning {
                    println!("  warning: {warning}");
                }
            }
            if let Some(detail) = merged.detail {
                println!(
                    "  detail: {} required docs, crawled {}",
                    detail.documents.required.len(),
                    detail.last_crawled.format("%Y-%m-%d")
                );
            }
            if let Some(flags) = merged.flags {
                println!("  flags: {}", format_flags(flags));
            }
        }
    }

    Ok(())
}

fn format_flags(flags: &wmate_core::TargetFlags) -> String {
    let mut parts = Vec::new();
    if flags.is_care_leaver_only {
        parts.push("care-leaver".to_string());
    }
    if flags.is_single_parent_only {
        parts.push("single-parent".to_string());
    }
    if flags.requires_basic_livelihood {
        parts.push("basic-livelihood".to_string());
    }
    if flags.requires_student {
        parts.push("student".to_string());
    }
    if flags.requires_disabled {
        parts.push("disabled".to_string());
    }
    if let Some(age) = &flags.age {
        parts.push(format!(
            "age {}..{}",
            age.min.map_or("-".to_string(), |v| v.to_string()),
            age.max.map_or("-".to_string(), |v| v.to_string())
        ));
    }
    parts.join(", ")
}
