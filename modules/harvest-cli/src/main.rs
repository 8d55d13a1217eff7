use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apify_client::ApifyClient;
use harvest_common::{load_config, FileConfig, Secrets};
use harvest_core::{ApifyFetcher, CollectSettings, Collector, QueryJob};

const DEFAULT_LOG_FILTER: &str = "harvest=info,harvest_core=info,harvest_common=info,apify_client=info";

#[derive(Parser)]
#[command(name = "harvest", about = "Collect posts for a list of search queries into JSONL files")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./harvest.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    /// Only run queries with this description (repeatable)
    #[arg(long, value_name = "DESCRIPTION")]
    only: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = load_config(&cli.config)?;
    config.log_summary();
    let secrets = Secrets::from_env()?;
    secrets.log_redacted();

    let jobs = build_jobs(&config, &cli.only)?;
    std::fs::create_dir_all(&config.output.dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output.dir.display()
        )
    })?;

    let fetcher = ApifyFetcher::new(
        ApifyClient::new(secrets.apify_api_key.clone()),
        &config.backend,
    );
    let mut collector = Collector::new(fetcher, CollectSettings::from_config(&config));
    collector
        .open()
        .await
        .context("Failed to open fetcher")?;

    let summary = tokio::select! {
        summary = collector.collect_all(&jobs) => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping. Records already written are kept");
            None
        }
    };

    if let Err(e) = collector.close().await {
        warn!(error = %e, "Failed to close fetcher");
    }

    let Some(summary) = summary else {
        return Ok(());
    };
    println!("{summary}");

    if summary.failed() > 0 {
        bail!(
            "{} of {} queries failed",
            summary.failed(),
            summary.reports.len()
        );
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// One job per configured query, optionally narrowed to `only` descriptions.
fn build_jobs(config: &FileConfig, only: &[String]) -> Result<Vec<QueryJob>> {
    let jobs: Vec<QueryJob> = config
        .queries
        .iter()
        .filter(|q| only.is_empty() || only.iter().any(|d| d == &q.description))
        .map(|q| QueryJob {
            query: q.clone(),
            store_path: store_path(&config.output.dir, &q.description),
            max_records: config.max_records_for(q),
        })
        .collect();

    if jobs.is_empty() {
        bail!("No configured query matches --only {}", only.join(", "));
    }
    info!(queries = jobs.len(), "Queries selected");
    Ok(jobs)
}

/// `<dir>/<description>.jsonl` with the description reduced to a safe file name.
fn store_path(dir: &Path, description: &str) -> PathBuf {
    dir.join(format!("{}.jsonl", safe_file_stem(description)))
}

/// Keeps alphanumerics, spaces, `_` and `-`; anything else becomes `_`.
/// Surrounding whitespace is trimmed and inner spaces become `_`.
fn safe_file_stem(description: &str) -> String {
    let kept: String = description
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    kept.trim().replace(' ', "_")
}
