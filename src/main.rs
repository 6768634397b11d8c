use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use adsync::config::{Config, OauthCredentials};
use adsync::graph::client::GraphClient;
use adsync::graph::token::TokenRefresher;
use adsync::orchestrator::SyncJob;
use adsync::store::{Db, MetricStore};
use adsync::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "adsync", version, about = "Meta Ads metrics ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Fetch ad-level daily metrics for a date range and upsert them into Postgres
    Sync {
        /// Ad account id (falls back to AD_ACCOUNT_ID)
        #[arg(long)]
        account_id: Option<String>,
        /// First day of the range, Y-m-d (default: 3 days ago)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Last day of the range, Y-m-d (default: yesterday)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Swallow mid-pagination fetch errors as end-of-data (legacy behavior)
        #[arg(long, default_value_t = false)]
        lenient_fetch: bool,
    },
    /// Exchange the stored refresh token for a new access token and rewrite the env file
    RefreshToken {
        /// Path of the env file to rewrite
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
    /// Create the metrics table and composite-key index if they do not exist
    EnsureSchema {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    adsync::tracing::init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            account_id,
            start_date,
            end_date,
            db_url,
            lenient_fetch,
        } => run_sync(account_id, start_date, end_date, db_url, lenient_fetch).await,
        Commands::RefreshToken { env_file } => run_refresh_token(env_file).await,
        Commands::EnsureSchema { db_url } => run_ensure_schema(db_url).await,
    }
}

async fn run_sync(
    account_id: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    db_url: Option<String>,
    lenient_fetch: bool,
) -> Result<()> {
    let config = Config::load(db_url)?;
    let account_id = account_id
        .or_else(|| config.account_id.clone())
        .context("no ad account id; pass --account-id or set AD_ACCOUNT_ID")?;

    let today = Utc::now().date_naive();
    let start = start_date.unwrap_or(today - Duration::days(3));
    let end = end_date.unwrap_or(today - Duration::days(1));
    if start > end {
        bail!("start date {start} is after end date {end}");
    }

    // Startup failures are fatal: no windows are attempted past this point.
    let db = Db::connect(&config.database_url, config.db_max_connections)
        .await
        .context("database connection failed")?;
    let store = MetricStore::new(db);
    store
        .ensure_schema()
        .await
        .context("schema creation failed")?;

    let graph = GraphClient::new(&config.graph_api_base, &config.access_token)?;
    let job = SyncJob::new(graph, store, lenient_fetch);
    let report = job.run(&account_id, start, end).await;

    if !report.failed_windows.is_empty() {
        error!(
            failed_windows = report.failed_windows.len(),
            "some windows fetched incompletely; their data will be retried on the next run"
        );
    }
    Ok(())
}

async fn run_refresh_token(env_file: PathBuf) -> Result<()> {
    let (credentials, token_url) = OauthCredentials::load()?;
    let refresher = TokenRefresher::new(&token_url, credentials, env_file)?;
    // A failed refresh is reported but does not fail the process; the stored
    // token is left as it was.
    match refresher.refresh().await {
        Ok(_) => info!("token refresh complete"),
        Err(err) => error!(error = %err, "token refresh failed; stored token unchanged"),
    }
    Ok(())
}

async fn run_ensure_schema(db_url: Option<String>) -> Result<()> {
    env_util::init_env();
    let database_url = match db_url {
        Some(url) => url,
        None => env_util::db_url().context("no database URL configured")?,
    };
    let db = Db::connect(&database_url, 1)
        .await
        .context("database connection failed")?;
    MetricStore::new(db).ensure_schema().await
}
