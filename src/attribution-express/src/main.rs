//! Attribution Express — customer-journey attribution scoring pipeline.
//!
//! One-shot entry point an external scheduler invokes for a date window:
//! transforms raw touchpoints, scores them through the external IHC API,
//! persists the results, and exports the per-channel report.

use attribution_core::config::AppConfig;
use attribution_pipeline::PipelineCoordinator;
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "attribution-express")]
#[command(about = "Customer-journey attribution scoring pipeline")]
#[command(version)]
struct Cli {
    /// Start of the run window, YYYY-MM-DD (defaults to 30 days ago)
    #[arg(long, env = "ATTRIBUTION_EXPRESS__START_DATE")]
    start_date: Option<NaiveDate>,

    /// End of the run window, YYYY-MM-DD (defaults to today)
    #[arg(long, env = "ATTRIBUTION_EXPRESS__END_DATE")]
    end_date: Option<NaiveDate>,

    /// SQLite database path (overrides config)
    #[arg(long, env = "ATTRIBUTION_EXPRESS__STORAGE__DATABASE_PATH")]
    database: Option<String>,

    /// CSV report destination (overrides config)
    #[arg(long, env = "ATTRIBUTION_EXPRESS__STORAGE__REPORT_PATH")]
    report: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attribution_express=info,attribution_pipeline=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Attribution Express starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(database) = cli.database {
        config.storage.database_path = database;
    }
    if let Some(report) = cli.report {
        config.storage.report_path = report;
    }

    let today = Utc::now().date_naive();
    let end = cli.end_date.unwrap_or(today);
    let start = cli.start_date.unwrap_or(end - Duration::days(30));

    let coordinator = PipelineCoordinator::from_config(&config)?;
    let summary = coordinator.run(start, end).await?;

    if summary.transform_errors > 0 || summary.scored_error > 0 {
        warn!(
            transform_errors = summary.transform_errors,
            scored_error = summary.scored_error,
            "Run completed with errors; check the summary"
        );
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
