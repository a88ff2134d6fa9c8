//! forecast-bot: daily race forecasting with outcome-driven weight tuning.
//!
//! Single-binary Tokio application that, once per day:
//! 1. Verifies yesterday's predictions against recorded outcomes
//! 2. Tunes each category's factor weights from recent accuracy
//! 3. Collects and scores tomorrow's events
//! 4. Persists the ranked predictions
//! 5. Prunes artifacts past the retention window

mod config;
mod cycle;
mod journal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use common::{Category, ForecastConfig};
use feed_client::{HttpFeedClient, RetryPolicy, RetryingFeed};

use crate::cycle::{verify_date, Orchestrator};

/// Race forecasting bot
#[derive(Parser)]
#[command(name = "forecast-bot", about = "Daily race forecasting and weight tuning")]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full daily cycle.
    RunCycle {
        /// Run date (YYYY-MM-DD); defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Verify stored predictions for a date against recorded outcomes.
    Verify {
        /// Prediction date; defaults to yesterday (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Tune weights from the stored verification window.
    Tune {
        /// Only this category; defaults to every configured category.
        #[arg(long)]
        category: Option<Category>,
        /// Effective date of the tuned weights; defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete artifacts older than the retention window.
    Prune {
        /// Retention window in days; defaults to the configured value.
        #[arg(long)]
        days: Option<i64>,
        /// Reference date; defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print the on-disk data status instead of pruning.
        #[arg(long)]
        status: bool,
    },
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_orchestrator(cfg: ForecastConfig) -> anyhow::Result<Orchestrator> {
    let client = HttpFeedClient::new(&cfg.feed, &cfg.fetch)?;
    let feed = Arc::new(RetryingFeed::new(client, RetryPolicy::from_config(&cfg.fetch)));
    let orchestrator = Orchestrator::new(cfg, feed.clone(), feed)
        .context("failed to open data directory")?;
    Ok(orchestrator)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = config::load_config(cli.config.as_deref())?;
    info!(
        "Data dir: {}, categories: {:?}",
        cfg.data_dir.display(),
        cfg.categories
    );
    info!(
        "Tuning: window={}d, t_min={}, t_target={}, rate={}, w_max={}; retention={}d",
        cfg.tuning.window_days,
        cfg.tuning.t_min,
        cfg.tuning.t_target,
        cfg.tuning.learning_rate,
        cfg.tuning.w_max,
        cfg.retention.retention_days,
    );

    let categories = cfg.categories.clone();
    let retention_days = cfg.retention.retention_days;
    let orchestrator = build_orchestrator(cfg)?;

    match cli.command {
        Command::RunCycle { date } => {
            let abort = orchestrator.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, aborting after the current stage");
                    abort.abort();
                }
            });

            let report = orchestrator.run_cycle(date.unwrap_or_else(today)).await?;
            print_json(&report)?;
            Ok(ExitCode::from(report.exit_code()))
        }
        Command::Verify { date } => {
            let date = date.unwrap_or_else(|| verify_date(today()));
            let reports = orchestrator.verify(date).await?;
            let incomplete = reports.len() < categories.len();
            print_json(&reports)?;
            Ok(ExitCode::from(u8::from(incomplete)))
        }
        Command::Tune { category, date } => {
            let selected = match category {
                Some(c) => vec![c],
                None => categories,
            };
            let outcomes = orchestrator
                .tune(&selected, date.unwrap_or_else(today))
                .await?;
            print_json(&outcomes)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Prune { days, date, status } => {
            let date = date.unwrap_or_else(today);
            if status {
                print_json(&orchestrator.status(date)?)?;
            } else {
                let result = orchestrator
                    .prune(date, days.unwrap_or(retention_days))
                    .await?;
                print_json(&result)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "forecast_bot=info,scoring=info,learning=info,store=info,feed_client=info".into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// `2` for fatal errors (and anything that is not a domain error), `1`
/// for recoverable ones.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    let fatal = err
        .downcast_ref::<common::Error>()
        .map_or(true, common::Error::is_fatal);
    if fatal {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_corruption_exits_with_two() {
        let err = anyhow::Error::new(common::Error::StoreCorrupted("weights/horse_racing.json".into()));
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_context_keeps_fatal_classification() {
        let err = anyhow::Error::new(common::Error::StoreCorrupted("bad".into()))
            .context("cycle failed");
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_recoverable_error_exits_with_one() {
        let err = anyhow::Error::new(common::Error::ExternalFetch("timeout".into()));
        assert_eq!(exit_code_for(&err), 1);
    }
}
