use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod backtest;
mod bankroll;
mod clock;
mod config;
mod db;
mod engine;
mod live;
mod model;
mod providers;

use backtest::{load_dataset, BacktestRunner};
use bankroll::BankrollLedger;
use clock::SystemClock;
use config::{Config, RunMode};
use db::Database;
use engine::SelectionEngine;
use live::alert::WebhookSink;
use live::feed::HttpCandidateFeed;
use live::{LiveScheduler, SchedulerSettings};
use model::Profile;
use providers::load_estimates;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    match config.mode {
        RunMode::Backtest => run_backtest(&config).await,
        RunMode::Live => run_live(&config).await,
    }
}

async fn run_backtest(config: &Config) -> Result<()> {
    let dataset_path = config
        .dataset_path
        .as_deref()
        .context("dataset path missing")?;
    info!("Backtest mode: replaying {}", dataset_path);

    let (candidates, provider) = load_dataset(Path::new(dataset_path))?;

    let engine = SelectionEngine::new(config.criteria());
    let mut ledger = BankrollLedger::new(config.initial_balance, config.stop_loss_percentage);
    let runner = BacktestRunner::new(engine, Arc::new(provider));
    let results = runner.run(candidates, &mut ledger).await?;

    info!(
        "Backtest complete: {} rounds, {} selections, hit rate {:.1}%, ROI {:+.2}%",
        results.total_rounds,
        results.total_selections,
        results.overall_hit_rate * 100.0,
        results.overall_roi * 100.0
    );

    let report = backtest::report::render_report(&results);
    match &config.report_path {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("failed to write report to {}", path))?;
            info!("Report written to {}", path);
        }
        None => println!("{}", report),
    }
    Ok(())
}

async fn run_live(config: &Config) -> Result<()> {
    let webhook_url = config
        .webhook_url
        .as_deref()
        .context("webhook URL missing")?;
    info!("Live mode: watching {} for upcoming fixtures", config.feed_url);

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);
    info!(
        "Stored selections so far: {} weekend top-5, {} continental",
        db.count_selections(Profile::WeekendTopFive)?,
        db.count_selections(Profile::Continental)?
    );

    // Seed initial balance if not yet recorded
    let balance = db.get_balance()?;
    let balance = if balance <= 0.0 {
        db.record_balance(config.initial_balance)?;
        info!("Initial balance recorded: {:.2}", config.initial_balance);
        config.initial_balance
    } else {
        balance
    };

    let estimates_path = config
        .estimates_path
        .as_deref()
        .context("estimates path missing")?;
    let provider = load_estimates(Path::new(estimates_path))?;
    if provider.is_empty() {
        bail!(
            "estimates file {} is empty; live mode refuses to run without \
             calibrated probabilities",
            estimates_path
        );
    }

    let engine = SelectionEngine::new(config.criteria());
    let ledger = BankrollLedger::new(balance, config.stop_loss_percentage);
    let settings = SchedulerSettings {
        recompute_offsets_mins: config.recompute_offsets_mins.clone(),
        tick_interval: Duration::from_secs(config.tick_interval_secs),
        fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
    };

    let mut scheduler = LiveScheduler::new(
        engine,
        Arc::new(provider),
        Arc::new(HttpCandidateFeed::new(&config.feed_url)?),
        Arc::new(WebhookSink::new(webhook_url)?),
        Arc::new(SystemClock),
        db,
        ledger,
        settings,
    )?;
    scheduler.run().await;
    Ok(())
}
