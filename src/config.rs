use clap::{Parser, ValueEnum};

use crate::engine::SelectionCriteria;

/// Whether this process replays history or watches upcoming fixtures.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Walk-forward replay of a historical dataset
    Backtest,
    /// Recurring evaluation of upcoming fixtures with alert dispatch
    Live,
}

/// Over/under selection engine for weekend top-5 and continental fixtures
#[derive(Parser, Debug, Clone)]
#[command(name = "betflow-engine", version, about)]
pub struct Config {
    /// Run mode
    #[arg(long, env = "RUN_MODE", value_enum, default_value = "backtest")]
    pub mode: RunMode,

    /// Historical dataset path (JSON, backtest mode)
    #[arg(long, env = "DATASET_PATH")]
    pub dataset_path: Option<String>,

    /// Where to write the backtest report (stdout when omitted)
    #[arg(long, env = "REPORT_PATH")]
    pub report_path: Option<String>,

    /// Events API base URL (live mode)
    #[arg(long, env = "FEED_URL", default_value = "http://localhost:8000")]
    pub feed_url: String,

    /// Alert webhook URL (required in live mode)
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Estimates file written by the offline scoring job (required in
    /// live mode)
    #[arg(long, env = "ESTIMATES_PATH")]
    pub estimates_path: Option<String>,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "betflow.db")]
    pub database_path: String,

    /// Starting bankroll (currency units)
    #[arg(long, env = "INITIAL_BALANCE", default_value = "10000.0")]
    pub initial_balance: f64,

    /// Live scheduler tick interval in seconds
    #[arg(long, env = "TICK_INTERVAL_SECS", default_value = "60")]
    pub tick_interval_secs: u64,

    /// Timeout for upstream fetches and alert dispatch, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "5")]
    pub fetch_timeout_secs: u64,

    /// Minutes before kickoff at which candidates are re-evaluated
    #[arg(
        long,
        env = "RECOMPUTE_OFFSETS_MINS",
        value_delimiter = ',',
        default_values_t = [60, 30]
    )]
    pub recompute_offsets_mins: Vec<i64>,

    /// Minimum model confidence for any selection (0.0–1.0)
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.70")]
    pub min_confidence: f64,

    /// Required edge for the 70-74% confidence bucket
    #[arg(long, env = "EDGE_MIN_BUCKET_LOW", default_value = "0.03")]
    pub edge_min_bucket_low: f64,

    /// Required edge for the 75-79% confidence bucket
    #[arg(long, env = "EDGE_MIN_BUCKET_MID", default_value = "0.04")]
    pub edge_min_bucket_mid: f64,

    /// Required edge for the 80%+ confidence bucket
    #[arg(long, env = "EDGE_MIN_BUCKET_HIGH", default_value = "0.05")]
    pub edge_min_bucket_high: f64,

    /// Minimum closing line value when the closing line is known
    #[arg(long, env = "CLV_MIN", default_value = "0.02")]
    pub clv_min: f64,

    /// Maximum selections emitted per round
    #[arg(long, env = "MAX_PER_ROUND", default_value = "5")]
    pub max_selections_per_round: usize,

    /// Maximum selections emitted per profile per round
    #[arg(long, env = "MAX_PER_PROFILE", default_value = "3")]
    pub max_selections_per_profile: usize,

    /// Fraction of full Kelly to stake (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25")]
    pub kelly_fraction: f64,

    /// Hard cap on stake as a fraction of bankroll (0.0–1.0)
    #[arg(long, env = "MAX_STAKE_PERCENTAGE", default_value = "0.02")]
    pub max_stake_percentage: f64,

    /// Drawdown fraction that halts further selections (0.0–1.0)
    #[arg(long, env = "STOP_LOSS_PERCENTAGE", default_value = "0.10")]
    pub stop_loss_percentage: f64,

    /// Maximum tolerated 1h odds drift before a live market counts as
    /// unstable
    #[arg(long, env = "MAX_MARKET_DRIFT_1H", default_value = "0.05")]
    pub max_market_drift_1h: f64,

    /// Lower bound of the plausible live decimal-odds range
    #[arg(long, env = "MIN_LIVE_ODDS", default_value = "1.5")]
    pub min_live_odds: f64,

    /// Upper bound of the plausible live decimal-odds range
    #[arg(long, env = "MAX_LIVE_ODDS", default_value = "3.0")]
    pub max_live_odds: f64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            RunMode::Backtest => {
                if self.dataset_path.is_none() {
                    anyhow::bail!("--dataset-path is required in backtest mode");
                }
            }
            RunMode::Live => {
                if self.webhook_url.is_none() {
                    anyhow::bail!("--webhook-url is required in live mode");
                }
                if self.estimates_path.is_none() {
                    anyhow::bail!("--estimates-path is required in live mode");
                }
            }
        }
        if self.initial_balance <= 0.0 {
            anyhow::bail!("initial_balance must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!("min_confidence must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_stake_percentage) {
            anyhow::bail!("max_stake_percentage must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.stop_loss_percentage) {
            anyhow::bail!("stop_loss_percentage must be between 0.0 and 1.0");
        }
        for (name, value) in [
            ("edge_min_bucket_low", self.edge_min_bucket_low),
            ("edge_min_bucket_mid", self.edge_min_bucket_mid),
            ("edge_min_bucket_high", self.edge_min_bucket_high),
            ("max_market_drift_1h", self.max_market_drift_1h),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }
        if self.min_live_odds <= 1.0 {
            anyhow::bail!("min_live_odds must be greater than 1.0");
        }
        if self.max_live_odds < self.min_live_odds {
            anyhow::bail!("max_live_odds must be at least min_live_odds");
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        if self.recompute_offsets_mins.is_empty() {
            anyhow::bail!("at least one recompute offset is required");
        }
        if self
            .recompute_offsets_mins
            .windows(2)
            .any(|pair| pair[0] <= pair[1])
        {
            anyhow::bail!("recompute offsets must be strictly decreasing (e.g. 60,30)");
        }
        Ok(())
    }

    /// Selection thresholds assembled from the command-line values.
    pub fn criteria(&self) -> SelectionCriteria {
        SelectionCriteria {
            min_confidence: self.min_confidence,
            edge_min_bucket_low: self.edge_min_bucket_low,
            edge_min_bucket_mid: self.edge_min_bucket_mid,
            edge_min_bucket_high: self.edge_min_bucket_high,
            clv_min: self.clv_min,
            max_selections_per_round: self.max_selections_per_round,
            max_selections_per_profile: self.max_selections_per_profile,
            kelly_fraction: self.kelly_fraction,
            max_stake_percentage: self.max_stake_percentage,
            stop_loss_percentage: self.stop_loss_percentage,
            max_market_drift_1h: self.max_market_drift_1h,
            min_live_odds: self.min_live_odds,
            max_live_odds: self.max_live_odds,
        }
    }
}
