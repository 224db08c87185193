pub mod report;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bankroll::BankrollLedger;
use crate::engine::{DataFault, EvaluationMode, SelectionEngine};
use crate::model::{
    Candidate, FeatureSnapshot, MarketOdds, OutcomeVariant, ProbabilityEstimate, Profile,
    Selection, SelectionOutcome,
};
use crate::providers::{ProbabilityProvider, ProviderError, TableProvider};

use report::{aggregate_results, BacktestResults, RoundReport, SliceStats};

/// Total-goals line the over/under variants settle against.
const GOALS_LINE: f64 = 2.5;

/// Walk-forward backtest harness.
///
/// Replays historical candidates in strict chronological weekly windows,
/// driving the selection engine and a single bankroll ledger. Weeks are
/// processed sequentially; ordering is what makes the no-lookahead
/// assertion and bankroll continuity meaningful.
pub struct BacktestRunner {
    engine: SelectionEngine,
    provider: Arc<dyn ProbabilityProvider>,
}

impl BacktestRunner {
    pub fn new(engine: SelectionEngine, provider: Arc<dyn ProbabilityProvider>) -> Self {
        BacktestRunner { engine, provider }
    }

    /// Run the full walk-forward over `candidates`, settling into
    /// `ledger`. The ledger is threaded in by the caller, who owns all
    /// bankroll state for the run.
    pub async fn run(
        &self,
        mut candidates: Vec<Candidate>,
        ledger: &mut BankrollLedger,
    ) -> Result<BacktestResults> {
        candidates.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });

        let weeks = group_by_iso_week(candidates);
        info!("Running backtest over {} weekly windows", weeks.len());

        let initial_balance = ledger.balance();
        let mut rounds = Vec::new();
        let mut weekly_returns = Vec::new();

        for ((year, week), week_candidates) in weeks {
            let balance_before = ledger.balance();
            // Stop-loss halts are scoped to the week they fired in; a new
            // window starts clean.
            ledger.reset_halt();

            let round = self
                .run_week(year, week, &week_candidates, ledger)
                .await;

            if balance_before > 0.0 {
                weekly_returns.push((ledger.balance() - balance_before) / balance_before);
            }
            info!(
                "Week {}: {} selections, {:.1}% hit rate, P&L {:+.2}",
                round.round_id,
                round.selections,
                round.hit_rate * 100.0,
                round.profit_loss
            );
            rounds.push(round);
        }

        Ok(aggregate_results(
            rounds,
            initial_balance,
            ledger.balance(),
            ledger.max_drawdown(),
            &weekly_returns,
        ))
    }

    /// Evaluate and settle one weekly window.
    async fn run_week(
        &self,
        year: i32,
        week: u32,
        candidates: &[Candidate],
        ledger: &mut BankrollLedger,
    ) -> RoundReport {
        let window_start = iso_week_start(year, week);
        let round_id = format!("{}_W{:02}", year, week);

        let mut data_faults = 0usize;
        let mut passing = Vec::new();

        for candidate in candidates {
            let over = self
                .fetch_estimate(candidate, OutcomeVariant::Over, window_start, &mut data_faults)
                .await;
            let under = self
                .fetch_estimate(candidate, OutcomeVariant::Under, window_start, &mut data_faults)
                .await;

            let evaluation = self.engine.evaluate_match(
                candidate,
                over,
                under,
                ledger.balance(),
                EvaluationMode::Backtest,
                window_start,
            );
            data_faults += evaluation.fault_count();
            if let Some(selection) = evaluation.selection {
                passing.push(selection);
            }
        }

        let limited = self.engine.rank_and_limit(passing);

        // Settle in ranked order. Once the stop-loss fires, no further
        // selection is staked for the remainder of this week.
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut total_stake = 0.0;
        let mut profit_loss = 0.0;
        let mut clv_sum = 0.0;
        let mut clv_count = 0usize;
        let mut confidence_sum = 0.0;
        let mut edge_sum = 0.0;
        let mut by_bucket: std::collections::HashMap<_, SliceStats> = Default::default();
        let mut by_profile: std::collections::HashMap<_, SliceStats> = Default::default();
        let mut settled = 0usize;
        let mut halted = false;

        for selection in &limited {
            if ledger.is_halted() {
                halted = true;
                warn!(
                    "Week {}: skipping {} remaining selection(s) after stop-loss halt",
                    round_id,
                    limited.len() - settled
                );
                break;
            }
            let outcome = settle_selection(selection, candidates);
            let pnl = ledger.record_settlement(selection, outcome);

            settled += 1;
            total_stake += selection.stake_amount;
            profit_loss += pnl;
            confidence_sum += selection.confidence;
            edge_sum += selection.edge;
            if let Some(clv) = selection.clv {
                clv_sum += clv;
                clv_count += 1;
            }
            let won = outcome == SelectionOutcome::Win;
            if won {
                wins += 1;
            } else {
                losses += 1;
            }
            by_bucket
                .entry(selection.bucket())
                .or_insert_with(SliceStats::default)
                .record(won);
            by_profile
                .entry(selection.profile)
                .or_insert_with(SliceStats::default)
                .record(won);
        }
        halted |= ledger.is_halted();

        let (start_date, end_date) = window_bounds(window_start, candidates);
        RoundReport {
            round_id,
            start_date,
            end_date,
            total_matches: candidates.len(),
            selections: settled,
            wins,
            losses,
            hit_rate: if settled > 0 {
                wins as f64 / settled as f64
            } else {
                0.0
            },
            roi: if total_stake > 0.0 {
                profit_loss / total_stake
            } else {
                0.0
            },
            avg_clv: if clv_count > 0 {
                clv_sum / clv_count as f64
            } else {
                0.0
            },
            total_stake,
            profit_loss,
            avg_confidence: if settled > 0 {
                confidence_sum / settled as f64
            } else {
                0.0
            },
            avg_edge: if settled > 0 {
                edge_sum / settled as f64
            } else {
                0.0
            },
            drawdown: ledger.drawdown(),
            halted,
            data_faults,
            by_bucket,
            by_profile,
        }
    }

    /// Fetch one estimate, enforcing the no-lookahead rule: an estimate
    /// trained on data at or after the window start is a data-quality
    /// fault and is discarded.
    async fn fetch_estimate(
        &self,
        candidate: &Candidate,
        variant: OutcomeVariant,
        window_start: DateTime<Utc>,
        data_faults: &mut usize,
    ) -> Option<ProbabilityEstimate> {
        let estimate = match self.provider.estimate(candidate, variant).await {
            Ok(est) => est,
            Err(ProviderError::NoModel { .. }) | Err(ProviderError::NoEstimate { .. }) => {
                return None;
            }
            Err(err) => {
                warn!(
                    "Provider '{}' failed for {} ({}): {}",
                    self.provider.name(),
                    candidate.match_id,
                    variant,
                    err
                );
                return None;
            }
        };
        if estimate.trained_before >= window_start {
            warn!(
                "{} for {} ({}): trained_before={}, window start {}",
                DataFault::LookaheadEstimate,
                candidate.match_id,
                variant,
                estimate.trained_before,
                window_start
            );
            *data_faults += 1;
            return None;
        }
        Some(estimate)
    }
}

/// Settle a selection against the historical result when the match was
/// played, otherwise sample the model probability once with a seed
/// derived from the match id so re-runs are bit-identical.
fn settle_selection(selection: &Selection, candidates: &[Candidate]) -> SelectionOutcome {
    let goals = candidates
        .iter()
        .find(|c| c.match_id == selection.match_id)
        .and_then(|c| c.goals_total);

    let won = match goals {
        Some(goals) => match selection.variant {
            OutcomeVariant::Over => goals as f64 > GOALS_LINE,
            OutcomeVariant::Under => (goals as f64) < GOALS_LINE,
        },
        None => {
            let mut rng = ChaCha8Rng::seed_from_u64(match_seed(&selection.match_id));
            rng.gen::<f64>() < selection.confidence
        }
    };
    if won {
        SelectionOutcome::Win
    } else {
        SelectionOutcome::Loss
    }
}

/// Stable 64-bit seed for a match id (FNV-1a). `DefaultHasher` is not
/// guaranteed stable across releases; reproducibility requires a fixed
/// hash.
fn match_seed(match_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in match_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Group candidates by the ISO (year, week) of their start time. BTreeMap
/// keeps the windows in chronological order.
fn group_by_iso_week(candidates: Vec<Candidate>) -> BTreeMap<(i32, u32), Vec<Candidate>> {
    let mut weeks: BTreeMap<(i32, u32), Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        let iso = candidate.start_time.iso_week();
        weeks
            .entry((iso.year(), iso.week()))
            .or_default()
            .push(candidate);
    }
    weeks
}

/// Midnight UTC on the Monday of an ISO week.
fn iso_week_start(year: i32, week: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year"));
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid time"))
}

fn window_bounds(
    window_start: DateTime<Utc>,
    candidates: &[Candidate],
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = candidates
        .iter()
        .map(|c| c.start_time)
        .min()
        .unwrap_or(window_start);
    let end = candidates
        .iter()
        .map(|c| c.start_time)
        .max()
        .unwrap_or(window_start);
    (start, end)
}

/// One row of the historical dataset file: a candidate plus the model
/// estimates produced by the walk-forward training fold that owned it.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetRecord {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub over_probability: f64,
    pub under_probability: f64,
    /// Newest training-data timestamp of the fold that produced the
    /// estimates
    pub trained_before: DateTime<Utc>,
}

/// Load a JSON dataset and split it into candidates plus a table-backed
/// probability provider.
pub fn load_dataset(path: &Path) -> Result<(Vec<Candidate>, TableProvider)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let records: Vec<DatasetRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;

    let mut provider = TableProvider::new();
    let mut candidates = Vec::with_capacity(records.len());
    for record in records {
        provider.insert(
            &record.candidate.match_id,
            record.candidate.profile,
            OutcomeVariant::Over,
            ProbabilityEstimate {
                probability: record.over_probability,
                trained_before: record.trained_before,
            },
        );
        provider.insert(
            &record.candidate.match_id,
            record.candidate.profile,
            OutcomeVariant::Under,
            ProbabilityEstimate {
                probability: record.under_probability,
                trained_before: record.trained_before,
            },
        );
        candidates.push(record.candidate);
    }
    info!("Loaded {} historical candidates", candidates.len());
    Ok((candidates, provider))
}

/// Build a candidate for tests and synthetic runs.
#[cfg(test)]
pub(crate) fn synthetic_candidate(
    match_id: &str,
    profile: Profile,
    start_time: DateTime<Utc>,
    over_opening: f64,
    goals_total: Option<u32>,
) -> Candidate {
    Candidate {
        match_id: match_id.into(),
        home_team: format!("home-{}", match_id),
        away_team: format!("away-{}", match_id),
        league: match profile {
            Profile::WeekendTopFive => "premier-league".into(),
            Profile::Continental => "ucl".into(),
        },
        profile,
        start_time,
        cutoff_time: start_time - chrono::Duration::hours(1),
        features: FeatureSnapshot::default(),
        over_odds: MarketOdds {
            opening: over_opening,
            closing: None,
        },
        under_odds: MarketOdds {
            opening: 2.0,
            closing: None,
        },
        goals_total,
    }
}
