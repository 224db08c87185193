use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{ConfidenceBucket, Profile};

/// Win/loss tally for one slice of the selections (a bucket, a profile,
/// or a whole round).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SliceStats {
    pub selections: usize,
    pub wins: usize,
}

impl SliceStats {
    pub fn record(&mut self, won: bool) {
        self.selections += 1;
        if won {
            self.wins += 1;
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.selections == 0 {
            0.0
        } else {
            self.wins as f64 / self.selections as f64
        }
    }
}

/// Per-week performance report produced by the backtest runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    /// ISO week id, e.g. "2024_W09"
    pub round_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Matches seen in the window, before any gating
    pub total_matches: usize,
    pub selections: usize,
    pub wins: usize,
    pub losses: usize,
    pub hit_rate: f64,
    /// Week P&L divided by week stake
    pub roi: f64,
    /// Mean CLV over selections with a known closing line
    pub avg_clv: f64,
    pub total_stake: f64,
    pub profit_loss: f64,
    pub avg_confidence: f64,
    pub avg_edge: f64,
    /// Ledger drawdown after the week settled
    pub drawdown: f64,
    /// Whether the stop-loss halt fired inside this week
    pub halted: bool,
    /// Candidates dropped for upstream data corruption this week
    pub data_faults: usize,
    pub by_bucket: HashMap<ConfidenceBucket, SliceStats>,
    pub by_profile: HashMap<Profile, SliceStats>,
}

/// Run-level aggregates over all weekly rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub total_rounds: usize,
    pub total_selections: usize,
    pub total_wins: usize,
    pub overall_hit_rate: f64,
    /// (final balance − initial balance) / initial balance
    pub overall_roi: f64,
    pub max_drawdown: f64,
    /// mean(weekly return) / stdev(weekly return); 0 when flat
    pub sharpe_ratio: f64,
    /// ROI / max drawdown; 0 when drawdown is 0
    pub calmar_ratio: f64,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_data_faults: usize,
    pub rounds: Vec<RoundReport>,
    pub by_bucket: HashMap<ConfidenceBucket, SliceStats>,
    pub by_profile: HashMap<Profile, SliceStats>,
}

/// Sharpe-like ratio over per-week returns. Not annualised; rounds are
/// the unit of account here.
pub fn sharpe_ratio(weekly_returns: &[f64]) -> f64 {
    if weekly_returns.len() < 2 {
        return 0.0;
    }
    let n = weekly_returns.len() as f64;
    let mean = weekly_returns.iter().sum::<f64>() / n;
    let variance = weekly_returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Fold weekly rounds and the final ledger state into run aggregates.
pub fn aggregate_results(
    rounds: Vec<RoundReport>,
    initial_balance: f64,
    final_balance: f64,
    max_drawdown: f64,
    weekly_returns: &[f64],
) -> BacktestResults {
    let total_selections: usize = rounds.iter().map(|r| r.selections).sum();
    let total_wins: usize = rounds.iter().map(|r| r.wins).sum();
    let total_data_faults: usize = rounds.iter().map(|r| r.data_faults).sum();
    let overall_hit_rate = if total_selections > 0 {
        total_wins as f64 / total_selections as f64
    } else {
        0.0
    };
    let overall_roi = if initial_balance > 0.0 {
        (final_balance - initial_balance) / initial_balance
    } else {
        0.0
    };
    let calmar_ratio = if max_drawdown > 0.0 {
        overall_roi / max_drawdown
    } else {
        0.0
    };

    let mut by_bucket: HashMap<ConfidenceBucket, SliceStats> = HashMap::new();
    let mut by_profile: HashMap<Profile, SliceStats> = HashMap::new();
    for round in &rounds {
        for (bucket, stats) in &round.by_bucket {
            let entry = by_bucket.entry(*bucket).or_default();
            entry.selections += stats.selections;
            entry.wins += stats.wins;
        }
        for (profile, stats) in &round.by_profile {
            let entry = by_profile.entry(*profile).or_default();
            entry.selections += stats.selections;
            entry.wins += stats.wins;
        }
    }

    BacktestResults {
        total_rounds: rounds.len(),
        total_selections,
        total_wins,
        overall_hit_rate,
        overall_roi,
        max_drawdown,
        sharpe_ratio: sharpe_ratio(weekly_returns),
        calmar_ratio,
        initial_balance,
        final_balance,
        total_data_faults,
        rounds,
        by_bucket,
        by_profile,
    }
}

/// Render a markdown summary of the run, suitable for writing to a file
/// or posting to the report webhook.
pub fn render_report(results: &BacktestResults) -> String {
    let mut out = String::new();
    out.push_str("# Selection Engine Backtest Report\n\n");
    out.push_str("## Overall Performance\n");
    out.push_str(&format!("- **Total Rounds**: {}\n", results.total_rounds));
    out.push_str(&format!(
        "- **Total Selections**: {}\n",
        results.total_selections
    ));
    out.push_str(&format!(
        "- **Hit Rate**: {:.1}%\n",
        results.overall_hit_rate * 100.0
    ));
    out.push_str(&format!("- **ROI**: {:.2}%\n", results.overall_roi * 100.0));
    out.push_str(&format!(
        "- **Max Drawdown**: {:.2}%\n",
        results.max_drawdown * 100.0
    ));
    out.push_str(&format!("- **Sharpe Ratio**: {:.2}\n", results.sharpe_ratio));
    out.push_str(&format!("- **Calmar Ratio**: {:.2}\n", results.calmar_ratio));
    out.push_str(&format!(
        "- **Data-Quality Faults**: {}\n",
        results.total_data_faults
    ));

    out.push_str("\n## Profile Performance\n");
    for profile in [Profile::WeekendTopFive, Profile::Continental] {
        let stats = results.by_profile.get(&profile).copied().unwrap_or_default();
        out.push_str(&format!("\n### {}\n", profile));
        out.push_str(&format!("- **Selections**: {}\n", stats.selections));
        out.push_str(&format!("- **Wins**: {}\n", stats.wins));
        out.push_str(&format!("- **Hit Rate**: {:.1}%\n", stats.hit_rate() * 100.0));
    }

    out.push_str("\n## Confidence Bucket Performance\n");
    for bucket in ConfidenceBucket::ALL {
        let stats = results.by_bucket.get(&bucket).copied().unwrap_or_default();
        out.push_str(&format!("\n### {}\n", bucket.label()));
        out.push_str(&format!("- **Selections**: {}\n", stats.selections));
        out.push_str(&format!("- **Wins**: {}\n", stats.wins));
        out.push_str(&format!("- **Hit Rate**: {:.1}%\n", stats.hit_rate() * 100.0));
    }

    out.push_str("\n## Weekly Round Reports\n");
    for round in results.rounds.iter().rev().take(5).rev() {
        out.push_str(&format!("\n### {}\n", round.round_id));
        out.push_str(&format!(
            "- **Date**: {} to {}\n",
            round.start_date.format("%Y-%m-%d"),
            round.end_date.format("%Y-%m-%d")
        ));
        out.push_str(&format!("- **Selections**: {}\n", round.selections));
        out.push_str(&format!("- **Hit Rate**: {:.1}%\n", round.hit_rate * 100.0));
        out.push_str(&format!("- **ROI**: {:.2}%\n", round.roi * 100.0));
        out.push_str(&format!(
            "- **Avg Confidence**: {:.3}\n",
            round.avg_confidence
        ));
        if round.halted {
            out.push_str("- **Stop-loss halt fired this week**\n");
        }
    }

    out
}
