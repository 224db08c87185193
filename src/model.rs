use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target match profile. Each profile has its own models and its own
/// live gating rules (continental matches require a confirmed lineup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Weekend fixtures in the top-5 European leagues
    WeekendTopFive,
    /// Continental cup fixtures (UCL)
    Continental,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::WeekendTopFive => write!(f, "weekend-top5"),
            Profile::Continental => write!(f, "continental"),
        }
    }
}

/// Which side of the total-goals line a selection backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeVariant {
    Over,
    Under,
}

impl OutcomeVariant {
    pub const ALL: [OutcomeVariant; 2] = [OutcomeVariant::Over, OutcomeVariant::Under];
}

impl fmt::Display for OutcomeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeVariant::Over => write!(f, "over"),
            OutcomeVariant::Under => write!(f, "under"),
        }
    }
}

impl std::str::FromStr for OutcomeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "over" => Ok(OutcomeVariant::Over),
            "under" => Ok(OutcomeVariant::Under),
            other => Err(format!("unknown outcome variant '{}'", other)),
        }
    }
}

/// Confidence tier of a calibrated probability. Higher tiers demand a
/// proportionally larger market mispricing before a selection is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceBucket {
    /// 70–74%
    Low,
    /// 75–79%
    Mid,
    /// 80%+
    High,
}

impl ConfidenceBucket {
    /// Bucket for a probability that already passed the minimum-confidence
    /// gate. Probabilities below 0.70 still map to `Low` here; the gate
    /// rejects them before bucketing matters.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.80 {
            ConfidenceBucket::High
        } else if confidence >= 0.75 {
            ConfidenceBucket::Mid
        } else {
            ConfidenceBucket::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceBucket::Low => "70-74%",
            ConfidenceBucket::Mid => "75-79%",
            ConfidenceBucket::High => "80%+",
        }
    }

    pub const ALL: [ConfidenceBucket; 3] = [
        ConfidenceBucket::Low,
        ConfidenceBucket::Mid,
        ConfidenceBucket::High,
    ];
}

/// Decimal market odds for one outcome variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketOdds {
    /// Opening decimal odds (must be > 1.0 to be usable)
    pub opening: f64,
    /// Closing decimal odds, when the line is already closed
    /// (backtest / CLV only)
    pub closing: Option<f64>,
}

impl MarketOdds {
    /// Implied probability of the opening line.
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.opening
    }

    /// Closing line value: how far the market moved in our favour after
    /// the opening line. `None` until the closing line is known.
    pub fn clv(&self) -> Option<f64> {
        self.closing.map(|c| (1.0 / c) - (1.0 / self.opening))
    }
}

/// Feature fields the gating layer actually inspects. Everything else the
/// model consumes stays upstream; the engine never sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Whether the starting lineup has been confirmed (live only)
    pub lineup_confirmed: Option<bool>,
    /// Odds drift over the last hour, as a probability delta (live only)
    pub market_drift_1h: Option<f64>,
}

/// An upcoming or historical match under consideration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub profile: Profile,
    pub start_time: DateTime<Utc>,
    /// Last moment the match may be evaluated or alerted
    pub cutoff_time: DateTime<Utc>,
    pub features: FeatureSnapshot,
    pub over_odds: MarketOdds,
    pub under_odds: MarketOdds,
    /// Realized total goals, when the match has been played (backtest)
    pub goals_total: Option<u32>,
}

impl Candidate {
    pub fn odds(&self, variant: OutcomeVariant) -> &MarketOdds {
        match variant {
            OutcomeVariant::Over => &self.over_odds,
            OutcomeVariant::Under => &self.under_odds,
        }
    }
}

/// A calibrated win-probability estimate for one (match, variant) pair.
///
/// Over and under estimates come from independent models and need not sum
/// to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbabilityEstimate {
    /// Probability in (0, 1)
    pub probability: f64,
    /// Timestamp of the newest data the producing model was fitted on.
    /// The backtest rejects estimates trained on data from inside the
    /// window being evaluated.
    pub trained_before: DateTime<Utc>,
}

/// A selection that passed every gate. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub profile: Profile,
    pub variant: OutcomeVariant,
    /// Model probability (0.70+ by construction)
    pub confidence: f64,
    /// confidence − implied opening probability
    pub edge: f64,
    /// Closing line value, when the closing line was known at creation
    pub clv: Option<f64>,
    /// Decimal odds the selection was taken at
    pub odds: f64,
    /// Fraction of bankroll staked (post-clamp)
    pub stake_fraction: f64,
    /// Absolute stake in bankroll currency
    pub stake_amount: f64,
    pub created_at: DateTime<Utc>,
    pub cutoff_time: DateTime<Utc>,
}

impl Selection {
    pub fn bucket(&self) -> ConfidenceBucket {
        ConfidenceBucket::from_confidence(self.confidence)
    }
}

/// Realized result of a settled selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOutcome {
    Win,
    Loss,
}

impl SelectionOutcome {
    /// Signed P&L for a selection settled with this outcome.
    pub fn pnl(&self, selection: &Selection) -> f64 {
        match self {
            SelectionOutcome::Win => selection.stake_amount * (selection.odds - 1.0),
            SelectionOutcome::Loss => -selection.stake_amount,
        }
    }
}
