pub mod kelly;

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::model::{
    Candidate, ConfidenceBucket, OutcomeVariant, ProbabilityEstimate, Profile, Selection,
};

use kelly::{edge, kelly_stake};

/// Selection criteria and risk limits. Defaults mirror the production
/// profile: 70%+ confidence targeting, bucket-tiered edge requirements,
/// quarter Kelly with a 2% per-selection cap.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub min_confidence: f64,
    pub edge_min_bucket_low: f64,
    pub edge_min_bucket_mid: f64,
    pub edge_min_bucket_high: f64,
    pub clv_min: f64,
    pub max_selections_per_round: usize,
    pub max_selections_per_profile: usize,
    pub kelly_fraction: f64,
    pub max_stake_percentage: f64,
    pub stop_loss_percentage: f64,
    /// Maximum tolerated 1h odds drift before a live market counts as
    /// unstable
    pub max_market_drift_1h: f64,
    /// Plausible decimal-odds range for live selections
    pub min_live_odds: f64,
    pub max_live_odds: f64,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        SelectionCriteria {
            min_confidence: 0.70,
            edge_min_bucket_low: 0.03,
            edge_min_bucket_mid: 0.04,
            edge_min_bucket_high: 0.05,
            clv_min: 0.02,
            max_selections_per_round: 5,
            max_selections_per_profile: 3,
            kelly_fraction: 0.25,
            max_stake_percentage: 0.02,
            stop_loss_percentage: 0.10,
            max_market_drift_1h: 0.05,
            min_live_odds: 1.5,
            max_live_odds: 3.0,
        }
    }
}

impl SelectionCriteria {
    /// Required edge for a confidence bucket. Higher claimed confidence
    /// must be backed by a larger market mispricing.
    pub fn required_edge(&self, bucket: ConfidenceBucket) -> f64 {
        match bucket {
            ConfidenceBucket::Low => self.edge_min_bucket_low,
            ConfidenceBucket::Mid => self.edge_min_bucket_mid,
            ConfidenceBucket::High => self.edge_min_bucket_high,
        }
    }
}

/// Whether live-only gates (lineup, drift, odds sanity) apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    Backtest,
    Live,
}

/// Why a (match, variant) pair was not selected. These are expected,
/// non-exceptional outcomes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateReason {
    /// No model available for this (profile, variant)
    NoEstimate,
    BelowMinConfidence,
    InsufficientEdge { required: f64 },
    InsufficientClv,
    LineupUnconfirmed,
    MissingDriftData,
    UnstableMarket,
    OddsOutOfRange,
    /// Lost the same-match tie-break against the sibling variant
    LowerThanSibling,
}

/// Upstream data corruption, flagged distinctly from gate rejections so
/// operators can audit the feed rather than the policy.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum DataFault {
    #[error("malformed odds {odds} (must be > 1.0)")]
    MalformedOdds { odds: f64 },
    #[error("probability {probability} outside (0, 1)")]
    ProbabilityOutOfRange { probability: f64 },
    #[error("estimate trained on data at or after the evaluation window start")]
    LookaheadEstimate,
}

/// Outcome of evaluating one (match, variant) pair.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Selected(Selection),
    Rejected(GateReason),
    Fault(DataFault),
}

impl Evaluation {
    pub fn is_fault(&self) -> bool {
        matches!(self, Evaluation::Fault(_))
    }
}

/// Full evaluation trail for one candidate: both variant verdicts plus the
/// single surviving selection, if any.
#[derive(Debug, Clone)]
pub struct MatchEvaluation {
    pub match_id: String,
    pub over: Evaluation,
    pub under: Evaluation,
    /// The one selection kept after the same-match tie-break
    pub selection: Option<Selection>,
}

impl MatchEvaluation {
    pub fn fault_count(&self) -> usize {
        self.over.is_fault() as usize + self.under.is_fault() as usize
    }
}

/// Pure decision layer: gates model estimates into selections and sizes
/// stakes. Holds no mutable state; the bankroll is read-only input.
#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    criteria: SelectionCriteria,
}

impl SelectionEngine {
    pub fn new(criteria: SelectionCriteria) -> Self {
        SelectionEngine { criteria }
    }

    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    /// Evaluate both variants of a candidate and resolve the same-match
    /// tie-break. `bankroll` is the current balance used for stake
    /// sizing; it is never mutated here.
    pub fn evaluate_match(
        &self,
        candidate: &Candidate,
        over_estimate: Option<ProbabilityEstimate>,
        under_estimate: Option<ProbabilityEstimate>,
        bankroll: f64,
        mode: EvaluationMode,
        now: DateTime<Utc>,
    ) -> MatchEvaluation {
        let mut over = self.evaluate_variant(
            candidate,
            OutcomeVariant::Over,
            over_estimate,
            bankroll,
            mode,
            now,
        );
        let mut under = self.evaluate_variant(
            candidate,
            OutcomeVariant::Under,
            under_estimate,
            bankroll,
            mode,
            now,
        );

        // Independent over/under models can both clear the gates for the
        // same match; keep exactly one, deterministically.
        let selection = match (&over, &under) {
            (Evaluation::Selected(o), Evaluation::Selected(u)) => {
                if selection_rank(o, u) == Ordering::Less {
                    debug!(
                        match_id = %candidate.match_id,
                        "both variants qualified, keeping over"
                    );
                    let kept = o.clone();
                    under = Evaluation::Rejected(GateReason::LowerThanSibling);
                    Some(kept)
                } else {
                    debug!(
                        match_id = %candidate.match_id,
                        "both variants qualified, keeping under"
                    );
                    let kept = u.clone();
                    over = Evaluation::Rejected(GateReason::LowerThanSibling);
                    Some(kept)
                }
            }
            (Evaluation::Selected(o), _) => Some(o.clone()),
            (_, Evaluation::Selected(u)) => Some(u.clone()),
            _ => None,
        };

        MatchEvaluation {
            match_id: candidate.match_id.clone(),
            over,
            under,
            selection,
        }
    }

    /// Run the ordered gates for a single (match, variant) pair.
    pub fn evaluate_variant(
        &self,
        candidate: &Candidate,
        variant: OutcomeVariant,
        estimate: Option<ProbabilityEstimate>,
        bankroll: f64,
        mode: EvaluationMode,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let Some(estimate) = estimate else {
            return Evaluation::Rejected(GateReason::NoEstimate);
        };

        let odds = candidate.odds(variant);

        // Data-quality checks precede policy gates: corrupt input is an
        // upstream problem, not a rejection.
        if odds.opening <= 1.0 {
            return Evaluation::Fault(DataFault::MalformedOdds { odds: odds.opening });
        }
        if let Some(closing) = odds.closing {
            if closing <= 1.0 {
                return Evaluation::Fault(DataFault::MalformedOdds { odds: closing });
            }
        }
        if !(estimate.probability > 0.0 && estimate.probability < 1.0) {
            return Evaluation::Fault(DataFault::ProbabilityOutOfRange {
                probability: estimate.probability,
            });
        }

        let confidence = estimate.probability;

        // Gate 1: minimum confidence
        if confidence < self.criteria.min_confidence {
            return Evaluation::Rejected(GateReason::BelowMinConfidence);
        }

        // Gate 2: bucket-tiered edge requirement
        let edge_value = edge(confidence, odds.opening);
        let required = self
            .criteria
            .required_edge(ConfidenceBucket::from_confidence(confidence));
        if edge_value < required {
            return Evaluation::Rejected(GateReason::InsufficientEdge { required });
        }

        // Gate 3: closing line value, when a closing line exists
        let clv = odds.clv();
        if let Some(clv) = clv {
            if clv < self.criteria.clv_min {
                return Evaluation::Rejected(GateReason::InsufficientClv);
            }
        }

        // Gate 4: live-only market gates
        if mode == EvaluationMode::Live {
            if candidate.profile == Profile::Continental
                && !candidate.features.lineup_confirmed.unwrap_or(false)
            {
                return Evaluation::Rejected(GateReason::LineupUnconfirmed);
            }
            match candidate.features.market_drift_1h {
                Some(drift) if drift.abs() > self.criteria.max_market_drift_1h => {
                    return Evaluation::Rejected(GateReason::UnstableMarket);
                }
                Some(_) => {}
                None => return Evaluation::Rejected(GateReason::MissingDriftData),
            }
            if odds.opening < self.criteria.min_live_odds
                || odds.opening > self.criteria.max_live_odds
            {
                return Evaluation::Rejected(GateReason::OddsOutOfRange);
            }
        }

        let stake_fraction = kelly_stake(
            confidence,
            odds.opening,
            self.criteria.kelly_fraction,
            self.criteria.max_stake_percentage,
        );
        let stake_amount = bankroll.max(0.0) * stake_fraction;

        Evaluation::Selected(Selection {
            match_id: candidate.match_id.clone(),
            home_team: candidate.home_team.clone(),
            away_team: candidate.away_team.clone(),
            league: candidate.league.clone(),
            profile: candidate.profile,
            variant,
            confidence,
            edge: edge_value,
            clv,
            odds: odds.opening,
            stake_fraction,
            stake_amount,
            created_at: now,
            cutoff_time: candidate.cutoff_time,
        })
    }

    /// Rank passing selections by confidence (ties: edge, then match id)
    /// and truncate to the per-profile cap, then the per-round cap.
    pub fn rank_and_limit(&self, mut selections: Vec<Selection>) -> Vec<Selection> {
        selections.sort_by(selection_rank);

        let mut per_profile: HashMap<Profile, usize> = HashMap::new();
        let mut limited = Vec::with_capacity(selections.len());
        for selection in selections {
            let count = per_profile.entry(selection.profile).or_insert(0);
            if *count >= self.criteria.max_selections_per_profile {
                continue;
            }
            *count += 1;
            limited.push(selection);
            if limited.len() >= self.criteria.max_selections_per_round {
                break;
            }
        }
        limited
    }
}

/// Deterministic ranking: higher confidence first, then higher edge, then
/// lexicographically smaller match id.
pub fn selection_rank(a: &Selection, b: &Selection) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.edge.partial_cmp(&a.edge).unwrap_or(Ordering::Equal))
        .then_with(|| a.match_id.cmp(&b.match_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureSnapshot, MarketOdds};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn make_candidate(match_id: &str, over_opening: f64, under_opening: f64) -> Candidate {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap();
        Candidate {
            match_id: match_id.into(),
            home_team: "Home".into(),
            away_team: "Away".into(),
            league: "premier-league".into(),
            profile: Profile::WeekendTopFive,
            start_time: start,
            cutoff_time: start - Duration::hours(1),
            features: FeatureSnapshot {
                lineup_confirmed: Some(true),
                market_drift_1h: Some(0.01),
            },
            over_odds: MarketOdds {
                opening: over_opening,
                closing: None,
            },
            under_odds: MarketOdds {
                opening: under_opening,
                closing: None,
            },
            goals_total: None,
        }
    }

    fn estimate(probability: f64) -> Option<ProbabilityEstimate> {
        Some(ProbabilityEstimate {
            probability,
            trained_before: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        })
    }

    fn engine() -> SelectionEngine {
        SelectionEngine::new(SelectionCriteria::default())
    }

    #[test]
    fn test_worked_example_a_high_bucket_pass() {
        // odds=2.00, confidence=0.80: edge 0.30 ≥ 0.05, quarter Kelly 0.15
        // clamps to the 2% cap.
        let candidate = make_candidate("m1", 2.0, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        match eval {
            Evaluation::Selected(sel) => {
                assert_relative_eq!(sel.edge, 0.30, epsilon = 1e-9);
                assert_relative_eq!(sel.stake_fraction, 0.02, epsilon = 1e-9);
                assert_relative_eq!(sel.stake_amount, 200.0, epsilon = 1e-9);
                assert!(sel.clv.is_none());
            }
            other => panic!("expected Selected, got {:?}", other),
        }
    }

    #[test]
    fn test_worked_example_b_low_bucket_edge_reject() {
        // confidence=0.72 (bucket 70-74%, required edge 0.03),
        // implied_prob=0.70 → edge 0.02 < 0.03 → rejected.
        let candidate = make_candidate("m1", 1.0 / 0.70, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.72),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        match eval {
            Evaluation::Rejected(GateReason::InsufficientEdge { required }) => {
                assert_relative_eq!(required, 0.03, epsilon = 1e-9);
            }
            other => panic!("expected edge rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_below_min_confidence_rejected() {
        let candidate = make_candidate("m1", 2.0, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.69),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::BelowMinConfidence)
        ));
    }

    #[test]
    fn test_missing_estimate_is_safe_reject() {
        let candidate = make_candidate("m1", 2.0, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            None,
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        assert!(matches!(eval, Evaluation::Rejected(GateReason::NoEstimate)));
    }

    #[test]
    fn test_malformed_odds_is_fault_not_rejection() {
        let candidate = make_candidate("m1", 1.0, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Fault(DataFault::MalformedOdds { .. })
        ));
    }

    #[test]
    fn test_clv_gate_applies_only_with_closing_odds() {
        let mut candidate = make_candidate("m1", 2.0, 2.0);
        // Market lengthened: closing 2.2 → negative CLV → reject
        candidate.over_odds.closing = Some(2.2);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::InsufficientClv)
        ));

        // Market shortened well past the CLV floor → pass
        candidate.over_odds.closing = Some(1.8);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        match eval {
            Evaluation::Selected(sel) => {
                assert!(sel.clv.unwrap() >= 0.02);
            }
            other => panic!("expected Selected, got {:?}", other),
        }
    }

    #[test]
    fn test_live_lineup_gate_continental_only() {
        let mut candidate = make_candidate("m1", 2.0, 2.0);
        candidate.profile = Profile::Continental;
        candidate.features.lineup_confirmed = Some(false);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Live,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::LineupUnconfirmed)
        ));

        // Same missing lineup does not gate a weekend-league match
        candidate.profile = Profile::WeekendTopFive;
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Live,
            Utc::now(),
        );
        assert!(matches!(eval, Evaluation::Selected(_)));
    }

    #[test]
    fn test_live_drift_and_sanity_gates() {
        let mut candidate = make_candidate("m1", 2.0, 2.0);
        candidate.features.market_drift_1h = Some(0.08);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Live,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::UnstableMarket)
        ));

        candidate.features.market_drift_1h = None;
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Live,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::MissingDriftData)
        ));

        // Odds outside the plausible live range
        let candidate = make_candidate("m1", 3.5, 2.0);
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Live,
            Utc::now(),
        );
        assert!(matches!(
            eval,
            Evaluation::Rejected(GateReason::OddsOutOfRange)
        ));
    }

    #[test]
    fn test_live_gates_skipped_in_backtest() {
        // Same out-of-range odds pass in backtest mode (edge still holds)
        let mut candidate = make_candidate("m1", 3.5, 2.0);
        candidate.features.market_drift_1h = None;
        let eval = engine().evaluate_variant(
            &candidate,
            OutcomeVariant::Over,
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        assert!(matches!(eval, Evaluation::Selected(_)));
    }

    #[test]
    fn test_same_match_tiebreak_keeps_higher_confidence() {
        let candidate = make_candidate("m1", 2.0, 2.0);
        let eval = engine().evaluate_match(
            &candidate,
            estimate(0.78),
            estimate(0.82),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        let sel = eval.selection.expect("one variant must survive");
        assert_eq!(sel.variant, OutcomeVariant::Under);
        assert!(matches!(
            eval.over,
            Evaluation::Rejected(GateReason::LowerThanSibling)
        ));
    }

    #[test]
    fn test_same_match_tiebreak_equal_confidence_uses_edge() {
        // Equal confidence; over has shorter implied probability → more edge
        let candidate = make_candidate("m1", 2.2, 2.0);
        let eval = engine().evaluate_match(
            &candidate,
            estimate(0.80),
            estimate(0.80),
            10_000.0,
            EvaluationMode::Backtest,
            Utc::now(),
        );
        let sel = eval.selection.expect("one variant must survive");
        assert_eq!(sel.variant, OutcomeVariant::Over);
    }

    #[test]
    fn test_stake_never_negative_or_above_cap() {
        let candidate = make_candidate("m1", 2.0, 2.0);
        for confidence in [0.70, 0.75, 0.80, 0.90, 0.99] {
            let eval = engine().evaluate_variant(
                &candidate,
                OutcomeVariant::Over,
                estimate(confidence),
                5_000.0,
                EvaluationMode::Backtest,
                Utc::now(),
            );
            if let Evaluation::Selected(sel) = eval {
                assert!(sel.stake_fraction >= 0.0);
                assert!(sel.stake_fraction <= 0.02 + 1e-12);
                assert!(sel.stake_amount <= 5_000.0 * 0.02 + 1e-9);
            }
        }
    }

    #[test]
    fn test_rank_and_limit_truncation() {
        let candidate = make_candidate("m", 2.0, 2.0);
        let now = Utc::now();
        let mut selections = Vec::new();
        for i in 0..8 {
            let mut c = candidate.clone();
            c.match_id = format!("m{}", i);
            if i >= 4 {
                c.profile = Profile::Continental;
            }
            let eval = engine().evaluate_variant(
                &c,
                OutcomeVariant::Over,
                estimate(0.76 + 0.01 * i as f64),
                10_000.0,
                EvaluationMode::Backtest,
                now,
            );
            if let Evaluation::Selected(sel) = eval {
                selections.push(sel);
            }
        }
        assert_eq!(selections.len(), 8);

        let limited = engine().rank_and_limit(selections);
        // 5 per round overall, at most 3 per profile
        assert_eq!(limited.len(), 5);
        let continental = limited
            .iter()
            .filter(|s| s.profile == Profile::Continental)
            .count();
        let weekend = limited.len() - continental;
        assert!(continental <= 3 && weekend <= 3);
        // Ranked by confidence descending
        for pair in limited.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}
