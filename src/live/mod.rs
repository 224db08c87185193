pub mod alert;
pub mod feed;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bankroll::BankrollLedger;
use crate::clock::Clock;
use crate::db::Database;
use crate::engine::{Evaluation, EvaluationMode, SelectionEngine};
use crate::model::{Candidate, OutcomeVariant, ProbabilityEstimate, Selection, SelectionOutcome};
use crate::providers::{ProbabilityProvider, ProviderError};

use alert::{AlertPayload, AlertSink};
use feed::CandidateFeed;

/// Timer and timeout knobs for the live loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Minutes before kickoff at which a candidate is re-evaluated,
    /// largest first
    pub recompute_offsets_mins: Vec<i64>,
    pub tick_interval: std::time::Duration,
    /// Bound on every upstream await (feed, provider, alert sink)
    pub fetch_timeout: std::time::Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            recompute_offsets_mins: vec![60, 30],
            tick_interval: std::time::Duration::from_secs(60),
            fetch_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// Lifecycle of one (match, variant) pair across recompute cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Upcoming,
    Evaluated,
    Alerted,
    Rejected,
    Settled,
}

type PairKey = (String, OutcomeVariant);

/// Cooperative single-loop scheduler over live candidates.
///
/// One task owns all mutable state (ledger, dedup set, state machine);
/// per-candidate estimate fetches fan out concurrently, but every ledger
/// mutation and dedup update happens serially inside the loop body, so no
/// locks are needed and a cancelled cycle leaves the last fully-committed
/// state behind.
pub struct LiveScheduler {
    engine: SelectionEngine,
    provider: Arc<dyn ProbabilityProvider>,
    feed: Arc<dyn CandidateFeed>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    db: Database,
    ledger: BankrollLedger,
    settings: SchedulerSettings,
    states: HashMap<PairKey, PairState>,
    /// Keys that have been alerted, ever. Consulted before every
    /// dispatch: a pair re-qualifying on a later cycle is suppressed.
    alerted: HashSet<PairKey>,
    /// Selections behind dispatched alerts, kept for settlement
    open_selections: HashMap<PairKey, Selection>,
    /// Recompute offsets already consumed per match id
    offsets_consumed: HashMap<String, usize>,
}

impl LiveScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: SelectionEngine,
        provider: Arc<dyn ProbabilityProvider>,
        feed: Arc<dyn CandidateFeed>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        db: Database,
        ledger: BankrollLedger,
        settings: SchedulerSettings,
    ) -> Result<Self> {
        // Rebuild the dedup set from storage so a restart cannot re-alert
        // pairs dispatched by a previous process.
        let mut alerted = HashSet::new();
        for (match_id, variant) in db.list_alerted_keys()? {
            let variant = variant
                .parse::<OutcomeVariant>()
                .map_err(|_| anyhow!("unknown variant '{}' in alerts table", variant))?;
            alerted.insert((match_id, variant));
        }
        if !alerted.is_empty() {
            info!("Restored {} dispatched alert key(s) from storage", alerted.len());
        }
        Ok(LiveScheduler {
            engine,
            provider,
            feed,
            sink,
            clock,
            db,
            ledger,
            settings,
            states: HashMap::new(),
            alerted,
            open_selections: HashMap::new(),
            offsets_consumed: HashMap::new(),
        })
    }

    pub fn ledger(&self) -> &BankrollLedger {
        &self.ledger
    }

    pub fn pair_state(&self, match_id: &str, variant: OutcomeVariant) -> PairState {
        self.states
            .get(&(match_id.to_string(), variant))
            .copied()
            .unwrap_or(PairState::Upcoming)
    }

    /// Run forever at the configured tick interval. A cycle that overruns
    /// causes the next tick to be skipped, never run concurrently.
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "Live scheduler started (tick={:?}, offsets={:?}min)",
            self.settings.tick_interval, self.settings.recompute_offsets_mins
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.run_cycle().await {
                error!("Recompute cycle failed: {} — retrying next tick", e);
            }
        }
    }

    /// One recompute cycle: fetch candidates, evaluate every due pair,
    /// dispatch alerts for qualifying selections.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let now = self.clock.now();

        // The stop-loss halt is sticky for the rest of the run; a halted
        // ledger takes no further selections. Reported, not an error.
        if self.ledger.is_halted() {
            warn!(
                "Stop-loss halt active ({:.2}% drawdown) — no further selections this run",
                self.ledger.drawdown() * 100.0
            );
            return Ok(());
        }

        let candidates = match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.feed.fetch_upcoming(),
        )
        .await
        {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!("Candidate feed '{}' failed: {} — retrying next tick", self.feed.name(), e);
                return Ok(());
            }
            Err(_) => {
                warn!(
                    "Candidate feed '{}' timed out after {:?} — retrying next tick",
                    self.feed.name(),
                    self.settings.fetch_timeout
                );
                return Ok(());
            }
        };

        // Staleness: anything past cutoff leaves the evaluation set for
        // good; due-ness is a not-yet-consumed recompute offset.
        let mut due = Vec::new();
        for candidate in candidates {
            if now >= candidate.cutoff_time {
                if self.offsets_consumed.remove(&candidate.match_id).is_some() {
                    debug!("{} past cutoff, dropped from evaluation set", candidate.match_id);
                }
                // Pairs that can never be evaluated again are pruned so a
                // long-lived process does not accumulate dead tracking
                // state. Alerted pairs stay until settled; the durable
                // dedup record lives in the alerts table.
                for variant in OutcomeVariant::ALL {
                    let key = (candidate.match_id.clone(), variant);
                    if self.states.get(&key) != Some(&PairState::Alerted) {
                        self.states.remove(&key);
                        self.alerted.remove(&key);
                    }
                }
                continue;
            }
            if self.crossed_offsets(&candidate, now) > self.consumed(&candidate.match_id) {
                due.push(candidate);
            }
        }
        if due.is_empty() {
            return Ok(());
        }
        debug!("{} candidate(s) due for recompute", due.len());

        // Concurrent fan-out of the pure estimate fetches. Nothing below
        // touches shared state until the fan-in completes.
        let fetches = due.iter().map(|candidate| {
            let provider = Arc::clone(&self.provider);
            let timeout = self.settings.fetch_timeout;
            async move {
                let over = fetch_estimate(&*provider, candidate, OutcomeVariant::Over, timeout).await;
                let under =
                    fetch_estimate(&*provider, candidate, OutcomeVariant::Under, timeout).await;
                (over, under)
            }
        });
        let estimates = join_all(fetches).await;

        // Serial phase: state updates, ranking, dispatch.
        let mut passing = Vec::new();
        let mut evaluated: HashMap<String, usize> = HashMap::new();
        for (candidate, (over, under)) in due.iter().zip(estimates) {
            let (over, under) = match (over, under) {
                (Ok(o), Ok(u)) => (o, u),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(
                        "Probability fetch failed for {}: {} — candidate skipped this cycle",
                        candidate.match_id, e
                    );
                    continue;
                }
            };

            let evaluation = self.engine.evaluate_match(
                candidate,
                over,
                under,
                self.ledger.balance(),
                EvaluationMode::Live,
                now,
            );
            for (variant, verdict) in [
                (OutcomeVariant::Over, &evaluation.over),
                (OutcomeVariant::Under, &evaluation.under),
            ] {
                let key = (candidate.match_id.clone(), variant);
                match verdict {
                    Evaluation::Selected(_) => {
                        if !self.alerted.contains(&key) {
                            self.states.insert(key, PairState::Evaluated);
                        }
                    }
                    Evaluation::Rejected(reason) => {
                        debug!("{} ({}) rejected: {:?}", candidate.match_id, variant, reason);
                        if !self.alerted.contains(&key) {
                            self.states.insert(key, PairState::Rejected);
                        }
                    }
                    Evaluation::Fault(fault) => {
                        warn!(
                            "Data-quality fault for {} ({}): {}",
                            candidate.match_id, variant, fault
                        );
                    }
                }
            }
            evaluated.insert(
                candidate.match_id.clone(),
                self.crossed_offsets(candidate, now),
            );
            if let Some(selection) = evaluation.selection {
                passing.push(selection);
            }
        }

        let qualified = self.engine.rank_and_limit(passing);
        for selection in qualified {
            let key = (selection.match_id.clone(), selection.variant);
            if self.alerted.contains(&key) {
                info!(
                    "Duplicate alert suppressed for {} ({}) — already dispatched",
                    selection.match_id, selection.variant
                );
                continue;
            }
            let payload = AlertPayload::from_selection(&selection);
            let dispatch =
                tokio::time::timeout(self.settings.fetch_timeout, self.sink.dispatch(&payload))
                    .await
                    .map_err(|_| anyhow!("alert dispatch timed out"))
                    .and_then(|r| r);
            match dispatch {
                Ok(()) => {
                    info!(
                        "Alert dispatched: {} vs {} — {} ({}), confidence {:.1}%",
                        selection.home_team,
                        selection.away_team,
                        selection.variant,
                        selection.profile,
                        selection.confidence * 100.0
                    );
                    // The dedup key is recorded only after delivery. A
                    // crash between dispatch and this insert re-alerts
                    // the pair once on restart; an undelivered alert is
                    // never recorded as sent.
                    if let Err(e) = self.db.insert_selection(&selection) {
                        warn!("Failed to persist selection {}: {}", selection.match_id, e);
                    }
                    if let Err(e) = self
                        .db
                        .insert_alert(&selection.match_id, &selection.variant.to_string())
                    {
                        warn!("Failed to persist alert {}: {}", selection.match_id, e);
                    }
                    self.alerted.insert(key.clone());
                    self.states.insert(key.clone(), PairState::Alerted);
                    self.open_selections.insert(key, selection);
                }
                Err(e) => {
                    warn!(
                        "Alert dispatch failed for {} ({}): {} — retrying next tick",
                        selection.match_id, selection.variant, e
                    );
                    // Leave the offset unconsumed so the pair is
                    // re-evaluated (and re-dispatched) on the next tick.
                    evaluated.remove(&selection.match_id);
                }
            }
        }

        for (match_id, crossed) in evaluated {
            self.offsets_consumed.insert(match_id, crossed);
        }
        Ok(())
    }

    /// Settle an alerted selection against the external results feed.
    /// The ledger and state machine are only touched here and in
    /// `run_cycle`, both on the scheduler's own task.
    pub fn record_settlement(
        &mut self,
        match_id: &str,
        variant: OutcomeVariant,
        outcome: SelectionOutcome,
    ) -> Result<()> {
        let key = (match_id.to_string(), variant);
        let selection = self
            .open_selections
            .remove(&key)
            .ok_or_else(|| anyhow!("no open selection for {} ({})", match_id, variant))?;
        let pnl = self.ledger.record_settlement(&selection, outcome);
        self.states.insert(key, PairState::Settled);
        self.db
            .insert_settlement(&selection, outcome, pnl, self.clock.now())?;
        self.db.record_balance(self.ledger.balance())?;
        info!(
            "Settled {} ({}) as {:?}: P&L {:+.2}, balance {:.2}",
            match_id,
            variant,
            outcome,
            pnl,
            self.ledger.balance()
        );
        Ok(())
    }

    fn consumed(&self, match_id: &str) -> usize {
        self.offsets_consumed.get(match_id).copied().unwrap_or(0)
    }

    /// Number of recompute offsets whose firing time has passed.
    fn crossed_offsets(&self, candidate: &Candidate, now: DateTime<Utc>) -> usize {
        self.settings
            .recompute_offsets_mins
            .iter()
            .filter(|mins| now >= candidate.start_time - Duration::minutes(**mins))
            .count()
    }
}

/// Fetch one estimate under a bounded timeout. A missing model is a safe
/// reject (`Ok(None)`); infrastructure failures and timeouts are errors
/// the caller isolates per candidate.
async fn fetch_estimate(
    provider: &dyn ProbabilityProvider,
    candidate: &Candidate,
    variant: OutcomeVariant,
    timeout: std::time::Duration,
) -> Result<Option<ProbabilityEstimate>> {
    match tokio::time::timeout(timeout, provider.estimate(candidate, variant)).await {
        Ok(Ok(estimate)) => Ok(Some(estimate)),
        Ok(Err(ProviderError::NoModel { .. })) | Ok(Err(ProviderError::NoEstimate { .. })) => {
            Ok(None)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(anyhow!("probability fetch timed out after {:?}", timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::SelectionCriteria;
    use crate::model::{FeatureSnapshot, MarketOdds, Profile};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap()
    }

    fn live_candidate(match_id: &str, start: DateTime<Utc>) -> Candidate {
        Candidate {
            match_id: match_id.into(),
            home_team: "Home".into(),
            away_team: "Away".into(),
            league: "premier-league".into(),
            profile: Profile::WeekendTopFive,
            start_time: start,
            cutoff_time: start - Duration::minutes(15),
            features: FeatureSnapshot {
                lineup_confirmed: Some(true),
                market_drift_1h: Some(0.01),
            },
            over_odds: MarketOdds {
                opening: 2.0,
                closing: None,
            },
            under_odds: MarketOdds {
                opening: 2.0,
                closing: None,
            },
            goals_total: None,
        }
    }

    struct StaticFeed {
        candidates: Vec<Candidate>,
    }

    #[async_trait]
    impl CandidateFeed for StaticFeed {
        async fn fetch_upcoming(&self) -> Result<Vec<Candidate>> {
            Ok(self.candidates.clone())
        }
        fn name(&self) -> &str {
            "static"
        }
    }

    /// Fixed probabilities per match id; optionally fails for one id.
    struct StaticProvider {
        over: f64,
        failing_match: Option<String>,
    }

    #[async_trait]
    impl ProbabilityProvider for StaticProvider {
        async fn estimate(
            &self,
            candidate: &Candidate,
            variant: OutcomeVariant,
        ) -> Result<ProbabilityEstimate, ProviderError> {
            if self.failing_match.as_deref() == Some(candidate.match_id.as_str()) {
                return Err(ProviderError::Upstream(anyhow!("connection refused")));
            }
            let probability = match variant {
                OutcomeVariant::Over => self.over,
                OutcomeVariant::Under => 0.20,
            };
            Ok(ProbabilityEstimate {
                probability,
                trained_before: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            })
        }
        fn name(&self) -> &str {
            "static"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        dispatched: Mutex<Vec<AlertPayload>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn dispatch(&self, payload: &AlertPayload) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("sink unavailable");
            }
            self.dispatched.lock().unwrap().push(payload.clone());
            Ok(())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    fn scheduler(
        candidates: Vec<Candidate>,
        provider: StaticProvider,
        clock: ManualClock,
    ) -> (LiveScheduler, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = LiveScheduler::new(
            SelectionEngine::new(SelectionCriteria::default()),
            Arc::new(provider),
            Arc::new(StaticFeed { candidates }),
            Arc::clone(&sink) as Arc<dyn AlertSink>,
            Arc::new(clock),
            Database::open_in_memory().unwrap(),
            BankrollLedger::new(10_000.0, 0.10),
            SchedulerSettings::default(),
        )
        .unwrap();
        (scheduler, sink)
    }

    #[tokio::test]
    async fn test_alerted_at_most_once_across_cycles() {
        // Example C: the pair qualifies at both T-60 and T-30; only the
        // first cycle dispatches.
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(90));
        let (mut sched, sink) = scheduler(
            vec![live_candidate("m1", start)],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock.clone(),
        );

        // Before T-60: nothing due
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 0);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Upcoming);

        // T-59: first offset crossed → alert
        clock.advance(Duration::minutes(31));
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Alerted);

        // T-29: second offset crossed, pair re-qualifies → suppressed
        clock.set(start - Duration::minutes(29));
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);

        // Another tick with no new offset → nothing due
        clock.advance(Duration::minutes(5));
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_past_cutoff_excluded_from_evaluation() {
        let start = kickoff();
        // Clock already past the 15-minute cutoff
        let clock = ManualClock::new(start - Duration::minutes(10));
        let (mut sched, sink) = scheduler(
            vec![live_candidate("m1", start)],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock,
        );
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 0);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Upcoming);
    }

    #[tokio::test]
    async fn test_one_failing_candidate_does_not_abort_cycle() {
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(59));
        let (mut sched, sink) = scheduler(
            vec![live_candidate("bad", start), live_candidate("good", start)],
            StaticProvider {
                over: 0.80,
                failing_match: Some("bad".into()),
            },
            clock,
        );
        sched.run_cycle().await.unwrap();
        let dispatched = sink.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].match_id, "good");
    }

    #[tokio::test]
    async fn test_failed_dispatch_retried_next_tick() {
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(59));
        let (mut sched, sink) = scheduler(
            vec![live_candidate("m1", start)],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock.clone(),
        );
        sink.fail_next.store(true, Ordering::SeqCst);
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 0);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Evaluated);

        // Next tick, same offset window: dispatch succeeds, exactly once
        clock.advance(Duration::minutes(1));
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Alerted);
    }

    #[tokio::test]
    async fn test_rejected_pair_recorded_not_alerted() {
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(59));
        // 0.72 with odds 2.0 → edge 0.22 passes, but bump drift to fail
        let mut candidate = live_candidate("m1", start);
        candidate.features.market_drift_1h = Some(0.2);
        let (mut sched, sink) = scheduler(
            vec![candidate],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock,
        );
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 0);
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Rejected);
    }

    #[tokio::test]
    async fn test_halted_ledger_suppresses_further_alerts() {
        // A losing settlement trips the 1% stop-loss; the pair coming due
        // on a later cycle must not be evaluated or alerted.
        let start = kickoff();
        let later = start + Duration::hours(3);
        let clock = ManualClock::new(start - Duration::minutes(59));
        let sink = Arc::new(RecordingSink::default());
        let mut sched = LiveScheduler::new(
            SelectionEngine::new(SelectionCriteria::default()),
            Arc::new(StaticProvider {
                over: 0.80,
                failing_match: None,
            }),
            Arc::new(StaticFeed {
                candidates: vec![live_candidate("m1", start), live_candidate("m2", later)],
            }),
            Arc::clone(&sink) as Arc<dyn AlertSink>,
            Arc::new(clock.clone()),
            Database::open_in_memory().unwrap(),
            BankrollLedger::new(10_000.0, 0.01),
            SchedulerSettings::default(),
        )
        .unwrap();

        // Only m1 is due this early
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);

        // 200 stake lost on 10_000 → 2% drawdown, past the 1% stop loss
        sched
            .record_settlement("m1", OutcomeVariant::Over, SelectionOutcome::Loss)
            .unwrap();
        assert!(sched.ledger().is_halted());

        // m2 comes due, but the halted ledger suppresses the cycle
        clock.set(later - Duration::minutes(59));
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);
        assert_eq!(sched.pair_state("m2", OutcomeVariant::Over), PairState::Upcoming);
    }

    #[tokio::test]
    async fn test_stale_rejected_pair_is_pruned() {
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(59));
        let mut candidate = live_candidate("m1", start);
        candidate.features.market_drift_1h = Some(0.2);
        let (mut sched, _sink) = scheduler(
            vec![candidate],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock.clone(),
        );
        sched.run_cycle().await.unwrap();
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Rejected);

        // Past cutoff the pair can never re-qualify; its tracking state
        // is dropped
        clock.set(start - Duration::minutes(10));
        sched.run_cycle().await.unwrap();
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Upcoming);
    }

    #[tokio::test]
    async fn test_settlement_updates_ledger_and_state() {
        let start = kickoff();
        let clock = ManualClock::new(start - Duration::minutes(59));
        let (mut sched, sink) = scheduler(
            vec![live_candidate("m1", start)],
            StaticProvider {
                over: 0.80,
                failing_match: None,
            },
            clock,
        );
        sched.run_cycle().await.unwrap();
        assert_eq!(sink.dispatched.lock().unwrap().len(), 1);

        let stake = sink.dispatched.lock().unwrap()[0].stake_amount;
        sched
            .record_settlement("m1", OutcomeVariant::Over, SelectionOutcome::Win)
            .unwrap();
        assert_eq!(sched.pair_state("m1", OutcomeVariant::Over), PairState::Settled);
        let expected = 10_000.0 + stake * (2.0 - 1.0);
        assert!((sched.ledger().balance() - expected).abs() < 1e-9);

        // Settling twice is an error, not a double credit
        assert!(sched
            .record_settlement("m1", OutcomeVariant::Over, SelectionOutcome::Win)
            .is_err());
    }
}
