/// Kelly Criterion stake sizing for decimal-odds bets.
///
/// The Kelly formula sizes a bet to maximise the expected logarithm of
/// wealth, which balances risk and reward optimally over the long run.
///
/// Standard formula:
///   f* = (b·p − q) / b
/// where
///   b  = net odds received on the bet, i.e. decimal odds − 1
///   p  = estimated probability of winning
///   q  = 1 − p  (probability of losing)
///
/// We apply a *fractional* Kelly multiplier (0 < multiplier ≤ 1) to reduce
/// variance at the cost of slightly lower expected growth, then clamp to a
/// hard per-selection cap.

/// Calculate the clamped fractional-Kelly stake fraction.
///
/// # Arguments
/// * `win_prob`   – Estimated probability that the bet wins (0.0–1.0).
/// * `odds`       – Decimal odds offered by the market (> 1.0).
/// * `kelly_fraction` – Fractional Kelly multiplier (0.0–1.0).
/// * `max_fraction`   – Hard cap on the fraction of bankroll staked.
///
/// # Returns
/// The fraction of bankroll to stake, in `[0, max_fraction]`. Returns
/// `0.0` when expected value is non-positive (no edge) or odds are
/// unusable.
pub fn kelly_stake(win_prob: f64, odds: f64, kelly_fraction: f64, max_fraction: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&win_prob), "win_prob out of range");
    debug_assert!(
        (0.0..=1.0).contains(&kelly_fraction),
        "kelly_fraction out of range"
    );

    if odds <= 1.0 {
        return 0.0;
    }

    let b = odds - 1.0;
    let p = win_prob;
    let q = 1.0 - p;

    let f = (b * p - q) / b;

    if f <= 0.0 {
        return 0.0; // no edge
    }

    (f * kelly_fraction).clamp(0.0, max_fraction)
}

/// Edge of a bet against the opening line.
///
/// Edge = win_prob − 1/odds (model probability minus implied probability).
/// Positive edge means the market is underpricing the outcome.
pub fn edge(win_prob: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }
    win_prob - 1.0 / odds
}
