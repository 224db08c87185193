use tracing::warn;

use crate::model::{Selection, SelectionOutcome};

/// Single-owner bankroll state: balance, balance history, drawdown and a
/// sticky stop-loss halt.
///
/// There is exactly one ledger per run, threaded explicitly through the
/// backtest runner / live scheduler. Settlement requires `&mut self`, so
/// concurrent mutation is ruled out at compile time.
#[derive(Debug, Clone)]
pub struct BankrollLedger {
    balance: f64,
    history: Vec<f64>,
    peak: f64,
    max_drawdown: f64,
    stop_loss_percentage: f64,
    halted: bool,
}

impl BankrollLedger {
    pub fn new(initial_balance: f64, stop_loss_percentage: f64) -> Self {
        BankrollLedger {
            balance: initial_balance,
            history: vec![initial_balance],
            peak: initial_balance,
            max_drawdown: 0.0,
            stop_loss_percentage,
            halted: false,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.history[0]
    }

    /// Balance after every settlement, starting with the initial balance.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Current drawdown from the peak, in [0, 1].
    pub fn drawdown(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        ((self.peak - self.balance) / self.peak).clamp(0.0, 1.0)
    }

    /// Worst drawdown seen over the life of the ledger, in [0, 1].
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Whether the stop-loss halt has fired. Sticky until `reset_halt`.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Clear the halt flag at a fresh window boundary. The stop-loss
    /// suppresses further selections only within the window it fired in.
    pub fn reset_halt(&mut self) {
        self.halted = false;
    }

    /// Apply a settled selection to the bankroll: credit the win profit or
    /// debit the stake, append to history, recompute peak/drawdown and
    /// trip the stop-loss halt when the drawdown threshold is exceeded.
    pub fn record_settlement(&mut self, selection: &Selection, outcome: SelectionOutcome) -> f64 {
        let pnl = outcome.pnl(selection);
        self.balance += pnl;
        self.history.push(self.balance);

        if self.balance > self.peak {
            self.peak = self.balance;
        }
        let drawdown = self.drawdown();
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        if !self.halted && drawdown > self.stop_loss_percentage {
            warn!(
                "Stop loss triggered: {:.2}% drawdown — halting further selections this window",
                drawdown * 100.0
            );
            self.halted = true;
        }
        pnl
    }
}
