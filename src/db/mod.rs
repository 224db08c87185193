use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::model::{Profile, Selection, SelectionOutcome};

/// Thread-safe SQLite connection (single connection with mutex).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent).
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Bankroll ─────────────────────────────────────────────────────────────

    /// Latest recorded balance, or 0.0 when none has been recorded yet.
    pub fn get_balance(&self) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let balance: f64 = conn
            .query_row(
                "SELECT balance FROM bankroll_history ORDER BY recorded_at DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0.0);
        Ok(balance)
    }

    /// Record a bankroll snapshot.
    pub fn record_balance(&self, balance: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bankroll_history (balance, recorded_at) VALUES (?1, ?2)",
            params![balance, Utc::now()],
        )?;
        Ok(())
    }

    // ── Selections ───────────────────────────────────────────────────────────

    /// Insert an emitted selection.
    pub fn insert_selection(&self, sel: &Selection) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO selections (
                match_id, home_team, away_team, league, profile, variant,
                confidence, edge, clv, odds, stake_fraction, stake_amount,
                created_at, cutoff_time
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                sel.match_id,
                sel.home_team,
                sel.away_team,
                sel.league,
                sel.profile.to_string(),
                sel.variant.to_string(),
                sel.confidence,
                sel.edge,
                sel.clv,
                sel.odds,
                sel.stake_fraction,
                sel.stake_amount,
                sel.created_at,
                sel.cutoff_time,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Count selections stored for a profile (reporting/audit).
    pub fn count_selections(&self, profile: Profile) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM selections WHERE profile = ?1",
            params![profile.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Alerts ───────────────────────────────────────────────────────────────

    /// Record a successfully dispatched alert.
    pub fn insert_alert(&self, match_id: &str, variant: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (match_id, variant, dispatched_at) VALUES (?1, ?2, ?3)",
            params![match_id, variant, Utc::now()],
        )?;
        Ok(())
    }

    /// Alert keys already dispatched, used to rebuild the dedup set after
    /// a restart.
    pub fn list_alerted_keys(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT match_id, variant FROM alerts")?;
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    // ── Settlements ──────────────────────────────────────────────────────────

    /// Record a settlement and its P&L.
    pub fn insert_settlement(
        &self,
        sel: &Selection,
        outcome: SelectionOutcome,
        pnl: f64,
        settled_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let outcome = match outcome {
            SelectionOutcome::Win => "win",
            SelectionOutcome::Loss => "loss",
        };
        conn.execute(
            "INSERT INTO settlements (match_id, variant, outcome, pnl, settled_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![sel.match_id, sel.variant.to_string(), outcome, pnl, settled_at],
        )?;
        Ok(())
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS).
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bankroll_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    balance     REAL    NOT NULL,
    recorded_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS selections (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id       TEXT    NOT NULL,
    home_team      TEXT    NOT NULL,
    away_team      TEXT    NOT NULL,
    league         TEXT    NOT NULL,
    profile        TEXT    NOT NULL,
    variant        TEXT    NOT NULL,
    confidence     REAL    NOT NULL,
    edge           REAL    NOT NULL,
    clv            REAL,
    odds           REAL    NOT NULL,
    stake_fraction REAL    NOT NULL,
    stake_amount   REAL    NOT NULL,
    created_at     TEXT    NOT NULL,
    cutoff_time    TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id      TEXT    NOT NULL,
    variant       TEXT    NOT NULL,
    dispatched_at TEXT    NOT NULL,
    UNIQUE (match_id, variant)
);

CREATE TABLE IF NOT EXISTS settlements (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id   TEXT    NOT NULL,
    variant    TEXT    NOT NULL,
    outcome    TEXT    NOT NULL,
    pnl        REAL    NOT NULL,
    settled_at TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_selections_match ON selections(match_id);
CREATE INDEX IF NOT EXISTS idx_settlements_match ON settlements(match_id);
"#;
