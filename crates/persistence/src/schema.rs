//! Database schema definitions

/// SQL to create all tables
/// NOTE: OHLC and volume columns are nullable; the engine decides what a usable bar set is
pub const CREATE_TABLES: &str = r#"
-- Backtest runs
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    label TEXT,
    created_at INTEGER NOT NULL
);

-- Equity curve of a run (the anchor series)
CREATE TABLE IF NOT EXISTS equity_points (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (run_id, timestamp)
);

-- Precomputed indicator series stored alongside a run
CREATE TABLE IF NOT EXISTS indicator_points (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL,
    PRIMARY KEY (run_id, name, timestamp)
);

-- Instrument-scoped price bars
CREATE TABLE IF NOT EXISTS price_bars (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    instrument TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL,
    volume REAL,
    PRIMARY KEY (run_id, instrument, timestamp)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_indicator_run_name ON indicator_points(run_id, name);
CREATE INDEX IF NOT EXISTS idx_price_run_instrument ON price_bars(run_id, instrument)
"#;

/// Additive migrations, tolerated when the column already exists
pub const MIGRATIONS: &[&str] = &["ALTER TABLE runs ADD COLUMN notes TEXT"];
