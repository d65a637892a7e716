//! Read access to per-run data
//!
//! [`RunStore`] is the seam between the engine and storage. [`SqliteRunStore`]
//! reads the persistence crate's tables; [`MemoryRunStore`] backs tests and demos.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use persistence::repository::{
    EquityPointRecord, IndicatorPointRecord, PriceBarRecord, RunRepository,
};
use persistence::SqlitePool;

use crate::error::EngineResult;
use crate::types::{EquityPoint, RawBar, RunId};

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Equity curve; empty when the run has none
    async fn equity(&self, run: &RunId) -> EngineResult<Vec<EquityPoint>>;

    /// Names of stored precomputed indicator series
    async fn precomputed_names(&self, run: &RunId) -> EngineResult<Vec<String>>;

    async fn precomputed(&self, run: &RunId, name: &str) -> EngineResult<Vec<(i64, Option<f64>)>>;

    /// Instruments with stored price bars, in preference order
    async fn instruments(&self, run: &RunId) -> EngineResult<Vec<String>>;

    async fn price_bars(&self, run: &RunId, instrument: &str) -> EngineResult<Vec<RawBar>>;
}

impl From<PriceBarRecord> for RawBar {
    fn from(r: PriceBarRecord) -> Self {
        RawBar {
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

impl From<RawBar> for PriceBarRecord {
    fn from(b: RawBar) -> Self {
        PriceBarRecord {
            timestamp: b.timestamp,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        }
    }
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> RunRepository<'_> {
        RunRepository::new(&self.pool)
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn equity(&self, run: &RunId) -> EngineResult<Vec<EquityPoint>> {
        let records = self.repo().load_equity(run.as_str()).await?;
        Ok(records
            .into_iter()
            .map(|r| EquityPoint {
                timestamp: r.timestamp,
                value: r.value,
            })
            .collect())
    }

    async fn precomputed_names(&self, run: &RunId) -> EngineResult<Vec<String>> {
        Ok(self.repo().list_indicators(run.as_str()).await?)
    }

    async fn precomputed(&self, run: &RunId, name: &str) -> EngineResult<Vec<(i64, Option<f64>)>> {
        let points = self.repo().load_indicator(run.as_str(), name).await?;
        Ok(points.into_iter().map(|p| (p.timestamp, p.value)).collect())
    }

    async fn instruments(&self, run: &RunId) -> EngineResult<Vec<String>> {
        Ok(self.repo().list_instruments(run.as_str()).await?)
    }

    async fn price_bars(&self, run: &RunId, instrument: &str) -> EngineResult<Vec<RawBar>> {
        let bars = self.repo().load_price_bars(run.as_str(), instrument).await?;
        Ok(bars.into_iter().map(RawBar::from).collect())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryRun {
    equity: Vec<EquityPoint>,
    indicators: BTreeMap<String, Vec<(i64, Option<f64>)>>,
    bars: BTreeMap<String, Vec<RawBar>>,
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<BTreeMap<String, MemoryRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(&self, run: &str, f: impl FnOnce(&mut MemoryRun) -> T) -> T {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        f(runs.entry(run.to_string()).or_default())
    }

    fn read_run<T>(&self, run: &RunId, f: impl FnOnce(&MemoryRun) -> T) -> Option<T> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.get(run.as_str()).map(f)
    }

    pub fn insert_equity(&self, run: &str, points: Vec<EquityPoint>) {
        self.with_run(run, |r| r.equity = points);
    }

    pub fn insert_indicator(&self, run: &str, name: &str, points: Vec<(i64, Option<f64>)>) {
        self.with_run(run, |r| {
            r.indicators.insert(name.to_string(), points);
        });
    }

    pub fn insert_bars(&self, run: &str, instrument: &str, bars: Vec<RawBar>) {
        self.with_run(run, |r| {
            r.bars.insert(instrument.to_string(), bars);
        });
    }

    pub fn run_ids(&self) -> Vec<String> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.keys().cloned().collect()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn equity(&self, run: &RunId) -> EngineResult<Vec<EquityPoint>> {
        let mut points = self.read_run(run, |r| r.equity.clone()).unwrap_or_default();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn precomputed_names(&self, run: &RunId) -> EngineResult<Vec<String>> {
        Ok(self
            .read_run(run, |r| r.indicators.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn precomputed(&self, run: &RunId, name: &str) -> EngineResult<Vec<(i64, Option<f64>)>> {
        Ok(self
            .read_run(run, |r| r.indicators.get(name).cloned().unwrap_or_default())
            .unwrap_or_default())
    }

    async fn instruments(&self, run: &RunId) -> EngineResult<Vec<String>> {
        Ok(self
            .read_run(run, |r| r.bars.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn price_bars(&self, run: &RunId, instrument: &str) -> EngineResult<Vec<RawBar>> {
        Ok(self
            .read_run(run, |r| r.bars.get(instrument).cloned().unwrap_or_default())
            .unwrap_or_default())
    }
}

/// Write a run into SQLite; used by the demo seeder and tests
pub async fn save_run(
    pool: &SqlitePool,
    run: &RunId,
    label: Option<&str>,
    equity: &[EquityPoint],
    indicators: &BTreeMap<String, Vec<(i64, Option<f64>)>>,
    bars: &BTreeMap<String, Vec<RawBar>>,
) -> EngineResult<()> {
    let repo = RunRepository::new(pool);
    repo.save_run(run.as_str(), label).await?;

    let equity: Vec<EquityPointRecord> = equity
        .iter()
        .map(|p| EquityPointRecord {
            timestamp: p.timestamp,
            value: p.value,
        })
        .collect();
    repo.save_equity(run.as_str(), &equity).await?;

    for (name, points) in indicators {
        let points: Vec<IndicatorPointRecord> = points
            .iter()
            .map(|(timestamp, value)| IndicatorPointRecord {
                timestamp: *timestamp,
                value: *value,
            })
            .collect();
        repo.save_indicator(run.as_str(), name, &points).await?;
    }

    for (instrument, rows) in bars {
        let rows: Vec<PriceBarRecord> = rows.iter().copied().map(PriceBarRecord::from).collect();
        repo.save_price_bars(run.as_str(), instrument, &rows).await?;
    }

    Ok(())
}
