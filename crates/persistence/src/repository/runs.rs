//! Run repository: equity curves, precomputed indicators and price bars per run

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A backtest run header
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub run_id: String,
    pub label: Option<String>,
    pub created_at: i64,
    pub notes: Option<String>,
}

/// One point of a run's equity curve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, FromRow)]
pub struct EquityPointRecord {
    pub timestamp: i64,
    pub value: f64,
}

/// One point of a precomputed indicator series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, FromRow)]
pub struct IndicatorPointRecord {
    pub timestamp: i64,
    pub value: Option<f64>,
}

/// A stored price bar; any column may be missing on ingest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, FromRow)]
pub struct PriceBarRecord {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Repository for run data
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or relabel a run
    pub async fn save_run(&self, run_id: &str, label: Option<&str>) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO runs (run_id, label, created_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(run_id) DO UPDATE SET label = excluded.label
            "#,
        )
        .bind(run_id)
        .bind(label)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> DbResult<Option<RunRecord>> {
        let record = sqlx::query_as::<_, RunRecord>(
            "SELECT run_id, label, created_at, notes FROM runs WHERE run_id = ?1",
        )
        .bind(run_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// All runs, newest first
    pub async fn list_runs(&self) -> DbResult<Vec<RunRecord>> {
        let records = sqlx::query_as::<_, RunRecord>(
            "SELECT run_id, label, created_at, notes FROM runs ORDER BY created_at DESC, run_id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Replace the equity curve of a run
    pub async fn save_equity(&self, run_id: &str, points: &[EquityPointRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM equity_points WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        for point in points {
            sqlx::query(
                "INSERT OR REPLACE INTO equity_points (run_id, timestamp, value) VALUES (?1, ?2, ?3)",
            )
            .bind(run_id)
            .bind(point.timestamp)
            .bind(point.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(points.len())
    }

    /// Equity curve ordered by timestamp
    pub async fn load_equity(&self, run_id: &str) -> DbResult<Vec<EquityPointRecord>> {
        let points = sqlx::query_as::<_, EquityPointRecord>(
            "SELECT timestamp, value FROM equity_points WHERE run_id = ?1 ORDER BY timestamp",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(points)
    }

    /// Replace one precomputed indicator series
    pub async fn save_indicator(
        &self,
        run_id: &str,
        name: &str,
        points: &[IndicatorPointRecord],
    ) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM indicator_points WHERE run_id = ?1 AND name = ?2")
            .bind(run_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        for point in points {
            sqlx::query(
                r#"INSERT OR REPLACE INTO indicator_points (run_id, name, timestamp, value)
                   VALUES (?1, ?2, ?3, ?4)"#,
            )
            .bind(run_id)
            .bind(name)
            .bind(point.timestamp)
            .bind(point.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(points.len())
    }

    /// Names of the precomputed indicator series stored for a run
    pub async fn list_indicators(&self, run_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT name FROM indicator_points WHERE run_id = ?1 ORDER BY name",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn load_indicator(
        &self,
        run_id: &str,
        name: &str,
    ) -> DbResult<Vec<IndicatorPointRecord>> {
        let points = sqlx::query_as::<_, IndicatorPointRecord>(
            r#"SELECT timestamp, value FROM indicator_points
               WHERE run_id = ?1 AND name = ?2 ORDER BY timestamp"#,
        )
        .bind(run_id)
        .bind(name)
        .fetch_all(self.pool)
        .await?;
        Ok(points)
    }

    /// Replace the bars of one instrument
    pub async fn save_price_bars(
        &self,
        run_id: &str,
        instrument: &str,
        bars: &[PriceBarRecord],
    ) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM price_bars WHERE run_id = ?1 AND instrument = ?2")
            .bind(run_id)
            .bind(instrument)
            .execute(&mut *tx)
            .await?;
        for bar in bars {
            sqlx::query(
                r#"INSERT OR REPLACE INTO price_bars
                    (run_id, instrument, timestamp, open, high, low, close, volume)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            )
            .bind(run_id)
            .bind(instrument)
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(bars.len())
    }

    /// Instruments with stored bars, in name order
    pub async fn list_instruments(&self, run_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT instrument FROM price_bars WHERE run_id = ?1 ORDER BY instrument",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(i,)| i).collect())
    }

    pub async fn load_price_bars(
        &self,
        run_id: &str,
        instrument: &str,
    ) -> DbResult<Vec<PriceBarRecord>> {
        let bars = sqlx::query_as::<_, PriceBarRecord>(
            r#"SELECT timestamp, open, high, low, close, volume FROM price_bars
               WHERE run_id = ?1 AND instrument = ?2 ORDER BY timestamp"#,
        )
        .bind(run_id)
        .bind(instrument)
        .fetch_all(self.pool)
        .await?;
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_equity_roundtrip_is_ordered() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());
        repo.save_run("run-1", Some("first")).await.unwrap();

        let points = vec![
            EquityPointRecord { timestamp: 2_000, value: 101.0 },
            EquityPointRecord { timestamp: 1_000, value: 100.0 },
        ];
        repo.save_equity("run-1", &points).await.unwrap();

        let loaded = repo.load_equity("run-1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].timestamp, 1_000);
        assert_eq!(loaded[1].value, 101.0);
    }

    #[tokio::test]
    async fn test_missing_columns_survive_storage() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());
        repo.save_run("run-2", None).await.unwrap();

        let bars = vec![PriceBarRecord {
            timestamp: 0,
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close: Some(1.5),
            volume: None,
        }];
        repo.save_price_bars("run-2", "BTCUSDT", &bars).await.unwrap();

        let loaded = repo.load_price_bars("run-2", "BTCUSDT").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].volume.is_none());
        assert_eq!(repo.list_instruments("run-2").await.unwrap(), vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_indicator_names_listed_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());
        repo.save_run("run-3", None).await.unwrap();

        let points = vec![
            IndicatorPointRecord { timestamp: 0, value: Some(1.0) },
            IndicatorPointRecord { timestamp: 1, value: None },
        ];
        repo.save_indicator("run-3", "signal_strength", &points).await.unwrap();
        repo.save_indicator("run-3", "atr_custom", &points).await.unwrap();

        let names = repo.list_indicators("run-3").await.unwrap();
        assert_eq!(names, vec!["atr_custom", "signal_strength"]);
        assert!(repo.get_run("run-3").await.unwrap().is_some());
        assert!(repo.get_run("nope").await.unwrap().is_none());
    }
}
