//! End-to-end tests: stored run -> session -> regime analysis

use std::collections::BTreeMap;

use engine::store::save_run;
use engine::{
    AnalysisContext, AnalysisError, AnalysisSession, Bucketing, EngineConfig, EquityPoint,
    Horizon, IndicatorCategory, MemoryRunStore, PriceOrigin, RawBar, ReturnColumn, RunId,
    SourcePolicy, SqliteRunStore,
};
use persistence::Database;

const HOUR_MS: i64 = 3_600_000;

/// Equity rising linearly from 100 to 200
fn linear_equity(n: usize) -> Vec<EquityPoint> {
    (0..n)
        .map(|i| EquityPoint {
            timestamp: 1_700_000_000_000 + i as i64 * HOUR_MS,
            value: 100.0 + 100.0 * i as f64 / (n - 1) as f64,
        })
        .collect()
}

/// Equity with some down moves so win rates are not trivially 1.0
fn wavy_equity(n: usize) -> Vec<EquityPoint> {
    (0..n)
        .map(|i| EquityPoint {
            timestamp: 1_700_000_000_000 + i as i64 * HOUR_MS,
            value: 1_000.0 + 25.0 * (i as f64 * 0.3).sin() + i as f64,
        })
        .collect()
}

fn bars_without_volume(equity: &[EquityPoint]) -> Vec<RawBar> {
    equity
        .iter()
        .map(|p| RawBar {
            timestamp: p.timestamp,
            open: Some(p.value * 0.999),
            high: Some(p.value * 1.004),
            low: Some(p.value * 0.995),
            close: Some(p.value),
            volume: None,
        })
        .collect()
}

async fn open(store: &MemoryRunStore, run: &str, context: AnalysisContext) -> AnalysisSession {
    let config = EngineConfig::default();
    let policy = SourcePolicy::synthetic_only(config.synthetic_seed);
    AnalysisSession::open(store, &policy, &config, run, context)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_custom_forward_horizon_leaves_trailing_nulls() {
    let store = MemoryRunStore::new();
    let equity = linear_equity(100);
    store.insert_equity("linear", equity.clone());
    store.insert_indicator(
        "linear",
        "signal",
        equity.iter().enumerate().map(|(i, p)| (p.timestamp, Some((i % 7) as f64))).collect(),
    );

    let mut session = open(&store, "linear", AnalysisContext::Neutral).await;
    let column = ReturnColumn::ForwardCustom { horizon: Horizon::periods(3) };
    let result = session.analyze("signal", 4, &column).unwrap().into_ready().unwrap();
    assert_eq!(result.return_column, "forward_return_custom_3");
    // row 0 has no equity_return; rows 95.. have no forward_return_5
    assert_eq!(result.total_observations, 94);
    assert_eq!(result.total_observations, session.complete_rows().len());

    let table = session.merged_table();
    let custom = table.column("forward_return_custom_3").unwrap();
    assert_eq!(custom.len(), 100);
    assert!(custom[97..].iter().all(Option::is_none));
    assert!(custom[..97].iter().all(Option::is_some));

    let expected = (equity[3].value - equity[0].value) / equity[0].value;
    assert!((custom[0].unwrap() - expected).abs() < 1e-12);
}

#[tokio::test]
async fn test_constant_feature_falls_back_to_quantile_bins() {
    let store = MemoryRunStore::new();
    let equity = wavy_equity(80);
    store.insert_equity("flat", equity.clone());
    store.insert_indicator(
        "flat",
        "constant",
        equity.iter().map(|p| (p.timestamp, Some(1.0))).collect(),
    );

    let mut session = open(&store, "flat", AnalysisContext::Neutral).await;
    let result = session
        .analyze("constant", 5, &ReturnColumn::ForwardReturn1)
        .unwrap()
        .into_ready()
        .unwrap();

    assert_eq!(result.bucketing, Bucketing::Quantile);
    assert_eq!(result.bin_ranges.len(), 5);
    assert_eq!(result.bin_statistics.len(), 5);
    assert_eq!(result.effective_bins, 1);
    assert!(!result.bin_ranges[0].collapsed);
    assert!(result.bin_ranges[1..].iter().all(|b| b.collapsed));
    assert_eq!(result.bin_statistics[0].count, 74);
    assert!(result.bin_statistics[1..].iter().all(|b| b.count == 0 && b.return_mean.is_none()));
}

#[tokio::test]
async fn test_synthetic_context_is_deterministic() {
    let store = MemoryRunStore::new();
    store.insert_equity("crypto", wavy_equity(120));

    let mut first = open(&store, "crypto", AnalysisContext::Crypto).await;
    let mut second = open(&store, "crypto", AnalysisContext::Crypto).await;

    let loaded = first.indicator_set().get("fear_greed").unwrap();
    assert_eq!(loaded.category, IndicatorCategory::External);
    assert!(loaded.series.origin.is_synthetic());
    assert!(first.indicator_set().contains("btc_dominance"));
    assert!(!first.indicator_set().contains("vix"));

    assert!(matches!(first.price_origin(), Some(PriceOrigin::Synthetic { .. })));
    assert!(first.warnings().iter().any(|w| w.subject == "price_series"));

    let a = first.analyze("fear_greed", 6, &ReturnColumn::ForwardReturn5).unwrap();
    let b = second.analyze("fear_greed", 6, &ReturnColumn::ForwardReturn5).unwrap();
    assert_eq!(a, b);
    assert_eq!(first.catalog(), second.catalog());
}

#[tokio::test]
async fn test_unknown_feature_rejected() {
    let store = MemoryRunStore::new();
    store.insert_equity("r1", wavy_equity(30));
    let mut session = open(&store, "r1", AnalysisContext::Neutral).await;

    let err = session
        .analyze("unknown_feature", 10, &ReturnColumn::EquityReturn)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Validation(_)));
    assert!(!err.is_session_fatal());
}

#[tokio::test]
async fn test_analysis_invariants_hold_across_features() {
    let store = MemoryRunStore::new();
    let equity = wavy_equity(150);
    store.insert_equity("props", equity.clone());
    store.insert_bars("props", "SPY", bars_without_volume(&equity));

    let mut session = open(&store, "props", AnalysisContext::Index).await;
    assert_eq!(session.merged_table().len(), equity.len());

    let features: Vec<String> = ["rsi", "macd", "candle_body", "vix", "treasury_10y"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for feature in &features {
        let result = session
            .analyze(feature, 8, &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        let counted: usize = result.bin_statistics.iter().map(|b| b.count).sum();
        assert_eq!(counted, result.total_observations, "feature {feature}");
        assert_eq!(result.raw_merged_subset.len(), result.total_observations);

        let repeat = session
            .analyze(feature, 8, &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(result, repeat);

        let summary = session
            .summarize(feature, &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        let quartiles: usize = summary.quartile_performance.iter().map(|q| q.count).sum();
        assert_eq!(quartiles, summary.total_observations);
        assert_eq!(summary.total_observations, result.total_observations);
    }

    assert!(matches!(
        session.price_origin(),
        Some(PriceOrigin::Stored { volume_synthesized: true, .. })
    ));
    assert!(session.warnings().iter().any(|w| w.subject == "volume"));
}

#[tokio::test]
async fn test_return_columns_share_the_final_null_drop() {
    let store = MemoryRunStore::new();
    let equity = wavy_equity(72);
    store.insert_equity("mixed", equity.clone());
    store.insert_bars("mixed", "SPY", bars_without_volume(&equity));

    let mut session = open(&store, "mixed", AnalysisContext::Index).await;
    let complete = session.complete_rows().len();
    assert!(complete < equity.len());

    let columns = [
        ReturnColumn::EquityReturn,
        ReturnColumn::CumulativeReturn,
        ReturnColumn::ForwardReturn1,
        ReturnColumn::ForwardReturn5,
    ];
    for column in &columns {
        let result = session.analyze("rsi", 5, column).unwrap().into_ready().unwrap();
        assert_eq!(result.total_observations, complete, "{}", result.return_column);
        let summary = session.summarize("rsi", column).unwrap().into_ready().unwrap();
        assert_eq!(summary.total_observations, complete);
    }

    // hourly bars, so 8h is eight rows past the five dropped by forward_return_5
    let custom = ReturnColumn::ForwardCustom { horizon: "8h".parse().unwrap() };
    let result = session.analyze("rsi", 5, &custom).unwrap().into_ready().unwrap();
    assert_eq!(result.return_column, "forward_return_custom_8");
    assert_eq!(result.total_observations, complete - 3);
    assert_eq!(result.total_observations, session.complete_rows().len());
    let counted: usize = result.bin_statistics.iter().map(|b| b.count).sum();
    assert_eq!(counted, result.total_observations);
}

#[tokio::test]
async fn test_sqlite_backed_session() {
    let db = Database::in_memory().await.unwrap();
    let run = RunId::parse("bt-2024.01").unwrap();
    let equity = wavy_equity(60);

    let mut indicators = BTreeMap::new();
    indicators.insert(
        "position_size".to_string(),
        equity
            .iter()
            .enumerate()
            .map(|(i, p)| (p.timestamp, (i % 4 != 0).then_some(i as f64)))
            .collect(),
    );
    let mut bars = BTreeMap::new();
    bars.insert("BTCUSD".to_string(), bars_without_volume(&equity));

    save_run(db.pool(), &run, Some("demo"), &equity, &indicators, &bars)
        .await
        .unwrap();

    let store = SqliteRunStore::new(db.pool_clone());
    let config = EngineConfig::default();
    let policy = SourcePolicy::synthetic_only(7);
    let mut session =
        AnalysisSession::open(&store, &policy, &config, run.as_str(), AnalysisContext::Crypto)
            .await
            .unwrap();

    assert_eq!(session.equity().len(), 60);
    let names = session.feature_names();
    assert!(names.contains(&"position_size"));
    assert!(names.contains(&"atr"));
    assert!(names.contains(&"fear_greed"));

    let continuous = session
        .continuous("position_size", &ReturnColumn::EquityReturn)
        .unwrap()
        .into_ready()
        .unwrap();
    assert!(continuous.total_observations > 0);
    assert!(continuous.correlation.is_some());
}
