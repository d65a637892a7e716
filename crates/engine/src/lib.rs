//! Regime Lens engine: post-backtest regime analysis
//!
//! Provides:
//! - Technical, price-action and external-context indicators behind one trait
//! - Live or deterministic synthetic context data with fallback warnings
//! - Nearest-timestamp merge of indicators onto a run's equity curve
//! - Binned, continuous and quartile analysis of returns by indicator value

pub mod api;
pub mod config;
pub mod data_source;
pub mod error;
pub mod indicators;
pub mod manager;
pub mod merge;
pub mod regime;
pub mod returns;
pub mod session;
pub mod stats;
pub mod store;
pub mod synthetic;
pub mod types;

// Re-exports for convenience
pub use api::MarketContextClient;
pub use config::{EngineConfig, LiveFetchConfig};
pub use data_source::{
    DataSource, DeterministicSynthetic, LiveFetch, MarketSignal, SeriesRequest, SourcePolicy,
    SourceStrategy,
};
pub use error::{AnalysisError, EngineResult};
pub use indicators::{
    build_indicator, Indicator, IndicatorCategory, IndicatorKind, IndicatorParams,
};
pub use manager::{CatalogEntry, IndicatorManager, IndicatorSet, LoadedIndicator, PriceOrigin};
pub use merge::{merge, nearest_join, MergedRow, MergedTable};
pub use regime::{
    AnalysisResult, BinRange, BinStatistics, Bucketing, ContinuousResult, PerformanceSummary,
    QuartileBucket, RegimeInput, RegimeOutcome, MAX_BINS,
};
pub use returns::{Horizon, HorizonUnit, ReturnCache, ReturnColumn};
pub use session::AnalysisSession;
pub use store::{MemoryRunStore, RunStore, SqliteRunStore};
pub use types::*;
