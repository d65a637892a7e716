//! Engine configuration

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunables for session assembly and fallback generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base seed for every synthetic series; the same seed reproduces the same data
    pub synthetic_seed: u64,
    /// Bar spacing for synthetic prices when the equity curve has no usable spacing
    pub synthetic_interval_ms: i64,
    /// Bar count for synthetic prices in the same case
    pub synthetic_bars: usize,
    /// Upper bound on synthesized bars covering an equity span
    pub max_synthetic_bars: usize,
    pub synthetic_start_price: f64,
    /// Baseline for synthesized volume
    pub volume_base: f64,
    /// Opening gaps larger than this (percent) are flagged significant
    pub gap_threshold_pct: f64,
    /// Spacing of external context series (daily)
    pub external_interval_ms: i64,
    pub live_fetch: LiveFetchConfig,
}

/// Live external-signal retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveFetchConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub sentiment_base_url: String,
    pub chart_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synthetic_seed: 42,
            synthetic_interval_ms: 3_600_000,
            synthetic_bars: 500,
            max_synthetic_bars: 20_000,
            synthetic_start_price: 100.0,
            volume_base: 1_000_000.0,
            gap_threshold_pct: 0.5,
            external_interval_ms: 86_400_000,
            live_fetch: LiveFetchConfig::default(),
        }
    }
}

impl Default for LiveFetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 3_000,
            sentiment_base_url: "https://api.alternative.me".to_string(),
            chart_base_url: "https://query1.finance.yahoo.com".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `REGIME_SYNTHETIC_SEED`, `REGIME_LIVE_FETCH`
    /// and `REGIME_FETCH_TIMEOUT_MS`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seed) = env_parse::<u64>("REGIME_SYNTHETIC_SEED") {
            config.synthetic_seed = seed;
        }
        if let Ok(raw) = std::env::var("REGIME_LIVE_FETCH") {
            config.live_fetch.enabled = matches!(
                raw.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(timeout) = env_parse::<u64>("REGIME_FETCH_TIMEOUT_MS") {
            config.live_fetch.timeout_ms = timeout;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_live_fetch_off() {
        let config = EngineConfig::default();
        assert!(!config.live_fetch.enabled);
        assert_eq!(config.synthetic_seed, 42);
        assert!((config.gap_threshold_pct - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"synthetic_seed": 7}"#).unwrap();
        assert_eq!(config.synthetic_seed, 7);
        assert_eq!(config.synthetic_bars, 500);
        assert_eq!(config.live_fetch.timeout_ms, 3_000);
    }
}
