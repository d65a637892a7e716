//! Public market-context endpoints (no authentication required)
//!
//! Sentiment history comes from the alternative.me Fear & Greed API; volatility
//! index and treasury yield closes come from the Yahoo chart endpoint.

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::data_source::{MarketSignal, SeriesRequest};

const DEFAULT_SENTIMENT_URL: &str = "https://api.alternative.me";
const DEFAULT_CHART_URL: &str = "https://query1.finance.yahoo.com";
const MAX_SENTIMENT_POINTS: usize = 2_000;

/// Market context client
#[derive(Clone)]
pub struct MarketContextClient {
    client: Client,
    sentiment_base_url: String,
    chart_base_url: String,
}

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    data: Vec<FearGreedPoint>,
}

/// Values and timestamps arrive as strings (timestamp in seconds)
#[derive(Debug, Deserialize)]
struct FearGreedPoint {
    value: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl MarketContextClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regime-lens/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            sentiment_base_url: DEFAULT_SENTIMENT_URL.to_string(),
            chart_base_url: DEFAULT_CHART_URL.to_string(),
        })
    }

    pub fn with_base_urls(mut self, sentiment: &str, chart: &str) -> Self {
        self.sentiment_base_url = sentiment.trim_end_matches('/').to_string();
        self.chart_base_url = chart.trim_end_matches('/').to_string();
        self
    }

    /// Daily Fear & Greed readings, oldest first, as `(timestamp_ms, value)`
    pub async fn get_fear_greed(&self, limit: usize) -> Result<Vec<(i64, f64)>> {
        let limit = limit.clamp(1, MAX_SENTIMENT_POINTS);
        let url = format!("{}/fng/?limit={}", self.sentiment_base_url, limit);

        debug!(limit, "Fetching fear & greed history");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sentiment API error {}: {}", status, body);
        }

        let parsed: FearGreedResponse = response.json().await?;
        let mut points: Vec<(i64, f64)> = parsed
            .data
            .into_iter()
            .filter_map(|p| {
                let secs: i64 = p.timestamp.parse().ok()?;
                let value: f64 = p.value.parse().ok()?;
                Some((secs * 1_000, value))
            })
            .collect();
        points.sort_by_key(|(ts, _)| *ts);

        debug!(count = points.len(), "Fetched fear & greed history");
        Ok(points)
    }

    /// Daily closes for a chart symbol between two epoch-ms instants
    pub async fn get_chart_closes(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<(i64, f64)>> {
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.chart_base_url,
            symbol.replace('^', "%5E"),
            start_ms.div_euclid(1_000),
            end_ms.div_euclid(1_000) + 86_400,
        );

        debug!(symbol, start_ms, end_ms, "Fetching chart closes");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chart API error {} for {}: {}", status, symbol, body);
        }

        let parsed: ChartResponse = response.json().await?;
        let Some(result) = parsed.chart.result.and_then(|r| r.into_iter().next()) else {
            anyhow::bail!("Chart API returned no result for {}", symbol);
        };
        let closes = result
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();

        let points: Vec<(i64, f64)> = result
            .timestamp
            .into_iter()
            .zip(closes)
            .filter_map(|(secs, close)| close.map(|c| (secs * 1_000, c)))
            .collect();

        debug!(symbol, count = points.len(), "Fetched chart closes");
        Ok(points)
    }

    /// History for a context signal covering the request window
    pub async fn fetch_history(
        &self,
        signal: MarketSignal,
        request: &SeriesRequest,
    ) -> Result<Vec<(i64, f64)>> {
        match signal {
            MarketSignal::FearGreed => {
                let now = chrono::Utc::now().timestamp_millis();
                let days = ((now - request.start).max(0) / 86_400_000) as usize + 1;
                let points = self.get_fear_greed(days).await?;
                Ok(points
                    .into_iter()
                    .filter(|(ts, _)| *ts >= request.start - request.interval_ms)
                    .collect())
            }
            MarketSignal::VolatilityIndex => {
                self.get_chart_closes("^VIX", request.start, request.end())
                    .await
            }
            MarketSignal::TreasuryYield => {
                self.get_chart_closes("^TNX", request.start, request.end())
                    .await
            }
            MarketSignal::BtcDominance | MarketSignal::PutCallRatio => {
                anyhow::bail!("no public history endpoint for {}", signal.key())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fear_greed_payload_parses() {
        let body = r#"{"name":"Fear and Greed Index","data":[
            {"value":"40","value_classification":"Fear","timestamp":"1551157200"}
        ],"metadata":{"error":null}}"#;
        let parsed: FearGreedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].value, "40");
    }

    #[test]
    fn test_chart_payload_tolerates_null_closes() {
        let body = r#"{"chart":{"result":[{"timestamp":[1,2],
            "indicators":{"quote":[{"close":[18.5,null]}]}}],"error":null}}"#;
        let parsed: ChartResponse = serde_json::from_str(body).unwrap();
        let result = parsed.chart.result.unwrap();
        assert_eq!(result[0].indicators.quote[0].close, vec![Some(18.5), None]);
    }

    #[tokio::test]
    async fn test_unsupported_signal_is_an_error() {
        let client = MarketContextClient::new(Duration::from_millis(50)).unwrap();
        let request = SeriesRequest::new(0, 86_400_000, 3);
        let err = client
            .fetch_history(MarketSignal::PutCallRatio, &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("put_call_ratio"));
    }
}
