//! The provider contract real market-data feeds implement, plus a
//! deterministic in-crate stand-in used for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::error::MarketDataError;
use crate::market_data::{HistoricalData, MarketConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_historical: bool,
    pub granularity_seconds: u32,
}

/// A source of historical OHLCV bars for a single ticker at a time.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// `tickers` must contain exactly one symbol; a longer slice is a
    /// caller error, not a retryable failure.
    async fn fetch_historical_data(
        &self,
        tickers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        market_config: &MarketConfig,
    ) -> Result<HistoricalData, MarketDataError>;

    fn is_available(&self) -> bool;

    /// Maximum calls per minute this provider tolerates.
    fn rate_limit(&self) -> u32;

    fn capabilities(&self) -> ProviderCapabilities;
}

/// Validates the single-ticker contract every provider must enforce.
pub fn require_single_ticker(tickers: &[String]) -> Result<&str, MarketDataError> {
    match tickers {
        [only] => Ok(only.as_str()),
        _ => Err(MarketDataError::MultipleTickers { count: tickers.len() }),
    }
}

/// Deterministically synthesizes OHLCV bars from a seeded PRNG. Stands in
/// for a real wire provider so the engine is runnable and testable without
/// network access; given the same seed and ticker it always produces the
/// same series.
pub struct SyntheticProvider {
    seed: u64,
    rate_limit: u32,
    starting_price: f64,
    volatility: f64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rate_limit: 600,
            starting_price: 100.0,
            volatility: 0.002,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_starting_price(mut self, starting_price: f64) -> Self {
        self.starting_price = starting_price;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    fn seed_for(&self, ticker: &str) -> u64 {
        let mut hasher = FxHasher::default();
        self.seed.hash(&mut hasher);
        ticker.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    async fn fetch_historical_data(
        &self,
        tickers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _market_config: &MarketConfig,
    ) -> Result<HistoricalData, MarketDataError> {
        let ticker = require_single_ticker(tickers)?;
        if end < start {
            return Err(MarketDataError::Provider {
                ticker: ticker.to_string(),
                message: "end precedes start".into(),
                retryable: false,
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed_for(ticker));
        let mut series = HistoricalData::new(ticker);
        let mut price = self.starting_price;
        let mut minute = start;
        while minute <= end {
            let drift: f64 = rng.random_range(-self.volatility..self.volatility);
            let open = price;
            let close = (open * (1.0 + drift)).max(0.01);
            let high = open.max(close) * (1.0 + rng.random_range(0.0..self.volatility));
            let low = open.min(close) * (1.0 - rng.random_range(0.0..self.volatility));
            let volume = rng.random_range(100.0..10_000.0);
            let bar = crate::market_data::MarketDataPoint::new(ticker, open, high, low, close, volume)?;
            series.insert(ticker, minute, bar);
            price = close;
            minute += ChronoDuration::minutes(1);
        }
        Ok(series)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_historical: true,
            granularity_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn rejects_multiple_tickers() {
        let provider = SyntheticProvider::new(1);
        let cfg = MarketConfig::nyse();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 31, 0).unwrap();
        let result = provider
            .fetch_historical_data(&["AAPL".to_string(), "MSFT".to_string()], start, end, &cfg)
            .await;
        assert!(matches!(result, Err(MarketDataError::MultipleTickers { count: 2 })));
    }

    #[tokio::test]
    async fn is_deterministic_given_same_seed() {
        let cfg = MarketConfig::nyse();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 40, 0).unwrap();
        let a = SyntheticProvider::new(42)
            .fetch_historical_data(&["AAPL".to_string()], start, end, &cfg)
            .await
            .unwrap();
        let b = SyntheticProvider::new(42)
            .fetch_historical_data(&["AAPL".to_string()], start, end, &cfg)
            .await
            .unwrap();
        assert_eq!(a.len(), b.len());
        for ((t1, bar1), (t2, bar2)) in a.iter().zip(b.iter()) {
            assert_eq!(t1, t2);
            assert_eq!(bar1.close, bar2.close);
        }
    }

    #[tokio::test]
    async fn different_seeds_diverge() {
        let cfg = MarketConfig::nyse();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 40, 0).unwrap();
        let a = SyntheticProvider::new(1)
            .fetch_historical_data(&["AAPL".to_string()], start, end, &cfg)
            .await
            .unwrap();
        let b = SyntheticProvider::new(2)
            .fetch_historical_data(&["AAPL".to_string()], start, end, &cfg)
            .await
            .unwrap();
        let diverges = a.iter().zip(b.iter()).any(|((_, x), (_, y))| x.close != y.close);
        assert!(diverges);
    }

    #[tokio::test]
    async fn produced_bars_satisfy_ohlc_sanity() {
        let cfg = MarketConfig::nyse();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 45, 0).unwrap();
        let data = SyntheticProvider::new(7)
            .fetch_historical_data(&["AAPL".to_string()], start, end, &cfg)
            .await
            .unwrap();
        for (_, bar) in data.iter() {
            assert!(bar.low <= bar.open && bar.low <= bar.close && bar.low <= bar.high);
            assert!(bar.open <= bar.high && bar.close <= bar.high);
            assert!(bar.volume >= 0.0);
        }
    }
}
