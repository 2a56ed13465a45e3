//! Read-only fundamentals sidecar: earnings, ratios, income statements, and
//! news sentiment, each independently TTL-cached and persisted to disk.
//!
//! Not on the replay hot path — strategies call into this directly, not
//! through the engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

const TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub symbol: String,
    pub report_date: DateTime<Utc>,
    pub eps_estimate: f64,
    pub eps_actual: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialRatios {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub pe_ratio: f64,
    pub debt_to_equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub symbol: String,
    pub fiscal_quarter_end: DateTime<Utc>,
    pub revenue: f64,
    pub net_income: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSentiment {
    pub symbol: String,
    pub published_at: DateTime<Utc>,
    pub score: f64,
}

trait AsOf {
    fn as_of_timestamp(&self) -> DateTime<Utc>;
}

impl AsOf for EarningsEvent {
    fn as_of_timestamp(&self) -> DateTime<Utc> {
        self.report_date
    }
}
impl AsOf for FinancialRatios {
    fn as_of_timestamp(&self) -> DateTime<Utc> {
        self.as_of
    }
}
impl AsOf for IncomeStatement {
    fn as_of_timestamp(&self) -> DateTime<Utc> {
        self.fiscal_quarter_end
    }
}
impl AsOf for NewsSentiment {
    fn as_of_timestamp(&self) -> DateTime<Utc> {
        self.published_at
    }
}

struct TtlCache<T> {
    entries: DashMap<String, CacheEntry<Vec<T>>>,
    file_name: &'static str,
}

impl<T: Clone + Serialize + DeserializeOwned + AsOf> TtlCache<T> {
    fn new(file_name: &'static str) -> Self {
        Self {
            entries: DashMap::new(),
            file_name,
        }
    }

    fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name)
    }

    fn load(&self, dir: &Path) {
        let path = self.path(dir);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return;
        };
        match serde_json::from_str::<std::collections::HashMap<String, CacheEntry<Vec<T>>>>(&contents) {
            Ok(map) => {
                for (symbol, entry) in map {
                    self.entries.insert(symbol, entry);
                }
            }
            Err(e) => warn!(file = self.file_name, error = %e, "failed to parse fundamentals cache, starting empty"),
        }
    }

    fn persist(&self, dir: &Path, now_ms: i64) {
        let path = self.path(dir);
        let snapshot: std::collections::HashMap<String, CacheEntry<Vec<T>>> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let _ = now_ms;
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(file = self.file_name, error = %e, "failed to persist fundamentals cache");
                }
            }
            Err(e) => warn!(file = self.file_name, error = %e, "failed to serialize fundamentals cache"),
        }
    }

    fn is_fresh(&self, symbol: &str, now_ms: i64) -> bool {
        self.entries
            .get(symbol)
            .is_some_and(|entry| now_ms - entry.timestamp_ms < TTL_MS)
    }

    fn get(&self, symbol: &str, as_of: DateTime<Utc>) -> Option<Vec<T>> {
        let entry = self.entries.get(symbol)?;
        Some(
            entry
                .data
                .iter()
                .filter(|record| record.as_of_timestamp() < as_of)
                .cloned()
                .collect(),
        )
    }

    fn put(&self, symbol: &str, records: Vec<T>, now_ms: i64) {
        self.entries.insert(
            symbol.to_string(),
            CacheEntry {
                data: records,
                timestamp_ms: now_ms,
            },
        );
    }
}

/// The four independently-cached fundamentals feeds strategies may read.
/// Each accessor's `as_of` filters out any record whose own timestamp is
/// not strictly before it, preventing look-ahead in a backtest.
pub struct FundamentalsFetcher {
    dir: PathBuf,
    earnings: TtlCache<EarningsEvent>,
    ratios: TtlCache<FinancialRatios>,
    income: TtlCache<IncomeStatement>,
    sentiment: TtlCache<NewsSentiment>,
}

impl FundamentalsFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let fetcher = Self {
            dir: dir.clone(),
            earnings: TtlCache::new("earnings_cache.json"),
            ratios: TtlCache::new("metrics_cache.json"),
            income: TtlCache::new("income_cache.json"),
            sentiment: TtlCache::new("sentiment_cache.json"),
        };
        fetcher.earnings.load(&dir);
        fetcher.ratios.load(&dir);
        fetcher.income.load(&dir);
        fetcher.sentiment.load(&dir);
        fetcher
    }

    pub fn earnings(&self, symbol: &str, as_of: DateTime<Utc>) -> Option<Vec<EarningsEvent>> {
        self.earnings.get(symbol, as_of)
    }

    pub fn ratios(&self, symbol: &str, as_of: DateTime<Utc>) -> Option<Vec<FinancialRatios>> {
        self.ratios.get(symbol, as_of)
    }

    pub fn income_statements(&self, symbol: &str, as_of: DateTime<Utc>) -> Option<Vec<IncomeStatement>> {
        self.income.get(symbol, as_of)
    }

    pub fn sentiment(&self, symbol: &str, as_of: DateTime<Utc>) -> Option<Vec<NewsSentiment>> {
        self.sentiment.get(symbol, as_of)
    }

    pub fn is_earnings_fresh(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.earnings.is_fresh(symbol, now.timestamp_millis())
    }

    pub fn put_earnings(&self, symbol: &str, records: Vec<EarningsEvent>, now: DateTime<Utc>) {
        self.earnings.put(symbol, records, now.timestamp_millis());
        self.earnings.persist(&self.dir, now.timestamp_millis());
    }

    pub fn put_ratios(&self, symbol: &str, records: Vec<FinancialRatios>, now: DateTime<Utc>) {
        self.ratios.put(symbol, records, now.timestamp_millis());
        self.ratios.persist(&self.dir, now.timestamp_millis());
    }

    pub fn put_income_statements(&self, symbol: &str, records: Vec<IncomeStatement>, now: DateTime<Utc>) {
        self.income.put(symbol, records, now.timestamp_millis());
        self.income.persist(&self.dir, now.timestamp_millis());
    }

    pub fn put_sentiment(&self, symbol: &str, records: Vec<NewsSentiment>, now: DateTime<Utc>) {
        self.sentiment.put(symbol, records, now.timestamp_millis());
        self.sentiment.persist(&self.dir, now.timestamp_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn as_of_filters_out_future_records() {
        let dir = tempdir().unwrap();
        let fetcher = FundamentalsFetcher::new(dir.path());
        fetcher.put_earnings(
            "AAPL",
            vec![
                EarningsEvent {
                    symbol: "AAPL".into(),
                    report_date: ts(5),
                    eps_estimate: 1.5,
                    eps_actual: Some(1.6),
                },
                EarningsEvent {
                    symbol: "AAPL".into(),
                    report_date: ts(20),
                    eps_estimate: 1.7,
                    eps_actual: None,
                },
            ],
            ts(1),
        );

        let visible = fetcher.earnings("AAPL", ts(10)).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].report_date, ts(5));
    }

    #[test]
    fn freshness_respects_ttl() {
        let dir = tempdir().unwrap();
        let fetcher = FundamentalsFetcher::new(dir.path());
        fetcher.put_ratios("AAPL", vec![], ts(1));
        assert!(fetcher.is_earnings_fresh("AAPL", ts(1)) == false);
        assert!(fetcher.ratios.is_fresh("AAPL", ts(1).timestamp_millis()));
        let far_future = ts(1) + chrono::Duration::days(2);
        assert!(!fetcher.ratios.is_fresh("AAPL", far_future.timestamp_millis()));
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempdir().unwrap();
        {
            let fetcher = FundamentalsFetcher::new(dir.path());
            fetcher.put_sentiment(
                "AAPL",
                vec![NewsSentiment {
                    symbol: "AAPL".into(),
                    published_at: ts(1),
                    score: 0.5,
                }],
                ts(1),
            );
        }
        let reloaded = FundamentalsFetcher::new(dir.path());
        let records = reloaded.sentiment("AAPL", ts(10)).unwrap();
        assert_eq!(records.len(), 1);
    }
}
