//! Orchestrates provider calls, retry/backoff, and the segmented on-disk +
//! in-memory hot cache the engine reads from during replay.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::cache::SegmentedCache;
use crate::error::MarketDataError;
use crate::market_data::{HistoricalData, MarketConfig};
use crate::provider::MarketDataProvider;
use crate::rate_limiter::RateLimiter;

const RETRY_BACKOFF_MS: u64 = 5000;

struct FetchJob {
    ticker: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    market_config: MarketConfig,
    respond: oneshot::Sender<Result<HistoricalData, MarketDataError>>,
}

/// Serializes provider calls onto a dedicated single-thread executor (so
/// upstream rate limits are honored regardless of how many tasks on the
/// caller's runtime want data at once), backed by a segmented Parquet cache
/// and a `DashMap` hot cache of whatever's most recently been loaded.
pub struct HistoricalMarketService {
    cache: Mutex<SegmentedCache>,
    hot_cache: DashMap<String, HistoricalData>,
    rate_limiter: RateLimiter,
    max_retries: u32,
    job_tx: Mutex<Option<mpsc::UnboundedSender<FetchJob>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl HistoricalMarketService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, cache_root: impl Into<PathBuf>, max_retries: u32) -> Self {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<FetchJob>();
        let rate_limiter = RateLimiter::from_calls_per_minute(provider.rate_limit());

        let worker_provider = Arc::clone(&provider);
        let worker = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("building the provider executor");
            runtime.block_on(async move {
                while let Some(job) = job_rx.recv().await {
                    let result = worker_provider
                        .fetch_historical_data(&[job.ticker.clone()], job.start, job.end, &job.market_config)
                        .await;
                    let _ = job.respond.send(result);
                }
            });
        });

        Self {
            cache: Mutex::new(SegmentedCache::new(cache_root)),
            hot_cache: DashMap::new(),
            rate_limiter,
            max_retries,
            job_tx: Mutex::new(Some(job_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn call_provider(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        market_config: MarketConfig,
    ) -> Result<HistoricalData, MarketDataError> {
        let (respond, response) = oneshot::channel();
        let sender = self
            .job_tx
            .lock()
            .expect("job_tx mutex poisoned")
            .clone();
        let sender = sender.ok_or_else(|| MarketDataError::Provider {
            ticker: ticker.to_string(),
            message: "provider executor has shut down".into(),
            retryable: false,
        })?;
        sender
            .send(FetchJob {
                ticker: ticker.to_string(),
                start,
                end,
                market_config,
                respond,
            })
            .map_err(|_| MarketDataError::Provider {
                ticker: ticker.to_string(),
                message: "provider executor has shut down".into(),
                retryable: false,
            })?;
        response.await.map_err(|_| MarketDataError::Provider {
            ticker: ticker.to_string(),
            message: "provider executor dropped the response channel".into(),
            retryable: false,
        })?
    }

    async fn fetch_with_retry(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        market_config: MarketConfig,
    ) -> Result<HistoricalData, MarketDataError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.acquire(1, current_time_nanos).await;
            match self.call_provider(ticker, start, end, market_config).await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    let retryable = matches!(&err, MarketDataError::Provider { retryable: true, .. });
                    if !retryable || attempt >= self.max_retries {
                        if attempt >= self.max_retries {
                            return Err(MarketDataError::RetriesExhausted {
                                ticker: ticker.to_string(),
                                attempts: attempt,
                            });
                        }
                        return Err(err);
                    }
                    warn!(ticker, attempt, "provider call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt))).await;
                }
            }
        }
    }

    /// Fetches each ticker's bars in `[now - lookback_days, now]`, using
    /// the on-disk cache when a segment already covers the window.
    /// Idempotent: tickers already present in the hot cache covering the
    /// requested window are left untouched.
    pub async fn initialize(
        &self,
        tickers: &[String],
        lookback_days: i64,
        market_config: MarketConfig,
        now: DateTime<Utc>,
    ) -> Result<(), MarketDataError> {
        let start = now - chrono::Duration::days(lookback_days);
        let start_date = start.date_naive();
        let end_date = now.date_naive();

        for ticker in tickers {
            info!(ticker, "initializing historical data");

            if let Some(existing) = self.hot_cache.get(ticker) {
                if existing.first_timestamp().is_some_and(|t| t <= start)
                    && existing.last_timestamp().is_some_and(|t| t >= now)
                {
                    continue;
                }
            }

            let cached_path = {
                let cache = self.cache.lock().expect("cache mutex poisoned");
                cache.find_covering(ticker, start_date, end_date)
            };

            let loaded = if let Some(path) = cached_path {
                let mut cache = self.cache.lock().expect("cache mutex poisoned");
                match cache.load_segment(&path, ticker) {
                    Ok(data) => Some(data),
                    Err(MarketDataError::CacheCorrupt { path, .. }) => {
                        error!(ticker, path, "cache file corrupt, deleting and refetching");
                        cache.evict(ticker, std::path::Path::new(&path));
                        None
                    }
                    Err(other) => return Err(other),
                }
            } else {
                None
            };

            let data = match loaded {
                Some(data) => data,
                None => {
                    let fetched = self.fetch_with_retry(ticker, start, now, market_config).await?;
                    let mut cache = self.cache.lock().expect("cache mutex poisoned");
                    cache.write_segment(ticker, &fetched, start_date, end_date)?;
                    fetched
                }
            };

            self.hot_cache.insert(ticker.clone(), data);
        }
        Ok(())
    }

    /// Returns each ticker's bars in `[start, end]` from the hot cache
    /// (falling back to the file cache) after `initialize` has run.
    pub fn fetch_historical_data(
        &self,
        tickers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, HistoricalData>, MarketDataError> {
        let mut out = HashMap::new();
        for ticker in tickers {
            if let Some(series) = self.hot_cache.get(ticker) {
                let mut windowed = HistoricalData::new(ticker.clone());
                for (ts, bar) in series.range(start, end) {
                    windowed.insert(ticker, *ts, *bar);
                }
                out.insert(ticker.clone(), windowed);
                continue;
            }

            let cached_path = {
                let cache = self.cache.lock().expect("cache mutex poisoned");
                cache.find_covering(ticker, start.date_naive(), end.date_naive())
            };
            match cached_path {
                Some(path) => {
                    let cache = self.cache.lock().expect("cache mutex poisoned");
                    let data = cache.load_segment(&path, ticker)?;
                    out.insert(ticker.clone(), data);
                }
                None => {
                    return Err(MarketDataError::MissingTicker {
                        ticker: ticker.clone(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Drains the provider executor within `timeout`, forcibly abandoning
    /// it if it doesn't shut down in time.
    pub async fn close(&self, timeout: Duration) {
        self.job_tx.lock().expect("job_tx mutex poisoned").take();
        let handle = self.worker.lock().expect("worker mutex poisoned").take();
        let Some(handle) = handle else { return };
        let join = tokio::task::spawn_blocking(move || handle.join());
        if tokio::time::timeout(timeout, join).await.is_err() {
            warn!("provider executor did not shut down within the timeout, abandoning it");
        }
    }
}

fn current_time_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SyntheticProvider;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn initialize_then_fetch_round_trips() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SyntheticProvider::new(1));
        let service = HistoricalMarketService::new(provider, dir.path(), 3);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 40, 0).unwrap();

        service
            .initialize(&["AAPL".to_string()], 1, MarketConfig::nyse(), now)
            .await
            .unwrap();

        let result = service
            .fetch_historical_data(&["AAPL".to_string()], now - chrono::Duration::minutes(5), now)
            .unwrap();
        assert!(!result["AAPL"].is_empty());
    }

    #[tokio::test]
    async fn fetch_before_initialize_misses() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SyntheticProvider::new(1));
        let service = HistoricalMarketService::new(provider, dir.path(), 3);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 40, 0).unwrap();
        let result = service.fetch_historical_data(&["AAPL".to_string()], now, now);
        assert!(matches!(result, Err(MarketDataError::MissingTicker { .. })));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SyntheticProvider::new(1));
        let service = HistoricalMarketService::new(provider, dir.path(), 3);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 40, 0).unwrap();
        service
            .initialize(&["AAPL".to_string()], 1, MarketConfig::nyse(), now)
            .await
            .unwrap();
        service
            .initialize(&["AAPL".to_string()], 1, MarketConfig::nyse(), now)
            .await
            .unwrap();
        assert!(service.hot_cache.contains_key("AAPL"));
    }

    #[tokio::test]
    async fn close_completes_within_timeout() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SyntheticProvider::new(1));
        let service = HistoricalMarketService::new(provider, dir.path(), 3);
        service.close(Duration::from_secs(5)).await;
    }
}
