//! Typed error taxonomy for the engine's internal boundaries.
//!
//! Library code returns these via `thiserror`; only the runner binary and
//! test helpers reach for `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("insufficient cash: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("insufficient margin: need {needed:.2}, have {available:.2}")]
    InsufficientMargin { needed: f64, available: f64 },

    #[error("no long position in {ticker}")]
    NoSuchPosition { ticker: String },

    #[error("no short position in {ticker}")]
    NoSuchShortPosition { ticker: String },

    #[error("long position in {ticker} holds {held} shares, cannot sell {requested}")]
    InsufficientShares {
        ticker: String,
        held: f64,
        requested: f64,
    },

    #[error("short position in {ticker} owes {owed} shares, cannot cover {requested}")]
    InsufficientShortShares {
        ticker: String,
        owed: f64,
        requested: f64,
    },

    #[error("no current or cached price for {ticker}")]
    NoSuchTicker { ticker: String },
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("provider call for {ticker} failed: {message} (retryable={retryable})")]
    Provider {
        ticker: String,
        message: String,
        retryable: bool,
    },

    #[error("provider was given {count} tickers, expected exactly one")]
    MultipleTickers { count: usize },

    #[error("cache file for {ticker} at {path} is corrupt: {reason}")]
    CacheCorrupt {
        ticker: String,
        path: String,
        reason: String,
    },

    #[error("exhausted {attempts} retries fetching {ticker}")]
    RetriesExhausted { ticker: String, attempts: u32 },

    #[error("no cached or fetched data for {ticker}")]
    MissingTicker { ticker: String },

    #[error("bar for {ticker} fails OHLCV sanity: {reason}")]
    InvalidBar { ticker: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("empty timeline: no market data points admitted for any registered ticker")]
    EmptyTimeline,

    #[error("market data unavailable: {0}")]
    DataUnavailable(#[from] MarketDataError),

    #[error("no strategies registered")]
    NoStrategies,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Validation(String),
}
