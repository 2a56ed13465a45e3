#![allow(clippy::float_cmp, clippy::cast_precision_loss)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fundamentals;
pub mod historical_service;
pub mod market_data;
pub mod portfolio;
pub mod provider;
pub mod rate_limiter;
pub mod statistics;
pub mod strategy;
pub mod timeline;
pub mod trade_detector;

pub use config::{BacktestConfigBuilder, Config};
pub use engine::{BacktestEngine, BacktestResults};
pub use historical_service::HistoricalMarketService;
pub use market_data::{HistoricalData, MarketConfig, MarketDataPoint};
pub use portfolio::Portfolio;
pub use provider::{MarketDataProvider, SyntheticProvider};
pub use strategy::{Algorithm, Registration};
