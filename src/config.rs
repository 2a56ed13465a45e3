//! Builder and validation for one engine run's configuration.

use std::sync::Arc;

use garde::Validate;

use crate::error::ConfigError;
use crate::market_data::MarketConfig;
use crate::provider::MarketDataProvider;
use crate::strategy::Registration;

/// The plain scalar/collection fields `garde` can validate directly.
/// `provider` and `strategies` hold trait objects and are checked by hand in
/// [`BacktestConfigBuilder::build`] instead — garde's derive has no
/// validator for those.
#[derive(Validate)]
struct ScalarFields {
    #[garde(length(min = 1))]
    stocks: Vec<String>,
    #[garde(range(min = 1))]
    previous_days: u32,
    #[garde(range(min = 1))]
    interval_minutes: u32,
    #[garde(range(min = 1))]
    provider_rate_limit: u32,
}

pub struct Config {
    pub stocks: Vec<String>,
    pub previous_days: u32,
    pub market_config: MarketConfig,
    pub should_print: bool,
    pub interval_minutes: u32,
    pub run_on_market_closed: bool,
    pub auto_liquidate_on_finish: bool,
    pub provider: Arc<dyn MarketDataProvider>,
    pub strategies: Vec<Registration>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("stocks", &self.stocks)
            .field("previous_days", &self.previous_days)
            .field("market_config", &self.market_config)
            .field("should_print", &self.should_print)
            .field("interval_minutes", &self.interval_minutes)
            .field("run_on_market_closed", &self.run_on_market_closed)
            .field("auto_liquidate_on_finish", &self.auto_liquidate_on_finish)
            .field("provider", &"<dyn MarketDataProvider>")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

/// Collects every configuration problem before failing, rather than
/// stopping at the first one, so a caller fixing a config sees the whole
/// list in a single pass.
#[derive(Default)]
pub struct BacktestConfigBuilder {
    stocks: Vec<String>,
    previous_days: Option<u32>,
    market_config: Option<MarketConfig>,
    should_print: bool,
    interval_minutes: Option<u32>,
    run_on_market_closed: bool,
    auto_liquidate_on_finish: bool,
    provider: Option<Arc<dyn MarketDataProvider>>,
    strategies: Vec<Registration>,
}

impl BacktestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stocks(mut self, stocks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stocks = stocks.into_iter().map(Into::into).collect();
        self
    }

    pub fn previous_days(mut self, days: u32) -> Self {
        self.previous_days = Some(days);
        self
    }

    pub fn market_config(mut self, market_config: MarketConfig) -> Self {
        self.market_config = Some(market_config);
        self
    }

    pub fn should_print(mut self, should_print: bool) -> Self {
        self.should_print = should_print;
        self
    }

    pub fn interval_minutes(mut self, interval_minutes: u32) -> Self {
        self.interval_minutes = Some(interval_minutes);
        self
    }

    pub fn run_on_market_closed(mut self, run_on_market_closed: bool) -> Self {
        self.run_on_market_closed = run_on_market_closed;
        self
    }

    pub fn auto_liquidate_on_finish(mut self, auto_liquidate_on_finish: bool) -> Self {
        self.auto_liquidate_on_finish = auto_liquidate_on_finish;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn add_strategy(mut self, registration: Registration) -> Self {
        self.strategies.push(registration);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let mut problems = Vec::new();

        if self.provider.is_none() {
            problems.push("a market data provider is required".to_string());
        }
        if self.previous_days.is_none() {
            problems.push("previous_days is required".to_string());
        }
        if self.interval_minutes.is_none() {
            problems.push("interval_minutes is required".to_string());
        }

        if let (Some(previous_days), Some(interval_minutes), Some(provider)) =
            (self.previous_days, self.interval_minutes, &self.provider)
        {
            let scalars = ScalarFields {
                stocks: self.stocks.clone(),
                previous_days,
                interval_minutes,
                provider_rate_limit: provider.rate_limit(),
            };
            if let Err(report) = scalars.validate() {
                problems.push(report.to_string());
            }
        } else if self.stocks.is_empty() {
            problems.push("at least one ticker is required".to_string());
        }

        if let Some(market_config) = &self.market_config {
            if let Err(report) = market_config.validate() {
                problems.push(format!("market_config: {report}"));
            }
        }

        if self.strategies.is_empty() {
            problems.push("at least one strategy must be registered".to_string());
        }
        let mut seen_ids = std::collections::HashSet::new();
        for registration in &self.strategies {
            let id = registration.algorithm.algorithm_id();
            if !seen_ids.insert(id.clone()) {
                problems.push(format!("duplicate algorithm id: {id}"));
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Validation(problems.join("; ")));
        }

        Ok(Config {
            stocks: self.stocks,
            previous_days: self.previous_days.expect("validated above"),
            market_config: self.market_config.unwrap_or_else(MarketConfig::nyse),
            should_print: self.should_print,
            interval_minutes: self.interval_minutes.expect("validated above"),
            run_on_market_closed: self.run_on_market_closed,
            auto_liquidate_on_finish: self.auto_liquidate_on_finish,
            provider: self.provider.expect("validated above"),
            strategies: self.strategies,
        })
    }
}
