//! The strategy contract and the registry that holds one handle per
//! registered strategy for an engine run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::market_data::MarketDataPoint;
use crate::portfolio::Portfolio;

/// The small capability set a strategy implements. An `Algorithm` owns no
/// state about the portfolio itself — it's handed a mutable view each call
/// and may invoke any `Portfolio` method, including ones that fail.
pub trait Algorithm: Send {
    /// Called once with the first tick's bar map, before any `on_update`.
    fn on_market_open(&mut self, initial_data: &HashMap<String, MarketDataPoint>) {
        let _ = initial_data;
    }

    /// Called on every admitted, non-decimated tick.
    fn on_update(
        &mut self,
        current_data: &HashMap<String, MarketDataPoint>,
        timestamp: DateTime<Utc>,
        portfolio: &mut Portfolio,
    );

    /// Called once with the last tick's bar map.
    fn on_market_close(&mut self, final_data: &HashMap<String, MarketDataPoint>) {
        let _ = final_data;
    }

    /// Must be unique across every strategy registered on one engine run.
    fn algorithm_id(&self) -> String;
}

/// One `(strategy, initial capital)` registration, as the engine builder
/// collects them.
pub struct Registration {
    pub algorithm: Box<dyn Algorithm>,
    pub initial_capital: f64,
}

impl Registration {
    pub fn new(algorithm: Box<dyn Algorithm>, initial_capital: f64) -> Self {
        Self {
            algorithm,
            initial_capital,
        }
    }
}
