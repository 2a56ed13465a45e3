//! The per-strategy holdings ledger: cash, margin, and every open position.

pub mod position;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use position::{OptionPosition, OptionType, Position, ShortPosition, StopOrder, StopOrderType};

/// Fraction of notional reserved from `margin_available` per share shorted,
/// and released per share covered (against the entry notional).
pub const MARGIN_REQUIREMENT: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub margin_available: f64,
    longs: HashMap<String, Position>,
    shorts: HashMap<String, ShortPosition>,
    options: HashMap<String, Vec<OptionPosition>>,
    stop_orders: HashMap<String, Vec<StopOrder>>,
    last_seen_close: HashMap<String, f64>,
    total_positions: u64,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            margin_available: initial_cash * 2.0,
            longs: HashMap::new(),
            shorts: HashMap::new(),
            options: HashMap::new(),
            stop_orders: HashMap::new(),
            last_seen_close: HashMap::new(),
            total_positions: 0,
        }
    }

    pub fn long_position(&self, ticker: &str) -> Option<&Position> {
        self.longs.get(ticker)
    }

    pub fn short_position(&self, ticker: &str) -> Option<&ShortPosition> {
        self.shorts.get(ticker)
    }

    pub fn options(&self, ticker: &str) -> &[OptionPosition] {
        self.options.get(ticker).map_or(&[], Vec::as_slice)
    }

    pub fn stop_orders(&self, ticker: &str) -> &[StopOrder] {
        self.stop_orders.get(ticker).map_or(&[], Vec::as_slice)
    }

    pub fn longs(&self) -> &HashMap<String, Position> {
        &self.longs
    }

    pub fn shorts(&self) -> &HashMap<String, ShortPosition> {
        &self.shorts
    }

    pub fn total_positions(&self) -> u64 {
        self.total_positions
    }

    pub fn buy_stock(
        &mut self,
        ticker: &str,
        qty: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        let cost = qty * price;
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds {
                needed: cost,
                available: self.cash,
            });
        }
        match self.longs.get_mut(ticker) {
            Some(pos) => pos.add_shares(qty, price, timestamp),
            None => {
                self.longs.insert(ticker.to_string(), Position::new(qty, price, timestamp));
            }
        }
        self.cash -= cost;
        self.total_positions += 1;
        Ok(())
    }

    pub fn sell_stock(
        &mut self,
        ticker: &str,
        qty: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        let pos = self
            .longs
            .get_mut(ticker)
            .ok_or_else(|| PortfolioError::NoSuchPosition {
                ticker: ticker.to_string(),
            })?;
        if pos.quantity < qty {
            return Err(PortfolioError::InsufficientShares {
                ticker: ticker.to_string(),
                held: pos.quantity,
                requested: qty,
            });
        }
        pos.reduce_shares(qty, price, timestamp);
        if pos.quantity == 0.0 {
            self.longs.remove(ticker);
        }
        self.cash += qty * price;
        self.total_positions += 1;
        Ok(())
    }

    pub fn short_stock(
        &mut self,
        ticker: &str,
        qty: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        let margin_required = qty * price * MARGIN_REQUIREMENT;
        if margin_required > self.margin_available {
            return Err(PortfolioError::InsufficientMargin {
                needed: margin_required,
                available: self.margin_available,
            });
        }
        match self.shorts.get_mut(ticker) {
            Some(short) => short.add_shares(qty, timestamp),
            None => {
                self.shorts
                    .insert(ticker.to_string(), ShortPosition::new(qty, price, timestamp));
            }
        }
        self.cash += qty * price;
        self.margin_available -= margin_required;
        self.total_positions += 1;
        Ok(())
    }

    pub fn cover_short(
        &mut self,
        ticker: &str,
        qty: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        let short = self
            .shorts
            .get_mut(ticker)
            .ok_or_else(|| PortfolioError::NoSuchShortPosition {
                ticker: ticker.to_string(),
            })?;
        if short.quantity < qty {
            return Err(PortfolioError::InsufficientShortShares {
                ticker: ticker.to_string(),
                owed: short.quantity,
                requested: qty,
            });
        }
        let cost = qty * price;
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds {
                needed: cost,
                available: self.cash,
            });
        }
        let entry_price = short.entry_price;
        short.cover_shares(qty, price, timestamp);
        if short.quantity == 0.0 {
            self.shorts.remove(ticker);
        }
        self.cash -= cost;
        self.margin_available += qty * entry_price * MARGIN_REQUIREMENT;
        self.total_positions += 1;
        Ok(())
    }

    pub fn buy_option(
        &mut self,
        ticker: &str,
        option_type: OptionType,
        strike: f64,
        expiration: DateTime<Utc>,
        contracts: f64,
        premium: f64,
    ) -> Result<(), PortfolioError> {
        let cost = contracts * premium * 100.0;
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds {
                needed: cost,
                available: self.cash,
            });
        }
        self.options.entry(ticker.to_string()).or_default().push(OptionPosition {
            ticker: ticker.to_string(),
            option_type,
            strike,
            expiration,
            contracts,
            premium,
        });
        self.cash -= cost;
        self.total_positions += 1;
        Ok(())
    }

    fn set_stop_order(&mut self, ticker: &str, trigger_price: f64, quantity: f64, order_type: StopOrderType) {
        self.stop_orders.entry(ticker.to_string()).or_default().push(StopOrder {
            ticker: ticker.to_string(),
            trigger_price,
            quantity,
            order_type,
        });
        self.total_positions += 1;
    }

    pub fn set_stop_loss(&mut self, ticker: &str, trigger_price: f64, quantity: f64) {
        self.set_stop_order(ticker, trigger_price, quantity, StopOrderType::StopLoss);
    }

    pub fn set_take_profit(&mut self, ticker: &str, trigger_price: f64, quantity: f64) {
        self.set_stop_order(ticker, trigger_price, quantity, StopOrderType::TakeProfit);
    }

    /// Total mark-to-market value of the portfolio given the current close
    /// for each ticker. Missing tickers fall back to the last-seen close
    /// recorded by a previous call; a ticker never seen before is an error
    /// rather than a silent zero.
    pub fn total_value(
        &mut self,
        current_prices: &HashMap<String, f64>,
        as_of: DateTime<Utc>,
    ) -> Result<f64, PortfolioError> {
        for (ticker, price) in current_prices {
            self.last_seen_close.insert(ticker.clone(), *price);
        }

        let mut total = self.cash;

        for (ticker, pos) in &self.longs {
            let close = self.close_for(ticker, current_prices)?;
            total += pos.quantity * close;
        }
        for (ticker, short) in &self.shorts {
            let close = self.close_for(ticker, current_prices)?;
            total -= short.quantity * close;
        }
        for (ticker, lots) in &self.options {
            let close = self.close_for(ticker, current_prices)?;
            for lot in lots {
                total += lot.current_value(close, as_of);
            }
        }
        Ok(total)
    }

    fn close_for(&self, ticker: &str, current_prices: &HashMap<String, f64>) -> Result<f64, PortfolioError> {
        if let Some(price) = current_prices.get(ticker) {
            return Ok(*price);
        }
        self.last_seen_close
            .get(ticker)
            .copied()
            .ok_or_else(|| PortfolioError::NoSuchTicker {
                ticker: ticker.to_string(),
            })
    }
}
