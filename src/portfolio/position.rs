//! Holding types: long positions, short positions, options, and stop orders.
//!
//! These are plain owning structs mutated only through [`super::Portfolio`]'s
//! methods — there is no internal locking here, matching the single-writer
//! discipline a portfolio is used under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOrderType {
    StopLoss,
    TakeProfit,
}

/// A net-long holding in one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub cost_basis: f64,
    pub realized_pnl: f64,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn new(quantity: f64, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            quantity,
            cost_basis: quantity * price,
            realized_pnl: 0.0,
            last_update: timestamp,
        }
    }

    /// Cost basis divided by quantity, or `0.0` when flat.
    pub fn average_cost(&self) -> f64 {
        if self.quantity > 0.0 {
            self.cost_basis / self.quantity
        } else {
            0.0
        }
    }

    pub fn add_shares(&mut self, qty: f64, price: f64, timestamp: DateTime<Utc>) {
        self.quantity += qty;
        self.cost_basis += qty * price;
        self.last_update = timestamp;
    }

    /// Reduce the position by `qty` at `price`, accumulating realized P&L.
    /// Resets cost basis to zero when the position goes flat.
    pub fn reduce_shares(&mut self, qty: f64, price: f64, timestamp: DateTime<Utc>) {
        let avg_cost = self.average_cost();
        self.realized_pnl += (price - avg_cost) * qty;
        self.quantity -= qty;
        if self.quantity <= 0.0 {
            self.quantity = 0.0;
            self.cost_basis = 0.0;
        } else {
            self.cost_basis -= avg_cost * qty;
        }
        self.last_update = timestamp;
    }
}

/// A net-short holding: shares owed, not owned.
///
/// `entry_price` is set by the first lot and deliberately never reweighted
/// by later adds — see DESIGN.md for why this is kept rather than switched
/// to a weighted average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortPosition {
    pub quantity: f64,
    pub entry_price: f64,
    pub realized_pnl: f64,
    pub last_update: DateTime<Utc>,
}

impl ShortPosition {
    pub fn new(quantity: f64, entry_price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            quantity,
            entry_price,
            realized_pnl: 0.0,
            last_update: timestamp,
        }
    }

    pub fn add_shares(&mut self, qty: f64, timestamp: DateTime<Utc>) {
        self.quantity += qty;
        self.last_update = timestamp;
    }

    pub fn cover_shares(&mut self, qty: f64, cover_price: f64, timestamp: DateTime<Utc>) {
        self.realized_pnl += (self.entry_price - cover_price) * qty;
        self.quantity -= qty;
        if self.quantity <= 0.0 {
            self.quantity = 0.0;
        }
        self.last_update = timestamp;
    }
}

/// A single options contract lot. One contract controls 100 shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionPosition {
    pub ticker: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub contracts: f64,
    pub premium: f64,
}

const SHARES_PER_CONTRACT: f64 = 100.0;

impl OptionPosition {
    /// Mark-to-market value given the underlying's spot price `spot` at
    /// `as_of`. Zero once `as_of` is past `expiration`.
    pub fn current_value(&self, spot: f64, as_of: DateTime<Utc>) -> f64 {
        if as_of > self.expiration {
            return 0.0;
        }
        let intrinsic = match self.option_type {
            OptionType::Call => (spot - self.strike).max(0.0),
            OptionType::Put => (self.strike - spot).max(0.0),
        };
        self.contracts * SHARES_PER_CONTRACT * (intrinsic - self.premium)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopOrder {
    pub ticker: String,
    pub trigger_price: f64,
    pub quantity: f64,
    pub order_type: StopOrderType,
}
