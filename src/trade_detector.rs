//! Infers trade events from before/after portfolio snapshots.
//!
//! Strategies never report trades directly — the detector is the sole
//! authority for "a trade occurred," working purely from the delta between
//! two snapshots of a portfolio's long/short mappings.

use std::collections::HashMap;

/// `(quantity, avg_cost_or_entry_price)` for one ticker, captured before and
/// after a strategy's `on_update` call.
pub type PositionSnapshot = HashMap<String, (f64, f64)>;

#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    Buy { ticker: String, qty: f64, price: f64 },
    Sell { ticker: String, qty: f64, price: f64 },
    Short { ticker: String, qty: f64, price: f64 },
    Cover { ticker: String, qty: f64, price: f64 },
}

impl TradeEvent {
    pub fn ticker(&self) -> &str {
        match self {
            TradeEvent::Buy { ticker, .. }
            | TradeEvent::Sell { ticker, .. }
            | TradeEvent::Short { ticker, .. }
            | TradeEvent::Cover { ticker, .. } => ticker,
        }
    }

    pub fn qty(&self) -> f64 {
        match self {
            TradeEvent::Buy { qty, .. }
            | TradeEvent::Sell { qty, .. }
            | TradeEvent::Short { qty, .. }
            | TradeEvent::Cover { qty, .. } => *qty,
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            TradeEvent::Buy { price, .. }
            | TradeEvent::Sell { price, .. }
            | TradeEvent::Short { price, .. }
            | TradeEvent::Cover { price, .. } => *price,
        }
    }
}

/// Diffs pre/post long and short snapshots, emitting synthetic trade
/// events. `current_close` supplies the tick's mark price for SELL/COVER
/// events, which are priced at the current close rather than any price the
/// strategy actually traded at (consistent with the source system: only
/// BUY/SHORT events carry a cost-basis price, since that's all a snapshot
/// delta can recover).
pub fn detect_trades(
    pre_longs: &PositionSnapshot,
    post_longs: &PositionSnapshot,
    pre_shorts: &PositionSnapshot,
    post_shorts: &PositionSnapshot,
    current_close: &HashMap<String, f64>,
) -> Vec<TradeEvent> {
    let mut events = Vec::new();

    let mut long_tickers: Vec<&String> = pre_longs.keys().chain(post_longs.keys()).collect();
    long_tickers.sort();
    long_tickers.dedup();
    for ticker in long_tickers {
        let pre = pre_longs.get(ticker);
        let post = post_longs.get(ticker);
        match (pre, post) {
            (None, Some((qty, avg_cost))) => events.push(TradeEvent::Buy {
                ticker: ticker.clone(),
                qty: *qty,
                price: *avg_cost,
            }),
            (Some((pre_qty, _)), Some((post_qty, post_avg_cost))) if post_qty > pre_qty => {
                events.push(TradeEvent::Buy {
                    ticker: ticker.clone(),
                    qty: post_qty - pre_qty,
                    price: *post_avg_cost,
                });
            }
            (Some((pre_qty, _)), Some((post_qty, _))) if post_qty < pre_qty => {
                let close = current_close.get(ticker).copied().unwrap_or(0.0);
                events.push(TradeEvent::Sell {
                    ticker: ticker.clone(),
                    qty: pre_qty - post_qty,
                    price: close,
                });
            }
            (Some((pre_qty, _)), None) => {
                let close = current_close.get(ticker).copied().unwrap_or(0.0);
                events.push(TradeEvent::Sell {
                    ticker: ticker.clone(),
                    qty: *pre_qty,
                    price: close,
                });
            }
            _ => {}
        }
    }

    let mut short_tickers: Vec<&String> = pre_shorts.keys().chain(post_shorts.keys()).collect();
    short_tickers.sort();
    short_tickers.dedup();
    for ticker in short_tickers {
        let pre = pre_shorts.get(ticker);
        let post = post_shorts.get(ticker);
        match (pre, post) {
            (None, Some((qty, entry))) => events.push(TradeEvent::Short {
                ticker: ticker.clone(),
                qty: *qty,
                price: *entry,
            }),
            (Some((pre_qty, _)), Some((post_qty, post_entry))) if post_qty > pre_qty => {
                events.push(TradeEvent::Short {
                    ticker: ticker.clone(),
                    qty: post_qty - pre_qty,
                    price: *post_entry,
                });
            }
            (Some((pre_qty, _)), Some((post_qty, _))) if post_qty < pre_qty => {
                let close = current_close.get(ticker).copied().unwrap_or(0.0);
                events.push(TradeEvent::Cover {
                    ticker: ticker.clone(),
                    qty: pre_qty - post_qty,
                    price: close,
                });
            }
            (Some((pre_qty, _)), None) => {
                let close = current_close.get(ticker).copied().unwrap_or(0.0);
                events.push(TradeEvent::Cover {
                    ticker: ticker.clone(),
                    qty: *pre_qty,
                    price: close,
                });
            }
            _ => {}
        }
    }

    events
}
