//! Running per-strategy performance accounting driven by the trade detector.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::trade_detector::TradeEvent;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TickerStats {
    pub realized_pnl: f64,
    pub wins: u32,
    pub losses: u32,
    pub largest_gain: f64,
    pub largest_loss: f64,
}

impl TickerStats {
    fn record(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        if pnl >= 0.0 {
            self.wins += 1;
            self.largest_gain = self.largest_gain.max(pnl);
        } else {
            self.losses += 1;
            self.largest_loss = self.largest_loss.min(pnl);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WeeklyPerformance {
    pub profit: f64,
    pub total_sells: u32,
    total_shares: f64,
    pub profit_per_share: f64,
}

impl WeeklyPerformance {
    fn record(&mut self, profit: f64, qty: f64) {
        self.profit += profit;
        self.total_sells += 1;
        if qty != 0.0 {
            self.total_shares += qty;
            self.profit_per_share = self.profit / self.total_shares;
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TradeRecord {
    pub ticker: String,
    pub qty: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: &'static str,
}

/// Running P&L, drawdown, Sharpe, and per-ticker/per-week performance for
/// one registered strategy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlgorithmStatistics {
    pub algorithm_id: String,
    pub start_time: DateTime<Utc>,
    pub initial_value: f64,
    pub total_profit: f64,
    pub peak_value: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub total_trades: u64,
    returns: Vec<f64>,
    per_ticker: HashMap<String, TickerStats>,
    per_week: HashMap<NaiveDate, WeeklyPerformance>,
    open_longs: HashMap<String, f64>,
    open_shorts: HashMap<String, f64>,
    pub trade_history: Vec<TradeRecord>,
}

fn week_start(ts: DateTime<Utc>) -> NaiveDate {
    let date = ts.date_naive();
    let days_since_monday = date.weekday().num_days_from_monday();
    date - chrono::Duration::days(i64::from(days_since_monday))
}

impl AlgorithmStatistics {
    pub fn new(algorithm_id: impl Into<String>, start_time: DateTime<Utc>, initial_value: f64) -> Self {
        Self {
            algorithm_id: algorithm_id.into(),
            start_time,
            initial_value,
            total_profit: 0.0,
            peak_value: initial_value,
            max_drawdown: 0.0,
            sharpe: 0.0,
            total_trades: 0,
            returns: Vec::new(),
            per_ticker: HashMap::new(),
            per_week: HashMap::new(),
            open_longs: HashMap::new(),
            open_shorts: HashMap::new(),
            trade_history: Vec::new(),
        }
    }

    pub fn ticker_stats(&self, ticker: &str) -> Option<&TickerStats> {
        self.per_ticker.get(ticker)
    }

    pub fn weekly_performance(&self, week: NaiveDate) -> Option<&WeeklyPerformance> {
        self.per_week.get(&week)
    }

    /// Called once per processed tick with the portfolio's recomputed total
    /// value and the period's risk-free rate (annualized).
    pub fn update_statistics(&mut self, current_value: f64, daily_risk_free_rate: f64) {
        self.total_profit = current_value - self.initial_value;
        self.peak_value = self.peak_value.max(current_value);

        let drawdown = if self.peak_value > 0.0 {
            (self.peak_value - current_value) / self.peak_value * 100.0
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(drawdown);

        if self.initial_value != 0.0 {
            self.returns.push((current_value - self.initial_value) / self.initial_value);
        }

        if self.returns.len() >= 2 {
            let avg = mean(&self.returns);
            let sd = sample_std_dev(&self.returns, avg);
            self.sharpe = if sd == 0.0 {
                0.0
            } else {
                TRADING_DAYS_PER_YEAR.sqrt() * (avg - daily_risk_free_rate / TRADING_DAYS_PER_YEAR) / sd
            };
        }
    }

    /// Records a detector-emitted trade event, attributing realized P&L to
    /// the ticker and ISO week it closed a round trip in.
    pub fn record_trade(&mut self, event: &TradeEvent, timestamp: DateTime<Utc>) {
        self.total_trades += 1;
        let ticker = event.ticker().to_string();
        let qty = event.qty();
        let price = event.price();

        let kind = match event {
            TradeEvent::Buy { .. } => {
                self.open_longs.insert(ticker.clone(), price);
                "BUY"
            }
            TradeEvent::Sell { .. } => {
                if let Some(buy_price) = self.open_longs.remove(&ticker) {
                    let pnl = (price - buy_price) * qty;
                    self.per_ticker.entry(ticker.clone()).or_default().record(pnl);
                    self.per_week.entry(week_start(timestamp)).or_default().record(pnl, qty);
                }
                "SELL"
            }
            TradeEvent::Short { .. } => {
                self.open_shorts.insert(ticker.clone(), price);
                "SHORT"
            }
            TradeEvent::Cover { .. } => {
                if let Some(entry_price) = self.open_shorts.remove(&ticker) {
                    let pnl = (entry_price - price) * qty;
                    self.per_ticker.entry(ticker.clone()).or_default().record(pnl);
                    self.per_week.entry(week_start(timestamp)).or_default().record(pnl, qty);
                }
                "COVER"
            }
        };

        self.trade_history.push(TradeRecord {
            ticker,
            qty,
            price,
            timestamp,
            kind,
        });
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std_dev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 9, 30, 0).unwrap()
    }

    #[test]
    fn drawdown_scenario() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 100.0);
        for value in [100.0, 120.0, 90.0, 110.0, 80.0] {
            stats.update_statistics(value, 0.0);
        }
        assert!((stats.peak_value - 120.0).abs() < 1e-9);
        assert!((stats.max_drawdown - 33.333_333_333).abs() < 1e-6);
    }

    #[test]
    fn drawdown_is_monotonic_non_decreasing() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 100.0);
        let mut last = 0.0;
        for value in [100.0, 90.0, 130.0, 70.0, 140.0, 60.0] {
            stats.update_statistics(value, 0.0);
            assert!(stats.max_drawdown >= last - 1e-9);
            last = stats.max_drawdown;
        }
    }

    #[test]
    fn sharpe_zero_when_returns_are_identical() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 100.0);
        stats.update_statistics(110.0, 0.0);
        stats.update_statistics(110.0, 0.0);
        stats.update_statistics(110.0, 0.0);
        assert_eq!(stats.sharpe, 0.0);
    }

    #[test]
    fn sharpe_positive_when_avg_exceeds_risk_free_with_variance() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 100.0);
        stats.update_statistics(101.0, 0.0);
        stats.update_statistics(103.0, 0.0);
        stats.update_statistics(105.0, 0.0);
        assert!(stats.sharpe > 0.0);
    }

    #[test]
    fn buy_then_sell_records_realized_pnl_per_ticker() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 1_000_000.0);
        stats.record_trade(&TradeEvent::Buy { ticker: "TSLA".into(), qty: 50.0, price: 200.0 }, ts(1));
        stats.record_trade(&TradeEvent::Sell { ticker: "TSLA".into(), qty: 50.0, price: 210.0 }, ts(2));
        let ticker_stats = stats.ticker_stats("TSLA").unwrap();
        assert!((ticker_stats.realized_pnl - 500.0).abs() < 1e-9);
        assert_eq!(ticker_stats.wins, 1);
        assert_eq!(stats.total_trades, 2);
    }

    #[test]
    fn short_then_cover_records_realized_pnl() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 100_000.0);
        stats.record_trade(&TradeEvent::Short { ticker: "XYZ".into(), qty: 100.0, price: 50.0 }, ts(1));
        stats.record_trade(&TradeEvent::Cover { ticker: "XYZ".into(), qty: 100.0, price: 40.0 }, ts(2));
        let ticker_stats = stats.ticker_stats("XYZ").unwrap();
        assert!((ticker_stats.realized_pnl - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_performance_is_attributed_to_the_close_week() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 1_000.0);
        stats.record_trade(&TradeEvent::Buy { ticker: "A".into(), qty: 1.0, price: 10.0 }, ts(1));
        stats.record_trade(&TradeEvent::Sell { ticker: "A".into(), qty: 1.0, price: 12.0 }, ts(2));
        let week = week_start(ts(2));
        let weekly = stats.weekly_performance(week).unwrap();
        assert!((weekly.profit - 2.0).abs() < 1e-9);
        assert_eq!(weekly.total_sells, 1);
        assert!((weekly.profit_per_share - 2.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_profit_per_share_divides_by_cumulative_shares() {
        let mut stats = AlgorithmStatistics::new("algo", ts(1), 1_000.0);
        stats.record_trade(&TradeEvent::Buy { ticker: "A".into(), qty: 10.0, price: 10.0 }, ts(1));
        stats.record_trade(&TradeEvent::Sell { ticker: "A".into(), qty: 10.0, price: 12.0 }, ts(2));
        stats.record_trade(&TradeEvent::Buy { ticker: "B".into(), qty: 5.0, price: 20.0 }, ts(2));
        stats.record_trade(&TradeEvent::Sell { ticker: "B".into(), qty: 5.0, price: 22.0 }, ts(2));
        let week = week_start(ts(2));
        let weekly = stats.weekly_performance(week).unwrap();
        // (10*2) + (5*2) = 30 profit over 15 cumulative shares sold
        assert!((weekly.profit - 30.0).abs() < 1e-9);
        assert_eq!(weekly.total_sells, 2);
        assert!((weekly.profit_per_share - 2.0).abs() < 1e-9);
    }
}
