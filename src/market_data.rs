//! Immutable price bars and the per-ticker time-indexed series that holds them.

use std::collections::BTreeMap;
use std::ops::Bound::Included;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;

/// One minute of OHLCV activity for a single ticker.
///
/// Construction is validated: `new` is the only way to build one outside
/// this module, and it enforces `low <= open,close <= high`, non-negative
/// finite volume, and finite prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPoint {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketDataPoint {
    pub fn new(
        ticker: &str,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, MarketDataError> {
        let bar = Self {
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate(ticker)?;
        Ok(bar)
    }

    fn validate(&self, ticker: &str) -> Result<(), MarketDataError> {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(MarketDataError::InvalidBar {
                ticker: ticker.to_string(),
                reason: "non-finite price or volume".into(),
            });
        }
        if self.volume < 0.0 {
            return Err(MarketDataError::InvalidBar {
                ticker: ticker.to_string(),
                reason: format!("negative volume {}", self.volume),
            });
        }
        if self.low > self.open || self.low > self.close || self.low > self.high {
            return Err(MarketDataError::InvalidBar {
                ticker: ticker.to_string(),
                reason: format!(
                    "low {} exceeds open/close/high ({}, {}, {})",
                    self.low, self.open, self.close, self.high
                ),
            });
        }
        if self.open > self.high || self.close > self.high {
            return Err(MarketDataError::InvalidBar {
                ticker: ticker.to_string(),
                reason: format!(
                    "open/close ({}, {}) exceeds high {}",
                    self.open, self.close, self.high
                ),
            });
        }
        Ok(())
    }
}

/// A time-indexed series of bars for exactly one ticker.
///
/// Timestamps are truncated to the minute on insertion so lookups never
/// have to worry about sub-minute jitter in feed timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalData {
    ticker: String,
    bars: BTreeMap<DateTime<Utc>, MarketDataPoint>,
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - chrono::Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
        - chrono::Duration::seconds(i64::from(ts.second()))
}

impl HistoricalData {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            bars: BTreeMap::new(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Insert a bar for this series' ticker. Fails (returns `false`) on a
    /// ticker mismatch rather than panicking — insertion from a multi-ticker
    /// provider response is expected to filter per-ticker upstream, but a
    /// caller programming error here should not poison the series.
    pub fn insert(&mut self, ticker: &str, ts: DateTime<Utc>, bar: MarketDataPoint) -> bool {
        if ticker != self.ticker {
            return false;
        }
        self.bars.insert(truncate_to_minute(ts), bar);
        true
    }

    pub fn get(&self, ts: DateTime<Utc>) -> Option<&MarketDataPoint> {
        self.bars.get(&truncate_to_minute(ts))
    }

    /// Inclusive range query `[start, end]`.
    pub fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = (&DateTime<Utc>, &MarketDataPoint)> {
        self.bars
            .range((Included(truncate_to_minute(start)), Included(truncate_to_minute(end))))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DateTime<Utc>, &MarketDataPoint)> {
        self.bars.iter()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.keys().next_back().copied()
    }

    /// Floor-indexed lookup: the bar at or immediately before `ts`.
    fn floor(&self, ts: DateTime<Utc>) -> Option<(&DateTime<Utc>, &MarketDataPoint)> {
        self.bars
            .range((std::ops::Bound::Unbounded, Included(truncate_to_minute(ts))))
            .next_back()
    }

    /// Percentage change in close price between the bars floor-indexed at
    /// `from` and `to`. Returns `None` if either side has no data at or
    /// before the requested timestamp.
    pub fn percent_change(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<f64> {
        let (_, from_bar) = self.floor(from)?;
        let (_, to_bar) = self.floor(to)?;
        if from_bar.close == 0.0 {
            return None;
        }
        Some((to_bar.close - from_bar.close) / from_bar.close * 100.0)
    }
}

/// Exchange session definition: timezone plus regular-hours open/close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct MarketConfig {
    #[garde(skip)]
    pub zone_id: Tz,
    #[garde(range(min = 0, max = 23))]
    pub open_hour: u32,
    #[garde(range(min = 0, max = 59))]
    pub open_minute: u32,
    #[garde(range(min = 0, max = 23))]
    pub close_hour: u32,
    #[garde(range(min = 0, max = 59))]
    pub close_minute: u32,
}

impl MarketConfig {
    pub const fn new(zone_id: Tz, open_hour: u32, open_minute: u32, close_hour: u32, close_minute: u32) -> Self {
        Self {
            zone_id,
            open_hour,
            open_minute,
            close_hour,
            close_minute,
        }
    }

    pub fn nyse() -> Self {
        Self::new(chrono_tz::America::New_York, 9, 30, 16, 0)
    }

    pub fn lse() -> Self {
        Self::new(chrono_tz::Europe::London, 8, 0, 16, 30)
    }

    pub fn tse() -> Self {
        Self::new(chrono_tz::Asia::Tokyo, 9, 0, 15, 30)
    }

    /// True if `ts` falls within `[open, close]` (both inclusive) in this
    /// session's local timezone, on a weekday. `run_on_market_closed`
    /// widens admission to any weekday time, still excluding weekends —
    /// see DESIGN.md for why the name doesn't imply "skip session bounds
    /// only", it means exactly that.
    pub fn admits(&self, ts: DateTime<Utc>, run_on_market_closed: bool) -> bool {
        use chrono::Weekday;
        let local = ts.with_timezone(&self.zone_id);
        let weekday = local.date_naive().weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if run_on_market_closed {
            return true;
        }
        let minutes_of_day = local.hour() * 60 + local.minute();
        let open = self.open_hour * 60 + self.open_minute;
        let close = self.close_hour * 60 + self.close_minute;
        minutes_of_day >= open && minutes_of_day <= close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bar_rejects_low_above_open() {
        let res = MarketDataPoint::new("AAPL", 100.0, 110.0, 105.0, 100.0, 1000.0);
        assert!(res.is_err());
    }

    #[test]
    fn bar_rejects_negative_volume() {
        let res = MarketDataPoint::new("AAPL", 100.0, 110.0, 95.0, 100.0, -1.0);
        assert!(res.is_err());
    }

    #[test]
    fn bar_accepts_sane_ohlcv() {
        let res = MarketDataPoint::new("AAPL", 100.0, 110.0, 95.0, 105.0, 1000.0);
        assert!(res.is_ok());
    }

    #[test]
    fn insert_truncates_to_minute() {
        let mut hd = HistoricalData::new("AAPL");
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 45).unwrap();
        let bar = MarketDataPoint::new("AAPL", 1.0, 1.0, 1.0, 1.0, 0.0).unwrap();
        assert!(hd.insert("AAPL", ts, bar));
        let floor_minute = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        assert!(hd.get(floor_minute).is_some());
    }

    #[test]
    fn insert_rejects_ticker_mismatch() {
        let mut hd = HistoricalData::new("AAPL");
        let bar = MarketDataPoint::new("MSFT", 1.0, 1.0, 1.0, 1.0, 0.0).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        assert!(!hd.insert("MSFT", ts, bar));
    }

    #[test]
    fn percent_change_between_bars() {
        let mut hd = HistoricalData::new("AAPL");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        hd.insert("AAPL", t0, MarketDataPoint::new("AAPL", 100.0, 100.0, 100.0, 100.0, 0.0).unwrap());
        hd.insert("AAPL", t1, MarketDataPoint::new("AAPL", 110.0, 110.0, 110.0, 110.0, 0.0).unwrap());
        let change = hd.percent_change(t0, t1).unwrap();
        assert!((change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn market_config_excludes_weekend() {
        let cfg = MarketConfig::nyse();
        // Saturday 2024-01-06 is a weekend
        let ts = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 1, 6, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(!cfg.admits(ts, false));
        assert!(!cfg.admits(ts, true));
    }

    #[test]
    fn market_config_includes_close_boundary() {
        let cfg = MarketConfig::nyse();
        let ts = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 1, 2, 16, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(cfg.admits(ts, false));
    }

    #[test]
    fn market_config_excludes_after_hours_unless_flagged() {
        let cfg = MarketConfig::nyse();
        let ts = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 1, 2, 8, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(!cfg.admits(ts, false));
        assert!(cfg.admits(ts, true));
    }

    #[test]
    fn market_config_rejects_out_of_range_hours() {
        let cfg = MarketConfig::new(chrono_tz::America::New_York, 24, 0, 16, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn market_config_presets_validate() {
        assert!(MarketConfig::nyse().validate().is_ok());
        assert!(MarketConfig::lse().validate().is_ok());
        assert!(MarketConfig::tse().validate().is_ok());
    }
}
