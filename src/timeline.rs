//! Merges per-ticker bar series into a single time-ordered replay stream.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::market_data::HistoricalData;

/// A total order over minute-truncated timestamps, each mapping to whatever
/// tickers actually traded in that minute (a ticker may be absent at any
/// given timestamp).
pub struct Timeline {
    ticks: BTreeMap<DateTime<Utc>, Vec<(String, crate::market_data::MarketDataPoint)>>,
}

impl Timeline {
    /// Builds the merged timeline from one `HistoricalData` series per
    /// ticker. Ties within a ticker at the same minute can't occur (a
    /// series is keyed by minute already); across tickers the per-minute
    /// tuple list is sorted by ticker for a deterministic iteration order.
    pub fn build(series: &[HistoricalData]) -> Result<Self, EngineError> {
        let mut ticks: BTreeMap<DateTime<Utc>, Vec<(String, crate::market_data::MarketDataPoint)>> =
            BTreeMap::new();
        for s in series {
            for (ts, bar) in s.iter() {
                ticks.entry(*ts).or_default().push((s.ticker().to_string(), *bar));
            }
        }
        for bars in ticks.values_mut() {
            bars.sort_by(|a, b| a.0.cmp(&b.0));
        }
        if ticks.is_empty() {
            return Err(EngineError::EmptyTimeline);
        }
        Ok(Self { ticks })
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ticks.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ticks.keys().next_back().copied()
    }

    /// Iterate timestamps in ascending order with each tick's ticker→bar
    /// pairs, ticker-sorted.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&DateTime<Utc>, &Vec<(String, crate::market_data::MarketDataPoint)>)> {
        self.ticks.iter()
    }

    pub fn bars_at(&self, ts: &DateTime<Utc>) -> Option<&[(String, crate::market_data::MarketDataPoint)]> {
        self.ticks.get(ts).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MarketDataPoint;
    use chrono::TimeZone;

    fn bar(close: f64) -> MarketDataPoint {
        MarketDataPoint::new("X", close, close, close, close, 1.0).unwrap()
    }

    #[test]
    fn empty_input_is_fatal() {
        let result = Timeline::build(&[]);
        assert!(matches!(result, Err(EngineError::EmptyTimeline)));
    }

    #[test]
    fn merges_multiple_tickers_per_minute() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let mut a = HistoricalData::new("AAPL");
        a.insert("AAPL", t0, bar(100.0));
        let mut b = HistoricalData::new("MSFT");
        b.insert("MSFT", t0, bar(200.0));

        let timeline = Timeline::build(&[a, b]).unwrap();
        assert_eq!(timeline.len(), 1);
        let bars = timeline.bars_at(&t0).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].0, "AAPL");
        assert_eq!(bars[1].0, "MSFT");
    }

    #[test]
    fn a_ticker_may_be_absent_at_a_given_minute() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 31, 0).unwrap();
        let mut a = HistoricalData::new("AAPL");
        a.insert("AAPL", t0, bar(100.0));
        a.insert("AAPL", t1, bar(101.0));
        let mut b = HistoricalData::new("MSFT");
        b.insert("MSFT", t0, bar(200.0));

        let timeline = Timeline::build(&[a, b]).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.bars_at(&t0).unwrap().len(), 2);
        assert_eq!(timeline.bars_at(&t1).unwrap().len(), 1);
    }

    #[test]
    fn timestamps_are_strictly_ascending() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 31, 0).unwrap();
        let mut a = HistoricalData::new("AAPL");
        a.insert("AAPL", t1, bar(101.0));
        a.insert("AAPL", t0, bar(100.0));

        let timeline = Timeline::build(&[a]).unwrap();
        let timestamps: Vec<_> = timeline.iter().map(|(ts, _)| *ts).collect();
        assert_eq!(timestamps, vec![t0, t1]);
    }
}
