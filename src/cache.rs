//! On-disk segmented cache of historical bars, one Parquet file per merged
//! `[start, end]` window per ticker.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use polars::prelude::*;

use crate::error::MarketDataError;
use crate::market_data::{HistoricalData, MarketDataPoint};

#[derive(Debug, Clone)]
struct CacheSegment {
    start: NaiveDate,
    end: NaiveDate,
    path: PathBuf,
}

/// Per-ticker sorted index of cached `[start, end]` windows. Overlapping or
/// adjacent segments are merged into one on write so the index never grows
/// unbounded across repeated `initialize` calls over shifting lookback
/// windows.
pub struct SegmentedCache {
    root: PathBuf,
    index: BTreeMap<String, BTreeMap<NaiveDate, CacheSegment>>,
}

impl SegmentedCache {
    /// Builds the cache rooted at `root`, rehydrating `index` from any
    /// `{ticker}/{start}_{end}.parquet` segment files a previous process
    /// already wrote there.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut cache = Self {
            root,
            index: BTreeMap::new(),
        };
        cache.scan_existing_segments();
        cache
    }

    fn scan_existing_segments(&mut self) {
        let Ok(ticker_dirs) = fs::read_dir(&self.root) else {
            return;
        };
        for ticker_entry in ticker_dirs.flatten() {
            let ticker_path = ticker_entry.path();
            if !ticker_path.is_dir() {
                continue;
            }
            let Some(ticker) = ticker_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(segment_files) = fs::read_dir(&ticker_path) else {
                continue;
            };
            for segment_entry in segment_files.flatten() {
                let path = segment_entry.path();
                let Some((start, end)) = parse_segment_filename(&path) else {
                    continue;
                };
                self.index
                    .entry(ticker.to_string())
                    .or_default()
                    .insert(start, CacheSegment { start, end, path });
            }
        }
    }

    fn ticker_dir(&self, ticker: &str) -> PathBuf {
        self.root.join(ticker)
    }

    /// Returns the path of a single segment already covering `[start, end]`
    /// in full, if one exists.
    pub fn find_covering(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Option<PathBuf> {
        let segments = self.index.get(ticker)?;
        segments
            .values()
            .find(|segment| segment.start <= start && segment.end >= end)
            .map(|segment| segment.path.clone())
    }

    pub fn load_segment(&self, path: &Path, ticker: &str) -> Result<HistoricalData, MarketDataError> {
        let file = fs::File::open(path).map_err(MarketDataError::Io)?;
        let df = ParquetReader::new(file).finish().map_err(|e| MarketDataError::CacheCorrupt {
            ticker: ticker.to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        dataframe_to_series(&df, ticker).map_err(|e| MarketDataError::CacheCorrupt {
            ticker: ticker.to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Writes `data` as a new segment covering `[start, end]`, merging it
    /// with any existing overlapping segments for this ticker first.
    pub fn write_segment(
        &mut self,
        ticker: &str,
        data: &HistoricalData,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), MarketDataError> {
        let dir = self.ticker_dir(ticker);
        fs::create_dir_all(&dir).map_err(MarketDataError::Io)?;

        let (merged_start, merged_end) = self.merge_range(ticker, start, end);
        let path = dir.join(format!("{merged_start}_{merged_end}.parquet"));

        let mut df = series_to_dataframe(data).map_err(|e| MarketDataError::CacheCorrupt {
            ticker: ticker.to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file = fs::File::create(&path).map_err(MarketDataError::Io)?;
        ParquetWriter::new(file).finish(&mut df).map_err(|e| MarketDataError::CacheCorrupt {
            ticker: ticker.to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let segments = self.index.entry(ticker.to_string()).or_default();
        segments.retain(|_, segment| !(segment.start <= merged_end && segment.end >= merged_start));
        segments.insert(merged_start, CacheSegment {
            start: merged_start,
            end: merged_end,
            path,
        });
        Ok(())
    }

    fn merge_range(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
        let Some(segments) = self.index.get(ticker) else {
            return (start, end);
        };
        let mut merged_start = start;
        let mut merged_end = end;
        for segment in segments.values() {
            if segment.start <= merged_end && segment.end >= merged_start {
                merged_start = merged_start.min(segment.start);
                merged_end = merged_end.max(segment.end);
            }
        }
        (merged_start, merged_end)
    }

    /// Deletes a segment's file after a corrupt read, per the
    /// self-healing cache-corruption policy.
    pub fn evict(&mut self, ticker: &str, path: &Path) {
        let _ = fs::remove_file(path);
        if let Some(segments) = self.index.get_mut(ticker) {
            segments.retain(|_, segment| segment.path != path);
        }
    }
}

/// Parses the `{start}_{end}.parquet` filename convention `write_segment`
/// writes. Returns `None` for anything that doesn't match, so a stray file
/// dropped in a ticker directory is silently skipped rather than rejected.
fn parse_segment_filename(path: &Path) -> Option<(NaiveDate, NaiveDate)> {
    if path.extension()?.to_str()? != "parquet" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (start, end) = stem.split_once('_')?;
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some((start, end))
}

fn series_to_dataframe(data: &HistoricalData) -> PolarsResult<DataFrame> {
    let mut timestamps = Vec::new();
    let mut opens = Vec::new();
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    let mut closes = Vec::new();
    let mut volumes = Vec::new();
    for (ts, bar) in data.iter() {
        timestamps.push(ts.timestamp_millis());
        opens.push(bar.open);
        highs.push(bar.high);
        lows.push(bar.low);
        closes.push(bar.close);
        volumes.push(bar.volume);
    }
    df! {
        "timestamp_ms" => timestamps,
        "open" => opens,
        "high" => highs,
        "low" => lows,
        "close" => closes,
        "volume" => volumes,
    }
}

fn dataframe_to_series(df: &DataFrame, ticker: &str) -> PolarsResult<HistoricalData> {
    let timestamps = df.column("timestamp_ms")?.i64()?;
    let opens = df.column("open")?.f64()?;
    let highs = df.column("high")?.f64()?;
    let lows = df.column("low")?.f64()?;
    let closes = df.column("close")?.f64()?;
    let volumes = df.column("volume")?.f64()?;

    let mut series = HistoricalData::new(ticker);
    for i in 0..df.height() {
        let (Some(ms), Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            timestamps.get(i),
            opens.get(i),
            highs.get(i),
            lows.get(i),
            closes.get(i),
            volumes.get(i),
        ) else {
            continue;
        };
        let ts: DateTime<Utc> = Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
        if let Ok(bar) = MarketDataPoint::new(ticker, open, high, low, close, volume) {
            series.insert(ticker, ts, bar);
        }
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_data(ticker: &str) -> HistoricalData {
        let mut data = HistoricalData::new(ticker);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        data.insert(ticker, t0, MarketDataPoint::new(ticker, 100.0, 101.0, 99.0, 100.5, 1000.0).unwrap());
        data
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut cache = SegmentedCache::new(dir.path());
        let data = sample_data("AAPL");
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        cache.write_segment("AAPL", &data, start, end).unwrap();

        let path = cache.find_covering("AAPL", start, end).unwrap();
        let loaded = cache.load_segment(&path, "AAPL").unwrap();
        assert_eq!(loaded.len(), data.len());
    }

    #[test]
    fn overlapping_segments_merge_on_write() {
        let dir = tempdir().unwrap();
        let mut cache = SegmentedCache::new(dir.path());
        let data = sample_data("AAPL");
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let jan3 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let jan10 = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

        cache.write_segment("AAPL", &data, jan1, jan5).unwrap();
        cache.write_segment("AAPL", &data, jan3, jan10).unwrap();

        let covering = cache.find_covering("AAPL", jan1, jan10);
        assert!(covering.is_some());
        assert_eq!(cache.index.get("AAPL").unwrap().len(), 1);
    }

    #[test]
    fn missing_window_is_not_covered() {
        let dir = tempdir().unwrap();
        let cache = SegmentedCache::new(dir.path());
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(cache.find_covering("AAPL", jan1, jan1).is_none());
    }

    #[test]
    fn new_rehydrates_index_from_disk() {
        let dir = tempdir().unwrap();
        let data = sample_data("AAPL");
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        {
            let mut cache = SegmentedCache::new(dir.path());
            cache.write_segment("AAPL", &data, jan1, jan5).unwrap();
        }

        let reopened = SegmentedCache::new(dir.path());
        let path = reopened.find_covering("AAPL", jan1, jan5);
        assert!(path.is_some());
        let loaded = reopened.load_segment(&path.unwrap(), "AAPL").unwrap();
        assert_eq!(loaded.len(), data.len());
    }
}
