//! The replay loop: walks the timeline, invokes strategies, detects
//! trades, updates statistics, and (optionally) auto-liquidates at the end.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, info_span};

use crate::config::Config;
use crate::error::EngineError;
use crate::historical_service::HistoricalMarketService;
use crate::market_data::MarketDataPoint;
use crate::portfolio::Portfolio;
use crate::statistics::AlgorithmStatistics;
use crate::strategy::Algorithm;
use crate::timeline::Timeline;
use crate::trade_detector::{detect_trades, PositionSnapshot};

pub struct BacktestResults {
    pub statistics: HashMap<String, AlgorithmStatistics>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub portfolios: HashMap<String, Portfolio>,
}

impl std::fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backtest {} -> {}", self.start_time, self.end_time)?;
        let mut ids: Vec<&String> = self.statistics.keys().collect();
        ids.sort();
        for id in ids {
            let stats = &self.statistics[id];
            writeln!(
                f,
                "  {id}: profit={:.2} maxDrawdown={:.2}% sharpe={:.3} trades={}",
                stats.total_profit, stats.max_drawdown, stats.sharpe, stats.total_trades
            )?;
        }
        Ok(())
    }
}

struct Runner {
    algorithm: Box<dyn Algorithm>,
    portfolio: Portfolio,
    statistics: AlgorithmStatistics,
}

pub struct BacktestEngine {
    service: Arc<HistoricalMarketService>,
    config: Config,
}

fn snapshot_longs(portfolio: &Portfolio) -> PositionSnapshot {
    portfolio
        .longs()
        .iter()
        .map(|(ticker, pos)| (ticker.clone(), (pos.quantity, pos.average_cost())))
        .collect()
}

fn snapshot_shorts(portfolio: &Portfolio) -> PositionSnapshot {
    portfolio
        .shorts()
        .iter()
        .map(|(ticker, short)| (ticker.clone(), (short.quantity, short.entry_price)))
        .collect()
}

fn close_map(bars: &[(String, MarketDataPoint)]) -> HashMap<String, f64> {
    bars.iter().map(|(ticker, bar)| (ticker.clone(), bar.close)).collect()
}

fn bar_map(bars: &[(String, MarketDataPoint)]) -> HashMap<String, MarketDataPoint> {
    bars.iter().map(|(ticker, bar)| (ticker.clone(), *bar)).collect()
}

impl BacktestEngine {
    pub fn new(service: Arc<HistoricalMarketService>, config: Config) -> Self {
        Self { service, config }
    }

    /// Runs one full backtest: builds the timeline, walks it tick by tick,
    /// and returns every registered strategy's final portfolio and
    /// statistics. `now` anchors the lookback window and is the only clock
    /// input — everything downstream is deterministic given cached data.
    pub async fn run(self, now: DateTime<Utc>) -> Result<BacktestResults, EngineError> {
        let BacktestEngine { service, config } = self;

        if config.strategies.is_empty() {
            return Err(EngineError::NoStrategies);
        }

        service
            .initialize(&config.stocks, i64::from(config.previous_days), config.market_config, now)
            .await?;

        let start = now - Duration::days(i64::from(config.previous_days));
        let per_ticker = service.fetch_historical_data(&config.stocks, start, now)?;
        let series: Vec<_> = per_ticker.into_values().collect();
        let timeline = Timeline::build(&series)?;

        let mut runners: Vec<Runner> = Vec::with_capacity(config.strategies.len());
        for registration in config.strategies {
            let id = registration.algorithm.algorithm_id();
            runners.push(Runner {
                algorithm: registration.algorithm,
                portfolio: Portfolio::new(registration.initial_capital),
                statistics: AlgorithmStatistics::new(id, timeline.first_timestamp().expect("non-empty timeline"), registration.initial_capital),
            });
        }

        let first_bars = timeline.bars_at(&timeline.first_timestamp().expect("non-empty timeline")).unwrap_or(&[]);
        let opening = bar_map(first_bars);
        for runner in &mut runners {
            runner.algorithm.on_market_open(&opening);
        }

        let interval = Duration::minutes(i64::from(config.interval_minutes.max(1)));
        let mut last_processed: Option<DateTime<Utc>> = None;
        let mut last_processed_bars: Vec<(String, MarketDataPoint)> = Vec::new();

        for (ts, bars) in timeline.iter() {
            if !config.market_config.admits(*ts, config.run_on_market_closed) {
                continue;
            }
            let should_process = last_processed.map_or(true, |lp| *ts - lp >= interval);
            if !should_process {
                continue;
            }

            let span = info_span!("tick", timestamp = %ts);
            let _entered = span.enter();

            let current_data = bar_map(bars);
            let prices = close_map(bars);

            for runner in &mut runners {
                let pre_longs = snapshot_longs(&runner.portfolio);
                let pre_shorts = snapshot_shorts(&runner.portfolio);

                runner.algorithm.on_update(&current_data, *ts, &mut runner.portfolio);

                let post_longs = snapshot_longs(&runner.portfolio);
                let post_shorts = snapshot_shorts(&runner.portfolio);
                let events = detect_trades(&pre_longs, &post_longs, &pre_shorts, &post_shorts, &prices);
                for event in &events {
                    runner.statistics.record_trade(event, *ts);
                }

                if let Ok(value) = runner.portfolio.total_value(&prices, *ts) {
                    runner.statistics.update_statistics(value, 0.0);
                }
            }

            last_processed = Some(*ts);
            last_processed_bars = bars.clone();
        }

        if config.auto_liquidate_on_finish {
            if let Some(last_ts) = last_processed {
                let prices = close_map(&last_processed_bars);
                for runner in &mut runners {
                    liquidate(runner, &prices, last_ts);
                }
            }
        }

        let closing = bar_map(&last_processed_bars);
        for runner in &mut runners {
            runner.algorithm.on_market_close(&closing);
        }

        let last_ts = timeline.last_timestamp().expect("non-empty timeline");

        info!(ticks = timeline.len(), strategies = runners.len(), "backtest complete");

        let mut statistics = HashMap::new();
        let mut portfolios = HashMap::new();
        for runner in runners {
            let id = runner.statistics.algorithm_id.clone();
            statistics.insert(id.clone(), runner.statistics);
            portfolios.insert(id, runner.portfolio);
        }

        Ok(BacktestResults {
            statistics,
            start_time: timeline.first_timestamp().expect("non-empty timeline"),
            end_time: last_ts,
            portfolios,
        })
    }
}

/// Sells every long position and covers every short at `prices`, recording
/// the liquidation as ordinary detected trades against `portfolioValueBefore`
/// of this block.
fn liquidate(runner: &mut Runner, prices: &HashMap<String, f64>, timestamp: DateTime<Utc>) {
    let pre_longs = snapshot_longs(&runner.portfolio);
    let pre_shorts = snapshot_shorts(&runner.portfolio);

    let long_tickers: Vec<String> = runner.portfolio.longs().keys().cloned().collect();
    for ticker in long_tickers {
        let Some(price) = prices.get(&ticker).copied() else { continue };
        let qty = runner.portfolio.long_position(&ticker).map(|p| p.quantity).unwrap_or(0.0);
        if qty > 0.0 {
            let _ = runner.portfolio.sell_stock(&ticker, qty, price, timestamp);
        }
    }

    let short_tickers: Vec<String> = runner.portfolio.shorts().keys().cloned().collect();
    for ticker in short_tickers {
        let Some(price) = prices.get(&ticker).copied() else { continue };
        let qty = runner.portfolio.short_position(&ticker).map(|s| s.quantity).unwrap_or(0.0);
        if qty > 0.0 {
            let _ = runner.portfolio.cover_short(&ticker, qty, price, timestamp);
        }
    }

    let post_longs = snapshot_longs(&runner.portfolio);
    let post_shorts = snapshot_shorts(&runner.portfolio);
    let events = detect_trades(&pre_longs, &post_longs, &pre_shorts, &post_shorts, prices);
    for event in &events {
        runner.statistics.record_trade(event, timestamp);
    }
    if let Ok(value) = runner.portfolio.total_value(prices, timestamp) {
        runner.statistics.update_statistics(value, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BacktestConfigBuilder;
    use crate::provider::SyntheticProvider;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct BuyAndHold {
        bought: Mutex<bool>,
    }

    impl Algorithm for BuyAndHold {
        fn on_update(
            &mut self,
            current_data: &HashMap<String, MarketDataPoint>,
            _timestamp: DateTime<Utc>,
            portfolio: &mut Portfolio,
        ) {
            let mut bought = self.bought.lock().unwrap();
            if !*bought {
                if let Some(bar) = current_data.get("TSLA") {
                    if portfolio.buy_stock("TSLA", 50.0, bar.close, Utc::now()).is_ok() {
                        *bought = true;
                    }
                }
            }
        }

        fn algorithm_id(&self) -> String {
            "buy_and_hold".into()
        }
    }

    #[tokio::test]
    async fn auto_liquidation_leaves_no_open_positions() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SyntheticProvider::new(9));
        let service = Arc::new(HistoricalMarketService::new(provider, dir.path(), 3));
        let config = BacktestConfigBuilder::new()
            .stocks(["TSLA"])
            .previous_days(1)
            .interval_minutes(1)
            .auto_liquidate_on_finish(true)
            .provider(Arc::new(SyntheticProvider::new(9)))
            .add_strategy(crate::strategy::Registration::new(
                Box::new(BuyAndHold { bought: Mutex::new(false) }),
                1_000_000.0,
            ))
            .build()
            .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 15, 59, 0).unwrap();

        let engine = BacktestEngine::new(service, config);
        let results = engine.run(now).await.unwrap();

        let portfolio = &results.portfolios["buy_and_hold"];
        assert!(portfolio.longs().values().all(|p| p.quantity == 0.0));
        assert!(portfolio.shorts().values().all(|s| s.quantity == 0.0));
    }

    #[tokio::test]
    async fn no_strategies_is_rejected_by_config_before_engine_runs() {
        let result = BacktestConfigBuilder::new()
            .stocks(["TSLA"])
            .previous_days(1)
            .interval_minutes(1)
            .provider(Arc::new(SyntheticProvider::new(1)))
            .build();
        assert!(result.is_err());
    }
}
