use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use minutebar_backtest::{
    BacktestConfigBuilder, BacktestEngine, HistoricalMarketService, MarketConfig, Portfolio, SyntheticProvider,
};
use tracing_subscriber::EnvFilter;

struct BuyAndHoldDemo {
    ticker: String,
    target_shares: f64,
}

impl minutebar_backtest::Algorithm for BuyAndHoldDemo {
    fn on_update(
        &mut self,
        current_data: &std::collections::HashMap<String, minutebar_backtest::MarketDataPoint>,
        timestamp: chrono::DateTime<Utc>,
        portfolio: &mut Portfolio,
    ) {
        if portfolio.long_position(&self.ticker).is_some() {
            return;
        }
        if let Some(bar) = current_data.get(&self.ticker) {
            let _ = portfolio.buy_stock(&self.ticker, self.target_shares, bar.close, timestamp);
        }
    }

    fn algorithm_id(&self) -> String {
        "buy_and_hold_demo".to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cache_dir = std::env::var("CACHE_DIR").unwrap_or_else(|_| "./cache".to_string());
    let ticker = std::env::var("TICKER").unwrap_or_else(|_| "TSLA".to_string());

    let provider = Arc::new(SyntheticProvider::new(42));
    let service = Arc::new(HistoricalMarketService::new(Arc::clone(&provider) as _, &cache_dir, 3));

    let config = BacktestConfigBuilder::new()
        .stocks([ticker.clone()])
        .previous_days(5)
        .interval_minutes(1)
        .market_config(MarketConfig::nyse())
        .auto_liquidate_on_finish(true)
        .provider(provider)
        .add_strategy(minutebar_backtest::Registration::new(
            Box::new(BuyAndHoldDemo {
                ticker,
                target_shares: 50.0,
            }),
            1_000_000.0,
        ))
        .build()
        .context("invalid backtest configuration")?;

    let engine = BacktestEngine::new(Arc::clone(&service), config);
    let results = engine.run(Utc::now()).await.context("backtest run failed")?;

    println!("{results}");

    service.close(Duration::from_secs(30)).await;
    Ok(())
}
