//! Scan the public endpoints once and simulate the best opportunity
//!
//! Needs network access but no credentials; the trade leg runs dry.

use spot_arbitrage::{
    config::BotConfig, service::ArbitrageService, trading::ExecutionOptions, utils::logger, Result,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init("info", "logs/dry_run_scan.log")?;

    let config = BotConfig::default();
    config.validate()?;
    info!("Using the default testnet configuration");

    let service = ArbitrageService::new(config).await?;

    let quotes = service.refresh_prices_once().await;
    println!("Collected {} quotes", quotes);
    for price in service.venue_prices().await {
        println!("  {} {} = {}", price.exchange, price.symbol, price.price);
    }

    let opportunities = service.detect_opportunities().await;
    println!("Detected {} opportunities", opportunities.len());

    let options = ExecutionOptions {
        dry_run: true,
        ..Default::default()
    };
    match service.execute_best(None, &options).await? {
        Some(result) if result.is_completed() => {
            println!(
                "Simulated trade {} with profit {:?}",
                result.trade_id(),
                result.profit()
            );
        }
        Some(result) => {
            println!("Simulation failed for trade {}", result.trade_id());
        }
        None => {
            println!("No spread wide enough to simulate right now");
        }
    }

    Ok(())
}
