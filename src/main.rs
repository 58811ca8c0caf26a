use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use spot_arbitrage::{
    config::BotConfig,
    history::TradeStatus,
    market::VenuePrice,
    service::ArbitrageService,
    strategy::Opportunity,
    trading::{ExecutionOptions, TradeResult},
    utils::{init_metrics, logger},
    Result, Symbol, TradingMode,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "spot-arb")]
#[command(about = "Cross-exchange spot arbitrage engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/spot-arb.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/spot-arb.log")]
    log_file: PathBuf,

    /// Trading mode override (testnet or live)
    #[arg(short, long)]
    mode: Option<TradingMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the configured exchanges for opportunities
    Scan {
        /// Keep scanning on live feeds instead of a single pass
        #[arg(long)]
        watch: bool,

        /// Seconds between detection cycles in watch mode
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Execute the best current opportunity
    Trade {
        /// Restrict to one symbol (e.g. BTC/USDT)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Simulate both legs without placing orders
        #[arg(long)]
        dry_run: bool,

        /// Capital override in quote currency
        #[arg(long)]
        capital: Option<Decimal>,

        /// Account the trade is recorded under
        #[arg(long)]
        user: Option<String>,
    },
    /// Show trade statistics and recent history
    Stats,
    /// Validate configuration and exchange setup
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;
    info!(
        "Starting {} v{}",
        spot_arbitrage::APP_NAME,
        spot_arbitrage::VERSION
    );

    let mut config = BotConfig::from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config.display());

    if let Some(mode) = cli.mode {
        config.trading_mode = mode;
    }

    if config.monitoring.enable_metrics {
        init_metrics(&config.monitoring.metrics_listen)?;
        info!(
            "Metrics exporter listening on {}",
            config.monitoring.metrics_listen
        );
    }

    match cli.command {
        Commands::Scan {
            watch,
            interval_secs,
        } => run_scan(config, watch, interval_secs).await,
        Commands::Trade {
            symbol,
            dry_run,
            capital,
            user,
        } => run_trade(config, symbol, dry_run, capital, user).await,
        Commands::Stats => show_stats(config).await,
        Commands::Validate => validate_config(config).await,
    }
}

async fn run_scan(config: BotConfig, watch: bool, interval_secs: u64) -> Result<()> {
    let service = ArbitrageService::new(config).await?;

    if !watch {
        let quotes = service.refresh_prices_once().await;
        info!("Collected {} quotes", quotes);
        print_prices(&service.venue_prices().await);
        print_opportunities(&service.detect_opportunities().await);
        return Ok(());
    }

    service.start_feeds().await;
    info!("Watching for opportunities, Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let opportunities = service.detect_opportunities().await;
                if !opportunities.is_empty() {
                    print_opportunities(&opportunities);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    service.stop_feeds().await;
    Ok(())
}

async fn run_trade(
    config: BotConfig,
    symbol: Option<String>,
    dry_run: bool,
    capital: Option<Decimal>,
    user: Option<String>,
) -> Result<()> {
    let service = ArbitrageService::new(config).await?;
    let symbol = symbol.map(|s| s.parse::<Symbol>()).transpose()?;

    let quotes = service.refresh_prices_once().await;
    info!("Collected {} quotes", quotes);

    let options = ExecutionOptions {
        user_id: user,
        capital_amount: capital,
        dry_run,
    };

    match service.execute_best(symbol.as_ref(), &options).await? {
        Some(TradeResult::Completed {
            trade_id,
            actual_profit,
            actual_profit_percent,
            execution_time_ms,
            ..
        }) => {
            println!(
                "Trade {} completed: profit {} ({}%) in {} ms",
                trade_id,
                actual_profit,
                actual_profit_percent.round_dp(4),
                execution_time_ms
            );
        }
        Some(TradeResult::Failed {
            trade_id,
            kind,
            message,
            ..
        }) => {
            error!("Trade {} failed ({}): {}", trade_id, kind, message);
            println!("Trade {} failed ({}): {}", trade_id, kind, message);
        }
        None => println!("No opportunity above the configured threshold"),
    }

    Ok(())
}

async fn show_stats(config: BotConfig) -> Result<()> {
    let service = ArbitrageService::new(config).await?;
    let mode = service.trading_mode().await;

    let history = service.trade_history().await?;
    if history.is_empty() {
        println!("No trade history recorded ({} mode)", mode);
        return Ok(());
    }

    let attempts = history
        .iter()
        .filter(|r| r.status != TradeStatus::Pending)
        .count();
    let completed = history
        .iter()
        .filter(|r| r.status == TradeStatus::Completed)
        .count();
    let profit: Decimal = history.iter().filter_map(|r| r.actual_profit).sum();

    println!("Trading statistics ({} mode):", mode);
    println!("  Trades attempted: {}", attempts);
    println!("  Trades completed: {}", completed);
    println!("  Realized profit:  {}", profit);

    println!("Recent trades:");
    for record in history.iter().rev().take(10) {
        println!(
            "  {}  {}  {}  {} -> {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.trade_id,
            record.symbol,
            record.buy_exchange,
            record.sell_exchange,
            record.status
        );
    }

    Ok(())
}

async fn validate_config(config: BotConfig) -> Result<()> {
    info!("Validating configuration...");

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e);
    }

    // Building the service exercises adapter construction and symbol maps
    let service = ArbitrageService::new(config).await?;

    println!("Configuration is valid ({} mode)", service.trading_mode().await);
    println!("Exchanges:");
    for capability in service.capabilities().await {
        println!(
            "  {:<8} fee {}  {}  {}",
            capability.exchange.to_string(),
            capability.fee_fraction,
            if capability.trading_enabled {
                "trading enabled"
            } else {
                "trading disabled (no credentials)"
            },
            if capability.testnet { "testnet" } else { "live" }
        );
    }
    println!("Symbols:");
    for symbol in service.symbols() {
        println!("  {}", symbol);
    }

    Ok(())
}

fn print_prices(prices: &[VenuePrice]) {
    if prices.is_empty() {
        println!("No prices collected");
        return;
    }
    println!("Prices ({}):", prices.len());
    for price in prices {
        println!(
            "  {:<10} {:<8} {:>16}  ({} ms old)",
            price.symbol.to_string(),
            price.exchange.to_string(),
            price.price.to_string(),
            price.age_ms
        );
    }
}

fn print_opportunities(opportunities: &[Opportunity]) {
    if opportunities.is_empty() {
        println!("No opportunities above the configured threshold");
        return;
    }
    println!("Opportunities ({}):", opportunities.len());
    for o in opportunities {
        println!(
            "  {}  buy {} @ {} -> sell {} @ {}  net {}%  qty {}",
            o.symbol,
            o.buy_exchange,
            o.buy_price,
            o.sell_exchange,
            o.sell_price,
            (o.net_profit_fraction * Decimal::ONE_HUNDRED).round_dp(4),
            o.quantity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }
}
