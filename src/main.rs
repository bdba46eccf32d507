use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use configuration::{Config, ConfigArgs, load_config_from};
use core_types::{Order, OrderBook, OrderParams, OrderSide, Priority};
use engine::{EngineError, ExecutionReport, LimitOrderMatcher, OrderManager, OrderStats};
use events::EngineEvent;
use executor::{
    EstimationParams, InMemoryBalanceStore, PortfolioSummary, PriceSource, SimulatedExecutor,
    StaticPriceSource, generate_order_book,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The main entry point for the orderflow simulator.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load ORDERFLOW__* overrides from a .env file, if there is one.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_dir);

    let config = load_config_from(&cli.config.config)
        .with_context(|| format!("loading {}", cli.config.config.display()))?;
    tracing::info!(
        path = %cli.config.config.display(),
        quote_asset = %config.engine.quote_asset,
        assets = config.market.prices.len(),
        "Configuration loaded."
    );

    match cli.command {
        Commands::Book(args) => handle_book(args, &config),
        Commands::Demo(args) => handle_demo(args, config).await,
    }
}

/// Console output plus a daily-rolling log file. The returned guard flushes the
/// file writer on drop and must live as long as the program.
fn init_logging(log_dir: &str) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(log_dir, "orderflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    guard
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// An in-memory order execution and portfolio ledger simulator.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Directory for the daily-rolling log file.
    #[arg(long, default_value = "logs")]
    log_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the synthetic order book generated for an asset.
    Book(BookArgs),
    /// Run a scripted trading session against the simulated exchange.
    Demo(DemoArgs),
}

#[derive(Parser)]
struct BookArgs {
    /// The asset to generate a book for (e.g., "ETH").
    #[arg(long)]
    asset: String,

    /// Override the configured number of levels per side.
    #[arg(long)]
    levels: Option<usize>,

    /// Also estimate the cost of buying and selling this quantity.
    #[arg(long)]
    amount: Option<Decimal>,
}

#[derive(Parser)]
struct DemoArgs {
    /// The asset to trade.
    #[arg(long, default_value = "ETH")]
    asset: String,

    /// Print every engine event as JSON at the end of the session.
    #[arg(long)]
    events: bool,
}

// ==============================================================================
// Book Command
// ==============================================================================

fn handle_book(args: BookArgs, config: &Config) -> anyhow::Result<()> {
    let price = *config
        .market
        .prices
        .get(&args.asset)
        .with_context(|| format!("no reference price configured for {}", args.asset))?;
    let mut settings = config.order_book.clone();
    if let Some(levels) = args.levels {
        settings.levels = levels;
    }

    let book = generate_order_book(&args.asset, price, &settings, Utc::now())?;
    println!("{}", book_table(&book));
    if let (Some(mid), Some(spread)) = (book.mid_price(), book.spread()) {
        println!("mid {mid}  spread {spread}");
    }

    if let Some(amount) = args.amount {
        let executor = SimulatedExecutor::new(config.engine.taker_fee_pct, config.estimation.clone());
        let params = EstimationParams {
            participant_count: config.engine.participant_count,
            priority: Priority::Medium,
        };
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "Side", "Fillable", "Avg Price", "Notional", "Fees", "Gas", "Total", "Impact %", "Slippage %",
        ]);
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let e = executor.estimate_execution_cost(side, amount, &book, &params);
            table.add_row(vec![
                side.to_string(),
                e.fillable_amount.to_string(),
                e.average_price.round_dp(4).to_string(),
                e.notional.round_dp(2).to_string(),
                e.fees.round_dp(2).to_string(),
                e.estimated_gas.to_string(),
                e.total_cost.round_dp(2).to_string(),
                e.price_impact.round_dp(3).to_string(),
                e.slippage.round_dp(3).to_string(),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

fn book_table(book: &OrderBook) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Side", "Price", "Size"]);
    for level in book.asks.iter().rev() {
        table.add_row(vec!["ask".to_string(), level.price.to_string(), level.size.to_string()]);
    }
    for level in &book.bids {
        table.add_row(vec!["bid".to_string(), level.price.to_string(), level.size.to_string()]);
    }
    table
}

// ==============================================================================
// Demo Command
// ==============================================================================

async fn handle_demo(args: DemoArgs, config: Config) -> anyhow::Result<()> {
    let prices = Arc::new(StaticPriceSource::new(config.market.prices.clone()));
    let store = InMemoryBalanceStore::new(config.account.balances.clone());
    let manager = OrderManager::new(&config, Box::new(store), prices.clone())?;
    let mut events = manager.subscribe();
    let period = manager.matcher_interval();
    let manager = Arc::new(Mutex::new(manager));

    let asset = args.asset.as_str();
    let reference = prices
        .get_price(asset)
        .with_context(|| format!("no reference price configured for {asset}"))?;
    tracing::info!(asset = %asset, reference_price = %reference, "Demo session started.");

    {
        let mut m = manager.lock().await;
        print_result("market buy", m.create_order(OrderParams::market(OrderSide::Buy, asset, dec!(1.5))));
        print_result(
            "limit buy 2% below",
            m.create_order(OrderParams::limit(OrderSide::Buy, asset, dec!(2), (reference * dec!(0.98)).round_dp(2))),
        );
        print_result(
            "stop sell 3% below",
            m.create_order(OrderParams::stop(OrderSide::Sell, asset, dec!(1), (reference * dec!(0.97)).round_dp(2))),
        );
        print_result(
            "limit sell 20% above",
            m.create_order(OrderParams::limit(OrderSide::Sell, asset, dec!(1), (reference * dec!(1.2)).round_dp(2))),
        );
    }

    let moved = (reference * dec!(0.965)).round_dp(2);
    println!("\n{asset} moves from {reference} to {moved}, waiting for the matcher...");
    prices.set_price(asset, moved);
    tracing::info!(asset = %asset, from = %reference, to = %moved, "Reference price moved.");

    let handle = LimitOrderMatcher::new(Arc::clone(&manager), period).spawn();
    tokio::time::sleep(period + Duration::from_millis(500)).await;
    handle.shutdown().await;
    tracing::info!("Matcher shut down, cancelling leftovers.");

    let m = manager.lock().await;
    let active = m.get_active_orders(None);
    drop(m);
    for order in active {
        let mut m = manager.lock().await;
        if m.cancel_order(&order.id)? {
            println!("cancelled {} ({} {} @ {:?})", order.id, order.side, order.order_type, order.price);
        }
    }

    let m = manager.lock().await;
    println!("\n{}", orders_table(&m.get_order_history(None)));
    println!("{}", positions_table(&m.portfolio_summary()));
    println!("{}", stats_table(&m.order_stats()));
    let quote = m.balance(&config.engine.quote_asset);
    println!(
        "{}: balance {} reserved {} available {}",
        quote.asset,
        quote.balance.round_dp(4),
        quote.reserved,
        quote.available.round_dp(4)
    );
    drop(m);

    if args.events {
        while let Ok(event) = events.try_recv() {
            println!("{}", event.to_json()?);
        }
    } else {
        let mut count = 0usize;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::TradeExecuted(_)) {
                count += 1;
            }
        }
        println!("{count} trades executed");
    }
    Ok(())
}

fn print_result(label: &str, result: Result<ExecutionReport, EngineError>) {
    match result {
        Ok(report) => {
            println!(
                "{label}: {} {} ({} fills, remaining {}, cost {})",
                report.order_id,
                report.status,
                report.fills.len(),
                report.remaining_amount,
                report.total_cost.round_dp(2)
            );
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
        }
        Err(e) => {
            tracing::warn!(label = %label, error = %e, "Demo order refused.");
            println!("{label}: failed: {e}");
        }
    }
}

fn orders_table(orders: &[Order]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Id", "Type", "Side", "Status", "Amount", "Filled", "Avg Price", "Fees",
    ]);
    for o in orders {
        table.add_row(vec![
            o.id.clone(),
            o.order_type.to_string(),
            o.side.to_string(),
            o.status.to_string(),
            o.amount.to_string(),
            o.filled.to_string(),
            o.average_fill_price.round_dp(4).to_string(),
            o.total_fees.round_dp(4).to_string(),
        ]);
    }
    table
}

fn positions_table(summary: &PortfolioSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Symbol", "Amount", "Avg Price", "Value", "Invested", "Realized", "Unrealized", "P&L %",
    ]);
    for p in &summary.positions {
        table.add_row(vec![
            p.symbol.clone(),
            p.amount.to_string(),
            p.average_price.round_dp(4).to_string(),
            p.current_value.round_dp(2).to_string(),
            p.total_invested.round_dp(2).to_string(),
            p.realized_pnl.round_dp(2).to_string(),
            p.unrealized_pnl.round_dp(2).to_string(),
            p.profit_loss_percent.round_dp(2).to_string(),
        ]);
    }
    for c in &summary.closed_positions {
        table.add_row(vec![
            format!("{} (closed)", c.symbol),
            c.quantity.to_string(),
            c.average_price.round_dp(4).to_string(),
            Decimal::ZERO.to_string(),
            c.total_invested.round_dp(2).to_string(),
            c.realized_pnl.round_dp(2).to_string(),
            Decimal::ZERO.to_string(),
            "-".to_string(),
        ]);
    }
    table.add_row(vec![
        "TOTAL".to_string(),
        String::new(),
        String::new(),
        summary.total_value.round_dp(2).to_string(),
        summary.total_invested.round_dp(2).to_string(),
        summary.total_realized_pnl.round_dp(2).to_string(),
        summary.total_unrealized_pnl.round_dp(2).to_string(),
        summary.total_profit_loss_percent.round_dp(2).to_string(),
    ]);
    table
}

fn stats_table(stats: &OrderStats) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Orders", "Active", "Filled", "Cancelled", "Rejected", "Volume", "Avg Fill (ms)",
    ]);
    table.add_row(vec![
        stats.total_orders.to_string(),
        stats.active_orders.to_string(),
        stats.filled_orders.to_string(),
        stats.cancelled_orders.to_string(),
        stats.rejected_orders.to_string(),
        stats.total_volume.round_dp(2).to_string(),
        stats.average_fill_time_ms.to_string(),
    ]);
    table
}
