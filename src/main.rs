use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use core_types::{TradeQuery, TradeRequest, TradeType, money};
use database::{PgLedgerStore, connect, run_migrations};
use executor::{LedgerStore, Portfolio, PortfolioService};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// The main entry point for the ledger CLI.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    let config = configuration::load_config_from(&cli.config)
        .with_context(|| format!("Failed to load configuration '{}'", cli.config))?;
    let _log_guard = configuration::logging::init(&config.logging);

    // Initialize the database connection and run migrations
    let db_pool = connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(db_pool));
    let service = PortfolioService::new(store, config.ledger.clone());

    // Execute the appropriate command
    let result = match cli.command {
        Commands::Migrate => {
            println!("Database schema is up to date.");
            Ok(())
        }
        Commands::Trade(args) => handle_trade(&service, args).await,
        Commands::Portfolio { user } => handle_portfolio(&service, &user).await,
        Commands::Reprice { user, prices } => handle_reprice(&service, &user, prices).await,
        Commands::History(args) => handle_history(&service, args).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Command failed.");
    }
    result
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A simulated crypto trading ledger with virtual balances.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file name, without extension.
    #[arg(long, global = true, default_value = "ledger")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations and exit.
    Migrate,
    /// Execute a buy or sell at the given price.
    Trade(TradeArgs),
    /// Show a user's balance, holdings and latest trades.
    Portfolio {
        #[arg(long)]
        user: String,
    },
    /// Mark a user's holdings to new prices (e.g. --price BTC=64000.5).
    Reprice {
        #[arg(long)]
        user: String,
        #[arg(long = "price", value_parser = parse_price, required = true)]
        prices: Vec<(String, Decimal)>,
    },
    /// List a user's trades, newest first.
    History(HistoryArgs),
}

#[derive(Parser)]
struct TradeArgs {
    #[arg(long)]
    user: String,

    /// "buy" or "sell".
    #[arg(long = "type")]
    trade_type: TradeType,

    /// Ticker, e.g. BTC.
    #[arg(long)]
    symbol: String,

    /// Quantity of the asset.
    #[arg(long)]
    amount: Decimal,

    /// Price per unit in USD.
    #[arg(long)]
    price: Decimal,

    /// Print the result as JSON instead of tables.
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct HistoryArgs {
    #[arg(long)]
    user: String,

    /// Only show "buy" or "sell" trades.
    #[arg(long = "type")]
    trade_type: Option<TradeType>,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = core_types::DEFAULT_PAGE_LIMIT)]
    limit: u32,
}

fn parse_price(raw: &str) -> Result<(String, Decimal), String> {
    let (symbol, price) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=PRICE, got '{}'", raw))?;
    let price = price
        .trim()
        .parse::<Decimal>()
        .map_err(|e| format!("invalid price '{}': {}", price, e))?;
    Ok((symbol.trim().to_string(), price))
}

// ==============================================================================
// Command Handlers
// ==============================================================================

async fn handle_trade(service: &PortfolioService, args: TradeArgs) -> anyhow::Result<()> {
    let request = TradeRequest::new(args.trade_type, args.symbol, args.amount, args.price);
    let outcome = service.execute_trade(&args.user, request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let verb = match outcome.trade.trade_type {
        TradeType::Buy => "Buy",
        TradeType::Sell => "Sell",
    };
    println!(
        "{} order placed successfully: {} {} @ {} (total {}), transaction {}",
        verb,
        money::canonical(outcome.trade.amount),
        outcome.trade.crypto_symbol,
        money::canonical(outcome.trade.price_per_unit),
        money::canonical(outcome.trade.total_value),
        outcome.trade.transaction_id,
    );
    println!("{}", holdings_table(&outcome.portfolio));
    println!("Account balance: {}", money::canonical(outcome.portfolio.account_balance()));
    Ok(())
}

async fn handle_portfolio(service: &PortfolioService, user: &str) -> anyhow::Result<()> {
    let overview = service.overview(user).await?;
    let summary = &overview.summary;

    let mut table = Table::new();
    table.set_header(vec!["Account Balance", "Holdings Value", "Total Value", "Invested", "Returns"]);
    table.add_row(vec![
        money::canonical(summary.account_balance).to_string(),
        money::canonical(summary.holdings_value).to_string(),
        money::canonical(summary.total_portfolio_value).to_string(),
        money::canonical(summary.total_invested).to_string(),
        money::canonical(summary.total_returns).to_string(),
    ]);
    println!("{table}");
    println!("{}", holdings_table(&overview.portfolio));

    if !overview.recent_trades.is_empty() {
        println!("Recent trades:");
        println!("{}", trades_table(&overview.recent_trades));
    }
    Ok(())
}

async fn handle_reprice(
    service: &PortfolioService,
    user: &str,
    prices: Vec<(String, Decimal)>,
) -> anyhow::Result<()> {
    let prices: HashMap<String, Decimal> = prices.into_iter().collect();
    match service.update_holding_prices(user, &prices).await? {
        Some(portfolio) => println!("{}", holdings_table(&portfolio)),
        None => println!("User '{}' has no portfolio yet.", user),
    }
    Ok(())
}

async fn handle_history(service: &PortfolioService, args: HistoryArgs) -> anyhow::Result<()> {
    let query = TradeQuery::new(args.user)
        .with_type(args.trade_type)
        .with_page(args.page)
        .with_limit(args.limit);
    let page = service.trade_history(&query).await?;

    println!("{}", trades_table(&page.trades));
    println!(
        "Page {} of {} ({} trades)",
        page.page,
        page.total_pages.max(1),
        page.total_items
    );
    Ok(())
}

fn holdings_table(portfolio: &Portfolio) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Symbol", "Amount", "Avg Buy", "Price", "Value", "Gain/Loss", "%"]);
    for holding in portfolio.holdings() {
        table.add_row(vec![
            holding.crypto_symbol().to_string(),
            money::canonical(holding.amount()).to_string(),
            money::canonical(holding.average_buy_price().round_dp(8)).to_string(),
            money::canonical(holding.current_price()).to_string(),
            money::canonical(holding.total_value().round_dp(2)).to_string(),
            money::canonical(holding.gain_loss().round_dp(2)).to_string(),
            money::canonical(holding.gain_loss_percent().round_dp(2)).to_string(),
        ]);
    }
    table
}

fn trades_table(trades: &[core_types::Trade]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Time", "Type", "Symbol", "Amount", "Price", "Total", "Transaction"]);
    for trade in trades {
        table.add_row(vec![
            trade.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            trade.trade_type.to_string(),
            trade.crypto_symbol.clone(),
            money::canonical(trade.amount).to_string(),
            money::canonical(trade.price_per_unit).to_string(),
            money::canonical(trade.total_value).to_string(),
            trade.transaction_id.clone(),
        ]);
    }
    table
}
