//! PayRelay - Crypto Payment Relay
//!
//! Issues payment sessions and polls address balances within provider rate limits.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use payrelay::adapters::cli::{
    AddressesCmd, CliApp, Command, LockCmd, OpenCmd, OutputFormat, RecheckCmd, RunCmd,
};
use payrelay::adapters::{FileStore, FixedRates, PoolDeriver};
use payrelay::application::{
    AddressLedger, Driver, ProviderRegistry, Scheduler, TransactionLedger,
};
use payrelay::config::{load_config, Config};
use payrelay::domain::Address;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    let config_path = app.command.config_path().to_path_buf();
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Run(cmd) => run_command(cmd, config).await,
        Command::Open(cmd) => open_command(cmd, config).await,
        Command::Addresses(cmd) => addresses_command(cmd, config).await,
        Command::Lock(cmd) => lock_command(cmd, config).await,
        Command::Recheck(cmd) => recheck_command(cmd, config).await,
    }
}

/// Flags win over RUST_LOG, which wins over the configured level
fn init_logging(verbose: bool, debug: bool, configured: &str) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured))
            .context("Invalid log level")?
    };

    fmt().with_env_filter(filter).with_target(false).init();
    Ok(())
}

/// Store and ledgers shared by every command
struct Ledgers {
    addresses: Arc<AddressLedger>,
    transactions: Arc<TransactionLedger>,
}

fn build_ledgers(config: &Config) -> Result<Ledgers> {
    let store_path = config.store.resolved_path();
    let store = Arc::new(
        FileStore::open(&store_path)
            .with_context(|| format!("Failed to open ledger at {}", store_path.display()))?,
    );

    let pool_path = config.derivation.resolved_pool_file();
    let deriver = Arc::new(
        PoolDeriver::from_file(&pool_path)
            .with_context(|| format!("Failed to load address pool {}", pool_path.display()))?,
    );

    let rates = Arc::new(FixedRates::new(config.rates.clone()));

    let addresses = Arc::new(AddressLedger::new(
        store.clone(),
        deriver,
        rates,
        config.schedule.backoff(),
    ));
    let transactions = Arc::new(TransactionLedger::new(
        store,
        addresses.clone(),
        config.transaction_ttl(),
    ));

    Ok(Ledgers {
        addresses,
        transactions,
    })
}

fn ensure_configured_coin(config: &Config, coin: &str) -> Result<()> {
    if !config.coins.keys().any(|c| c.eq_ignore_ascii_case(coin)) {
        bail!(
            "Coin {} is not configured (known: {})",
            coin,
            config.coins.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting PayRelay...");

    let ledgers = build_ledgers(&config)?;

    // Every provider is built once, then coins are bound; unbound coins are fatal
    let registry = ProviderRegistry::from_config(&config).context("Failed to build provider registry")?;
    registry
        .ensure_bound(config.coins.keys().map(String::as_str))
        .context("Provider registry is incomplete")?;
    let registry = Arc::new(registry);

    let (scheduler, handle) = Scheduler::new(registry.clone(), ledgers.addresses.clone(), config.coin_limits());
    let scheduler = scheduler.with_fund_recording(config.schedule.record_funds);

    let heartbeat = cmd
        .heartbeat
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.schedule.heartbeat());
    let driver = Driver::new(ledgers.addresses.clone(), ledgers.transactions.clone(), handle)
        .with_heartbeat(heartbeat);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Setup Ctrl+C handler
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    let worker = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    tracing::info!(
        "Serving {} coins through {} providers",
        config.coins.len(),
        registry.provider_count()
    );
    driver.run(shutdown_rx).await;

    // A check in flight (including a throttle wait) finishes before exit
    worker.await.context("Scheduler task failed")?;
    tracing::info!("PayRelay stopped");
    Ok(())
}

async fn open_command(cmd: OpenCmd, config: Config) -> Result<()> {
    ensure_configured_coin(&config, &cmd.coin)?;
    let ledgers = build_ledgers(&config)?;

    let session = ledgers
        .transactions
        .open(&cmd.coin, &cmd.account)
        .await
        .context("Failed to open payment session")?;

    match cmd.format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "transaction": session.transaction.id,
                "coin": session.address.coin,
                "address": session.address.address,
                "valid_from": session.transaction.valid_from,
                "valid_to": session.transaction.valid_to,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Transaction: {}", session.transaction.id);
            println!("  Pay to:    {} ({})", session.address.address, session.address.coin);
            println!("  Valid:     {} -> {}", session.transaction.valid_from, session.transaction.valid_to);
        }
    }

    Ok(())
}

async fn addresses_command(cmd: AddressesCmd, config: Config) -> Result<()> {
    let ledgers = build_ledgers(&config)?;

    let mut addresses: Vec<Address> = ledgers
        .addresses
        .addresses()
        .await?
        .into_iter()
        .filter(|a| cmd.coin.as_ref().map_or(true, |c| a.coin.eq_ignore_ascii_case(c)))
        .collect();
    addresses.sort_by_key(|a| a.id);

    match cmd.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&addresses)?);
        }
        OutputFormat::Text => {
            println!(
                "{:>5}  {:<5} {:<16} {:<7} {:>18} {:>12}  {:<25} {}",
                "ID", "COIN", "ACCOUNT", "STATUS", "BALANCE", "FIAT", "NEXT CHECK", "ADDRESS"
            );
            for a in &addresses {
                let fiat = ledgers
                    .addresses
                    .fiat_value(a)
                    .map(|v| v.round_dp(2).to_string())
                    .unwrap_or_else(|_| "-".to_string());
                println!(
                    "{:>5}  {:<5} {:<16} {:<7} {:>18} {:>12}  {:<25} {}",
                    a.id,
                    a.coin,
                    a.account,
                    a.status,
                    a.balance,
                    fiat,
                    a.next_check.format("%Y-%m-%d %H:%M:%S UTC"),
                    a.address
                );
            }
            println!("{} addresses", addresses.len());
        }
    }

    Ok(())
}

async fn lock_command(cmd: LockCmd, config: Config) -> Result<()> {
    let ledgers = build_ledgers(&config)?;
    ledgers
        .addresses
        .lock(cmd.id)
        .await
        .with_context(|| format!("Failed to lock address {}", cmd.id))?;
    println!("Address {} locked", cmd.id);
    Ok(())
}

async fn recheck_command(cmd: RecheckCmd, config: Config) -> Result<()> {
    let ledgers = build_ledgers(&config)?;
    ledgers
        .addresses
        .force_immediate_check(cmd.id)
        .await
        .with_context(|| format!("Failed to schedule address {}", cmd.id))?;
    println!("Address {} will be checked at the next heartbeat", cmd.id);
    Ok(())
}
