use anyhow::{Context, Result};
use bot_core::config::{EngineConfig, RunMode};
use bot_core::engine::{
    AdapterRequest, ChannelAdapter, ChannelFeed, Engine, EventEnvelope, GracefulShutdown,
    LiveClock, LiveDriver, StrategySubscription,
};
use bot_core::error::EngineError;
use bot_core::logging::init_logging;
use bot_core::strategies::{SimpleConfig, SimpleStrategy};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bot-engine")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic strategy execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (default.toml plus the file named by BOT_ENV)
    #[arg(short, long, env = "BOT_CONFIG_DIR", default_value = "config", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines event file and print the adapter requests
    Backtest {
        /// JSON-lines file of event envelopes
        #[arg(long)]
        events: PathBuf,
        /// SimpleStrategy configuration (JSON)
        #[arg(long)]
        strategy: PathBuf,
    },
    /// Read event envelopes from stdin on the wall clock until Ctrl-C
    Run {
        /// SimpleStrategy configuration (JSON)
        #[arg(long)]
        strategy: PathBuf,
    },
    /// Print the JSON schema of the SimpleStrategy configuration
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Backtest { events, strategy } => {
            let config = load_config(&cli.config, RunMode::Backtest)?;
            let _guard = init_logging(&config.logging);
            run_backtest(&config, events, strategy)
        }
        Commands::Run { strategy } => {
            let config = load_config(&cli.config, RunMode::Live)?;
            let _guard = init_logging(&config.logging);
            run_live(&config, strategy).await
        }
        Commands::Schema => {
            println!("{}", SimpleConfig::json_schema()?);
            Ok(())
        }
    }
}

fn load_config(dir: &Path, mode: RunMode) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_from(dir)
        .with_context(|| format!("loading configuration from {}", dir.display()))?;
    config.engine.mode = mode;
    config.validate().map_err(EngineError::from)?;
    Ok(config)
}

fn load_strategy(path: &Path) -> Result<SimpleConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading strategy config {}", path.display()))?;
    let config: SimpleConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing strategy config {}", path.display()))?;
    Ok(config)
}

fn load_events(path: &Path) -> Result<Vec<EventEnvelope>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading events {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))
        })
        .collect()
}

/// Register exchanges, instruments and balances, then the strategy
fn build_engine(
    config: &EngineConfig,
    strategy: SimpleConfig,
    adapter: ChannelAdapter,
) -> Result<Engine> {
    let mut engine = Engine::from_config(config, Box::new(adapter));
    let setup = &config.backtest;

    for exchange in &setup.exchanges {
        engine.register_exchange(exchange);
    }
    engine.register_exchange(&strategy.market.exchange_instance(strategy.environment));
    for meta in &setup.instruments {
        engine.register_instrument(meta.clone());
    }
    for seed in &setup.balances {
        engine.set_balance(&seed.exchange, seed.asset.clone(), seed.total);
    }

    let subscription = StrategySubscription::for_exchange(
        &strategy.strategy_id,
        strategy.market.exchange_instance(strategy.environment),
    )
    .with_instrument(strategy.market.instrument_id());
    engine.add_strategy(Box::new(SimpleStrategy::new(strategy)), subscription)?;
    Ok(engine)
}

fn print_requests(rx: &mut mpsc::UnboundedReceiver<AdapterRequest>) -> Result<usize> {
    let mut count = 0;
    while let Ok(request) = rx.try_recv() {
        println!("{}", serde_json::to_string(&request)?);
        count += 1;
    }
    Ok(count)
}

fn run_backtest(config: &EngineConfig, events: &Path, strategy: &Path) -> Result<()> {
    let strategy = load_strategy(strategy)?;
    let events = load_events(events)?;
    let (adapter, mut rx) = ChannelAdapter::new(false);
    let mut engine = build_engine(config, strategy, adapter)?;

    engine.run_backtest(events)?;

    let printed = print_requests(&mut rx)?;
    let stats = engine.router_stats();
    info!(
        requests = printed,
        delivered = stats.events_delivered,
        dropped = stats.events_dropped,
        late = stats.late_events,
        "backtest complete"
    );
    Ok(())
}

async fn run_live(config: &EngineConfig, strategy: &Path) -> Result<()> {
    let strategy = load_strategy(strategy)?;
    let (adapter, mut requests) = ChannelAdapter::new(false);
    let engine = build_engine(config, strategy, adapter)?;

    let (tx, feed) = ChannelFeed::channel(1024);
    let shutdown = GracefulShutdown::new(Duration::from_millis(config.shutdown.drain_timeout_ms));
    shutdown.spawn_ctrl_c_listener();

    // stdin → feed
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventEnvelope>(&line) {
                Ok(envelope) => {
                    if tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping invalid event line: {}", e),
            }
        }
    });

    // adapter requests → stdout
    let printer = tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            match serde_json::to_string(&request) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to encode adapter request: {}", e),
            }
        }
    });

    let mut driver = LiveDriver::new(engine, feed, LiveClock, shutdown);
    driver.run().await?;

    // dropping the engine closes the request channel
    drop(driver);
    printer.await.context("request printer task failed")?;
    Ok(())
}
