use std::sync::{Arc, RwLock};

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use swingbot::api::{CoinGeckoClient, DexScreenerClient, JupiterClient, OracleClient};
use swingbot::config::Settings;
use swingbot::engine::{spawn_heartbeat, ControlLoop, HeartbeatState, SharedHeartbeat};
use swingbot::execution::{Executor, JupiterLiquidity, SimulatedExecutor};
use swingbot::market::{CandleAggregator, MarketDataService, PriceProvider, PriceResolver};
use swingbot::persistence::PostgresPersistence;
use swingbot::risk::{KillSwitch, RiskManager};

#[derive(Parser)]
#[command(
    name = "swingbot",
    version,
    about = "Automated directional trading controller for a single pair"
)]
struct Cli {
    /// Config file name (default: swingbot.toml in the working directory)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop (default)
    Run,
    /// Clear a latched kill switch and remove its sentinel file
    ResetKillSwitch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::ResetKillSwitch => {
            let mut kill_switch = KillSwitch::new(&settings.risk.kill_switch_path, true);
            kill_switch.reset()?;
            tracing::info!(
                path = %settings.risk.kill_switch_path,
                "kill switch cleared"
            );
            Ok(())
        }
        Command::Run => run(settings).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "swingbot=info".to_string()),
        )
        .init();
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(
        base = %settings.pair.base_symbol,
        quote = %settings.pair.quote_symbol,
        cycle_secs = settings.engine.cycle_interval_secs,
        "swingbot starting"
    );

    // Providers in fallback order: fast feed first, aggregator next,
    // on-chain oracle last
    let coingecko = CoinGeckoClient::new(
        settings.pair.coingecko_id.clone(),
        settings.price.coingecko_api_key.clone(),
    );
    let providers: Vec<Box<dyn PriceProvider>> = vec![
        Box::new(DexScreenerClient::new(settings.pair.base_mint.clone())),
        Box::new(coingecko.clone()),
        Box::new(OracleClient::new(settings.pair.oracle_feed_id.clone())),
    ];
    let resolver = Arc::new(PriceResolver::new(
        providers,
        settings.price.resolver_config(),
    ));

    let aggregator = CandleAggregator::new(
        &[settings.regime.timeframe, settings.entry.timeframe],
        settings.market.candle_history_cap,
    );
    let mut market = MarketDataService::new(resolver.clone(), aggregator, Some(coingecko));

    if let Err(e) = market.bootstrap(settings.engine.bootstrap_days).await {
        tracing::warn!(error = %e, "candle bootstrap failed, filling from live ticks");
    }

    // Paper execution against live prices; a real swap client would slot in
    // behind the same trait
    let executor = SimulatedExecutor::new(
        resolver.clone(),
        settings.risk.default_equity,
        settings.risk.fee_rate,
    );

    let liquidity = JupiterLiquidity::new(
        JupiterClient::new(),
        settings.pair.base_mint.clone(),
        settings.pair.quote_mint.clone(),
        settings.pair.base_decimals,
        settings.pair.quote_decimals,
    );

    let store = match &settings.persistence.database_url {
        Some(url) => match PostgresPersistence::connect(url).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "persistence unavailable, continuing without");
                None
            }
        },
        None => None,
    };

    // Starting equity from the executor's real balance; config default when
    // the balance or a price is unavailable
    let initial_equity = match executor.balance().await {
        Ok(balances) => match resolver.get_price(false).await {
            Ok(quote) => balances.equity(quote.price),
            Err(e) => {
                tracing::warn!(error = %e, "no price for starting equity, using default");
                settings.risk.default_equity
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "balance unavailable, using default equity");
            settings.risk.default_equity
        }
    };
    tracing::info!(initial_equity, "risk tracking initialized");

    let kill_switch = KillSwitch::new(
        &settings.risk.kill_switch_path,
        settings.risk.kill_switch_enabled,
    );
    let risk = RiskManager::new(initial_equity, settings.risk.risk_config(), kill_switch);

    let resumed_position = match &store {
        Some(store) => store.load_open_position().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load open position");
            None
        }),
        None => None,
    };

    let heartbeat: SharedHeartbeat = Arc::new(RwLock::new(HeartbeatState::default()));
    let heartbeat_task = spawn_heartbeat(heartbeat.clone(), settings.engine.heartbeat_interval_secs);

    let mut engine = ControlLoop::new(
        settings,
        market,
        risk,
        Box::new(executor),
        Box::new(liquidity),
        store,
        heartbeat,
    );
    if let Some(position) = resumed_position {
        engine.resume_position(position);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(shutdown_rx).await?;
    heartbeat_task.abort();

    tracing::info!("swingbot stopped");
    Ok(())
}
