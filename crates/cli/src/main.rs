use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use daytrader_broker::{BrokerClient, HttpBroker, PaperBroker};
use daytrader_core::{AppConfig, ConfigLoader, EventBus, Overrides};
use daytrader_data::{Database, StrategyRepository, TradeStore};
use daytrader_engine::{
    AdmissionPipeline, ContractSelector, EventCalendar, ExitEngine, OrderManager, RiskGate,
    Scheduler, TradeLocks,
};
use daytrader_market_data::{subscribe_base_symbols, QuoteCache, QuoteStream};
use daytrader_strategy::{StrategySupervisor, WorkerDeps};
use daytrader_web_api::{ApiServer, ApiState};

#[derive(Parser)]
#[command(name = "daytrader")]
#[command(about = "Intraday 0-DTE options trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine with the web API
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Apply database migrations and exit
    Migrate {
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = ConfigLoader::load(&config)?;
            run(config).await
        }
        Commands::Migrate { config } => {
            let config = ConfigLoader::load(&config)?;
            Database::connect(&config.database).await?;
            tracing::info!("Migrations applied");
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let database = Database::connect(&config.database).await?;
    let store = TradeStore::new(database.pool().clone());
    let strategies = StrategyRepository::new(database.pool().clone());

    let broker: Arc<dyn BrokerClient> = if config.broker.paper_trade {
        tracing::warn!("Paper trading mode: orders are simulated");
        Arc::new(PaperBroker::new())
    } else {
        Arc::new(HttpBroker::new(&config.broker)?)
    };

    let cache = Arc::new(QuoteCache::new(config.monitors.quote_stale_secs));
    subscribe_base_symbols(
        &cache,
        &config.risk.allowed_tickers,
        &config.risk.vix_symbol,
    );

    let overrides = Arc::new(parking_lot::RwLock::new(Overrides::default()));
    let bus = EventBus::default();
    let locks = Arc::new(TradeLocks::new());
    let calendar = EventCalendar::new(&config.session.event_calendar_path);

    let gate = RiskGate::new(
        store.clone(),
        cache.clone(),
        broker.clone(),
        calendar,
        overrides.clone(),
        config.risk.clone(),
        config.session.clone(),
        config.server.webhook_secret.clone(),
    );
    let selector = ContractSelector::new(broker.clone(), config.selector.clone());
    let pipeline = Arc::new(AdmissionPipeline::new(
        store.clone(),
        gate,
        selector,
        broker.clone(),
        cache.clone(),
        bus.clone(),
        locks.clone(),
        config.clone(),
    ));

    let order_manager = Arc::new(OrderManager::new(
        broker.clone(),
        store.clone(),
        cache.clone(),
        bus.clone(),
        locks.clone(),
        config.exits.clone(),
        config.monitors.clone(),
    ));
    let exit_engine = Arc::new(ExitEngine::new(
        broker.clone(),
        store.clone(),
        cache.clone(),
        locks.clone(),
        overrides.clone(),
        config.exits.clone(),
        config.session.clone(),
        config.monitors.clone(),
    ));

    let mut scheduler = Scheduler::new();

    // Streaming quotes feed the cache; monitors fall back to REST on miss.
    let (stream, _commands) = QuoteStream::new(
        config.broker.ws_url.clone(),
        cache.clone(),
        scheduler.shutdown_signal(),
    );
    scheduler.spawn_task("QuoteStream", stream.run());

    let om = order_manager.clone();
    scheduler.spawn_periodic(
        "OrderMonitor",
        std::time::Duration::from_secs(config.monitors.order_poll_interval_secs),
        move || {
            let om = om.clone();
            async move { om.tick().await }
        },
    );

    let ee = exit_engine.clone();
    scheduler.spawn_periodic(
        "ExitMonitor",
        std::time::Duration::from_secs(config.monitors.exit_check_interval_secs),
        move || {
            let ee = ee.clone();
            async move { ee.tick().await }
        },
    );

    let supervisor = StrategySupervisor::new(
        strategies.clone(),
        WorkerDeps {
            aggregator: Arc::new(daytrader_market_data::BarAggregator::new(500)),
            cache: cache.clone(),
            broker: broker.clone(),
            pipeline: pipeline.clone(),
            atr_period_default: config.exits.atr_period,
        },
    );
    scheduler.spawn_task("StrategySignal", supervisor.run(scheduler.shutdown_signal()));

    let summary_store = store.clone();
    scheduler.spawn_daily("EodSummary", daytrader_core::session::summary_time(), move || {
        let store = summary_store.clone();
        async move {
            let today = daytrader_core::session_date(daytrader_core::now_eastern());
            store.upsert_daily_summary(today).await?;
            Ok(())
        }
    });

    let api = ApiServer::new(ApiState {
        store,
        strategies,
        pipeline,
        bus,
        overrides,
    });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api.serve(&addr).await {
            tracing::error!(%err, "API server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.stop().await;
    api_handle.abort();
    Ok(())
}
