use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stoat::blockchain::{
    BalanceTracker, BlockhashCache, CachedKeyManager, RpcClient, TransactionBuilder, Wallet,
};
use stoat::config::ConfigManager;
use stoat::database::{Db, SignalRow};
use stoat::signal::SignalServer;
use stoat::trading::{FastExecutor, JupiterClient, PositionTracker};
use stoat::transport::SignalBus;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

struct ServiceOrchestrator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceOrchestrator {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = Arc::new(ConfigManager::load(&config_path).context("load configuration")?);
    let config = cfg.get();

    info!("🚀 starting stoat trading pipeline");

    let orchestrator = ServiceOrchestrator::new();

    // Persistence sink
    if let Some(parent) = std::path::Path::new(&config.storage.sqlite_path).parent() {
        std::fs::create_dir_all(parent).context("create storage dir")?;
    }
    let db = Arc::new(
        Db::connect(&config.storage.sqlite_path)
            .await
            .context("open database")?,
    );

    // Wallet: env key if present, otherwise an auto-generated cached key.
    let wallet = match cfg.private_key() {
        Some(key) => Arc::new(Wallet::from_base58(&key).context("parse WALLET_PRIVATE_KEY")?),
        None => {
            warn!("no private key in environment, using auto-generated wallet");
            let key_manager = CachedKeyManager::new(
                &config.wallet.key_cache_dir,
                Duration::from_secs(config.wallet.key_cache_ttl_seconds),
            );
            Arc::new(key_manager.get_or_generate().context("generate wallet")?)
        }
    };

    // Chain plumbing
    let rpc = Arc::new(
        RpcClient::new(
            cfg.rpc_primary_url(),
            cfg.rpc_fallback_url(),
            cfg.primary_api_key(),
        )
        .context("build RPC client")?,
    );

    let blockhash_cache = Arc::new(BlockhashCache::new(
        Arc::clone(&rpc),
        Duration::from_millis(config.blockchain.blockhash_refresh_ms),
        Duration::from_secs(config.blockchain.blockhash_ttl_seconds),
    ));
    blockhash_cache
        .start(orchestrator.shutdown_signal())
        .await
        .context("start blockhash cache")?;

    let balance = Arc::new(BalanceTracker::new(
        wallet.address().to_string(),
        Arc::clone(&rpc),
    ));
    if let Err(err) = balance.refresh().await {
        warn!(error = %err, "initial balance refresh failed");
    } else {
        info!(sol = balance.balance_sol(), "wallet balance loaded");
    }
    spawn_balance_refresher(
        Arc::clone(&balance),
        Duration::from_secs(config.blockchain.balance_refresh_seconds),
        orchestrator.shutdown_signal(),
    );

    // Aggregator + signer
    let jupiter = Arc::new(
        JupiterClient::new(
            config.jupiter.base_url.clone(),
            config.jupiter.slippage_bps,
            Duration::from_secs(config.jupiter.timeout_seconds),
            cfg.jupiter_api_keys(),
        )
        .context("build jupiter client")?,
    );
    jupiter.set_max_priority_fee(config.jupiter.max_priority_fee_lamports);

    let tx_builder = Arc::new(TransactionBuilder::new(
        Arc::clone(&wallet),
        Arc::clone(&blockhash_cache),
        config.jupiter.max_priority_fee_lamports,
    ));

    // Positions with startup recovery
    let positions = Arc::new(
        PositionTracker::load(Some(Arc::clone(&db)), config.trading.max_open_positions).await,
    );

    // The executor
    let executor = FastExecutor::new(
        Arc::clone(&cfg),
        Arc::clone(&wallet),
        Arc::clone(&rpc),
        Arc::clone(&jupiter),
        Arc::clone(&tx_builder),
        Arc::clone(&positions),
        Arc::clone(&balance),
        Some(Arc::clone(&db)),
    );

    if config.trading.simulation_mode {
        warn!("⚠️ SIMULATION MODE ACTIVE - no real transactions will be sent");
        executor.set_simulation_mode(true);
        jupiter.set_simulation(true, 1.0);
    }

    if let Err(err) = executor.setup_websocket(orchestrator.shutdown_signal()).await {
        warn!(error = %err, "WebSocket setup failed, running in poll-only mode");
    }

    executor.start_monitoring(orchestrator.shutdown_signal());

    // Ingress: HTTP server feeding the bounded signal bus
    let (bus, mut signal_rx) = SignalBus::new(config.storage.signals_buffer_size);
    let server = SignalServer::new(Arc::clone(&cfg), bus);
    let server_shutdown = orchestrator.shutdown_signal();
    tokio::spawn(async move {
        if let Err(err) = server.run(server_shutdown).await {
            error!(error = %err, "signal server exited");
        }
    });

    // Consumer: log each signal to the sink, then hand it to the executor.
    let consumer_executor = Arc::clone(&executor);
    let consumer_db = Arc::clone(&db);
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            let row = SignalRow {
                id: 0,
                token_name: signal.token_name.clone(),
                value: signal.value,
                unit: signal.unit.clone(),
                signal_type: signal.signal_type.as_str().to_string(),
                msg_id: signal.msg_id,
                timestamp: signal.timestamp,
            };
            if let Err(err) = consumer_db.insert_signal(&row).await {
                warn!(error = %err, "failed to log signal");
            }
            consumer_executor.process_signal_fast(signal);
        }
    });

    spawn_status_logger(
        Arc::clone(&executor),
        Arc::clone(&positions),
        Arc::clone(&balance),
        Arc::clone(&blockhash_cache),
        Arc::clone(&tx_builder),
        Arc::clone(&db),
        orchestrator.shutdown_signal(),
    );

    info!("✅ all services started");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("🛑 shutdown signal received");

    orchestrator.trigger_shutdown();
    executor.shutdown().await;
    // Give spawned tasks a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(500)).await;

    info!("goodbye");
    Ok(())
}

fn init_tracing() {
    let default_level = if std::env::var("DEBUG").map(|v| v == "1").unwrap_or(false) {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stoat={}", default_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Pull-based balance refresh. The WebSocket pushes the same value with
/// lower latency when it is up; this keeps the cache warm without it.
fn spawn_balance_refresher(
    balance: Arc<BalanceTracker>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    if let Err(err) = balance.refresh().await {
                        warn!(error = %err, "balance refresh failed");
                    }
                }
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn spawn_status_logger(
    executor: Arc<FastExecutor>,
    positions: Arc<PositionTracker>,
    balance: Arc<BalanceTracker>,
    blockhash_cache: Arc<BlockhashCache>,
    tx_builder: Arc<TransactionBuilder>,
    db: Arc<Db>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    let (entry_signals, target_hits) = executor.stats();
                    let (trades, win_rate, total_pnl) = match db.trading_stats().await {
                        Ok(stats) => stats,
                        Err(_) => (0, 0.0, 0.0),
                    };
                    let metrics = executor.metrics();
                    let (total, _, _, success_rate) = metrics.stats();
                    let blockhash = tx_builder
                        .recent_blockhash()
                        .await
                        .map(|h| h.chars().take(8).collect::<String>())
                        .unwrap_or_else(|_| "unavailable".to_string());
                    info!(
                        positions = positions.count(),
                        balance_sol = balance.balance_sol(),
                        entry_signals,
                        target_hits,
                        trades,
                        win_rate,
                        total_pnl,
                        sends = total,
                        send_success_rate = success_rate,
                        send_p50_ms = metrics.p50(),
                        blockhash = %blockhash,
                        blockhash_hit_rate = blockhash_cache.hit_rate(),
                        blockhash_age_ms = blockhash_cache.age().map(|a| a.as_millis() as u64).unwrap_or(0),
                        "📊 status"
                    );
                }
            }
        }
    });
}
