//! pool_ledger service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Postgres │───▶│  System  │───▶│ Sweeper  │
//! │  (YAML)  │    │ (schema) │    │bootstrap │    │  (loop)  │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Runs the expired-pool sweeper until Ctrl-C. Transfer submission is
//! exposed through the library API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use pool_ledger::account::AccountRegistry;
use pool_ledger::cashpool::{CashPoolEngine, PoolSweeper, SweeperConfig};
use pool_ledger::config::AppConfig;
use pool_ledger::core_types::{Clock, SystemClock};
use pool_ledger::db::Database;
use pool_ledger::fee::FeeSchedule;
use pool_ledger::limit::SpendingLimitGuard;
use pool_ledger::store::{PgStore, Store};
use pool_ledger::system::SystemSigner;
use pool_ledger::transfer::{ChannelSink, TransactionAuthorizer};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = pool_ledger::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting pool_ledger"
    );

    let database = Database::connect(
        &app_config.postgres_url,
        app_config
            .postgres_max_connections
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    )
    .await
    .context("Failed to connect to PostgreSQL")?;
    database.migrate().await.context("Schema migration failed")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(database.pool().clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let signer = Arc::new(SystemSigner::new(
        store.clone(),
        clock.clone(),
        app_config.system_secret.as_bytes(),
    )?);
    signer.bootstrap().await?;
    // Refunds cannot be signed without the system identity
    let identity = signer.resolve().await?;
    tracing::info!(
        address = %identity.address,
        fingerprint = signer.fingerprint(),
        "System identity resolved"
    );

    let (sink, mut events) = ChannelSink::new(app_config.notifications.channel_capacity);
    let drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(
                transaction_id = %event.transaction_id,
                receiver = %event.key(),
                amount = %event.amount,
                "Notification delivered"
            );
        }
    });

    let registry = Arc::new(AccountRegistry::new(store.clone(), clock.clone()));
    let authorizer = Arc::new(
        TransactionAuthorizer::new(
            store.clone(),
            clock.clone(),
            Arc::new(SpendingLimitGuard::new(store.clone(), clock.clone())),
            Arc::new(FeeSchedule::new(store.clone(), clock.clone())),
            signer,
            Arc::new(sink),
        )
        .with_default_deadline(app_config.authorizer.default_deadline()),
    );
    let engine = Arc::new(
        CashPoolEngine::new(store, clock, registry, authorizer)
            .with_sweep_batch(app_config.sweeper.batch_size),
    );

    let sweeper = PoolSweeper::new(
        engine.clone(),
        SweeperConfig {
            scan_interval: app_config.sweeper.scan_interval(),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for the current sweep");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        tracing::error!(error = %e, "Sweeper task failed");
    }

    drain.abort();
    database.pool().close().await;
    tracing::info!("pool_ledger stopped");
    Ok(())
}
