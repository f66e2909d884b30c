//! Pool Sweeper
//!
//! Background task that periodically finds expired, under-funded pools and
//! refunds their contributors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::engine::{CashPoolEngine, SweepReport};
use super::error::PoolError;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pause between sweeps
    pub scan_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
        }
    }
}

pub struct PoolSweeper {
    engine: Arc<CashPoolEngine>,
    config: SweeperConfig,
}

impl PoolSweeper {
    pub fn new(engine: Arc<CashPoolEngine>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    pub fn with_defaults(engine: Arc<CashPoolEngine>) -> Self {
        Self::new(engine, SweeperConfig::default())
    }

    /// Sweep until `shutdown` turns true. The signal is observed between
    /// sweeps, so an in-flight refund pass always runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            "Starting pool sweeper"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sweep_once().await {
                error!(code = e.code(), error = %e, "Pool sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                changed = shutdown.changed() => {
                    // Sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Pool sweeper stopped");
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, PoolError> {
        let report = self.engine.sweep_and_refund().await?;
        if report.expired == 0 {
            debug!("No expired pools");
        } else {
            info!(
                expired = report.expired,
                refunded = report.refunded,
                compensations = report.compensations,
                failed = report.failed,
                "Sweep completed"
            );
        }
        Ok(report)
    }
}
