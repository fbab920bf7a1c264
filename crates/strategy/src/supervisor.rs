//! Strategy worker fleet supervisor.
//!
//! Owns one worker per enabled (ticker, timeframe, signal_type) tuple.
//! The enabled set is re-read periodically and the fleet diffed against
//! it: newly enabled tuples spawn workers, disabled ones are shut down.

use std::collections::HashMap;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use daytrader_data::{EnabledStrategyRow, StrategyRepository};
use daytrader_market_data::Timeframe;
use daytrader_signals::{SignalKind, SignalParams};

use crate::worker::{StrategyWorker, WorkerConfig, WorkerDeps};

const SYNC_INTERVAL_SECS: u64 = 30;

type WorkerKey = (String, String, String);

struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct StrategySupervisor {
    repo: StrategyRepository,
    deps: WorkerDeps,
    workers: HashMap<WorkerKey, WorkerHandle>,
}

fn parse_config(row: &EnabledStrategyRow) -> Option<WorkerConfig> {
    let timeframe = Timeframe::parse(&row.timeframe)?;
    let kind = SignalKind::parse(&row.signal_type)?;
    let mut params: SignalParams =
        serde_json::from_value(row.params.clone()).unwrap_or_default();
    params.kind = kind;
    Some(WorkerConfig {
        ticker: row.ticker.to_uppercase(),
        timeframe,
        signal_type: row.signal_type.clone(),
        params,
    })
}

impl StrategySupervisor {
    #[must_use]
    pub fn new(repo: StrategyRepository, deps: WorkerDeps) -> Self {
        Self {
            repo,
            deps,
            workers: HashMap::new(),
        }
    }

    /// Runs until shutdown, keeping the fleet in sync with the database.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Strategy supervisor started");
        loop {
            if let Err(err) = self.sync().await {
                tracing::warn!(%err, "Strategy fleet sync failed");
            }
            tokio::select! {
                () = tokio::time::sleep(std::time::Duration::from_secs(SYNC_INTERVAL_SECS)) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        self.shutdown_all().await;
        tracing::info!("Strategy supervisor stopped");
    }

    async fn sync(&mut self) -> anyhow::Result<()> {
        let enabled = self.repo.list_enabled().await?;
        let mut desired: HashMap<WorkerKey, WorkerConfig> = HashMap::new();
        for row in &enabled {
            let key = (
                row.ticker.to_uppercase(),
                row.timeframe.clone(),
                row.signal_type.clone(),
            );
            match parse_config(row) {
                Some(config) => {
                    desired.insert(key, config);
                }
                None => {
                    tracing::warn!(
                        ticker = row.ticker,
                        timeframe = row.timeframe,
                        signal_type = row.signal_type,
                        "Enabled strategy has unknown timeframe or signal type"
                    );
                }
            }
        }

        // Stop workers no longer enabled.
        let stale: Vec<WorkerKey> = self
            .workers
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(handle) = self.workers.remove(&key) {
                tracing::info!(?key, "Stopping strategy worker");
                let _ = handle.shutdown_tx.send(true);
                let _ = handle.join.await;
            }
        }

        // Spawn workers for newly enabled tuples.
        for (key, config) in desired {
            if self.workers.contains_key(&key) {
                continue;
            }
            tracing::info!(?key, "Spawning strategy worker");
            let (shutdown_tx, join) = StrategyWorker::spawn(config, self.deps.clone());
            self.workers.insert(key, WorkerHandle { shutdown_tx, join });
        }

        Ok(())
    }

    async fn shutdown_all(&mut self) {
        for (key, handle) in self.workers.drain() {
            tracing::info!(?key, "Stopping strategy worker");
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.join.await;
        }
    }
}
