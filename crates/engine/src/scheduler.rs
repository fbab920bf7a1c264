//! Periodic task scheduler.
//!
//! Owns the background loops (order monitor, exit monitor, strategy
//! supervisor, end-of-session summary). Each periodic loop applies ±10%
//! jitter so the monitors never burst against the broker in lockstep, and
//! observes the shutdown flag between ticks. Stop cancels tasks in reverse
//! spawn order, waiting up to ten seconds per task before aborting.
//!
//! A loop that raises three consecutive invariant violations is halted and
//! an operator alert is raised; every other error is logged and the loop
//! continues.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveTime;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use daytrader_core::EngineError;

const STOP_GRACE: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_INVARIANT_FAILURES: u32 = 3;

struct NamedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<NamedTask>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn jittered(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    period.mul_f64(factor)
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Receiver observed by externally-owned loops (quote stream, strategy
    /// supervisor).
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns a named periodic loop running `tick` every `period` ± 10%.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!(task = name, period_secs = period.as_secs(), "Periodic task started");
            let mut invariant_strikes = 0u32;
            loop {
                tokio::select! {
                    () = tokio::time::sleep(jittered(period)) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }

                match tick().await {
                    Ok(()) => invariant_strikes = 0,
                    Err(err) => {
                        let is_invariant = matches!(
                            err.downcast_ref::<EngineError>(),
                            Some(EngineError::InvariantViolation(_))
                        );
                        if is_invariant {
                            invariant_strikes += 1;
                            tracing::error!(
                                task = name,
                                strikes = invariant_strikes,
                                %err,
                                "Invariant violation in periodic task"
                            );
                            if invariant_strikes >= MAX_CONSECUTIVE_INVARIANT_FAILURES {
                                tracing::error!(
                                    task = name,
                                    "OPERATOR ALERT: halting task after repeated invariant violations"
                                );
                                break;
                            }
                        } else {
                            invariant_strikes = 0;
                            tracing::warn!(task = name, %err, "Periodic task tick failed");
                        }
                    }
                }
            }
            tracing::info!(task = name, "Periodic task stopped");
        });
        self.tasks.push(NamedTask { name, handle });
    }

    /// Spawns a long-running task that manages its own loop. The future
    /// must observe the shutdown receiver it was built with.
    pub fn spawn_task<Fut>(&mut self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.tasks.push(NamedTask { name, handle });
    }

    /// Spawns a once-a-day task firing at `at` in the market's local zone.
    pub fn spawn_daily<F, Fut>(&mut self, name: &'static str, at: NaiveTime, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!(task = name, at = %at, "Daily task scheduled");
            loop {
                let now = daytrader_core::now_eastern();
                let mut target = now.date_naive().and_time(at);
                if now.naive_local() >= target {
                    target += chrono::Duration::days(1);
                }
                let wait = (target - now.naive_local())
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));

                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(err) = tick().await {
                    tracing::error!(task = name, %err, "Daily task failed");
                }
            }
            tracing::info!(task = name, "Daily task stopped");
        });
        self.tasks.push(NamedTask { name, handle });
    }

    /// Signals shutdown and drains tasks in reverse spawn order.
    pub async fn stop(self) {
        tracing::info!("Scheduler stopping");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.into_iter().rev() {
            match tokio::time::timeout(STOP_GRACE, task.handle).await {
                Ok(Ok(())) => tracing::info!(task = task.name, "Task drained"),
                Ok(Err(err)) => tracing::warn!(task = task.name, %err, "Task panicked"),
                Err(_) => {
                    tracing::warn!(task = task.name, "Task did not drain in time, aborting");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_and_stops() {
        let mut scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler.spawn_periodic("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several ticks, saw {seen}");

        scheduler.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn three_invariant_strikes_halt_the_loop() {
        let mut scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler.spawn_periodic("broken", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::InvariantViolation("boom".to_string()).into())
            }
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ordinary_errors_do_not_halt() {
        let mut scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler.spawn_periodic("flaky", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::TransientBroker("503".to_string()).into())
            }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(ticks.load(Ordering::SeqCst) > 5);
        scheduler.stop().await;
    }
}
