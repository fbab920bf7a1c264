//! Per-trade mutual exclusion.
//!
//! Every mutation of a trade row happens under the lock keyed by its id.
//! When several trades are locked together, acquisition is by ascending id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TradeLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl TradeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, trade_id: i64) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(trade_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock(&self, trade_id: i64) -> OwnedMutexGuard<()> {
        self.handle(trade_id).lock_owned().await
    }

    /// Locks several trades in ascending-id order.
    pub async fn lock_many(&self, trade_ids: &[i64]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<i64> = trade_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Drops lock entries for trades that reached a terminal state.
    pub fn release_terminal(&self, trade_ids: &[i64]) {
        let mut locks = self.locks.lock();
        for id in trade_ids {
            if let Some(entry) = locks.get(id) {
                // Only drop unheld locks; a held Arc has extra references.
                if Arc::strong_count(entry) == 1 {
                    locks.remove(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn serializes_same_trade() {
        let locks = Arc::new(TradeLocks::new());
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(42).await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                // Nobody else incremented while we held the lock.
                assert_eq!(counter.load(Ordering::SeqCst), seen + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_trades_do_not_contend() {
        let locks = TradeLocks::new();
        let _a = locks.lock(1).await;
        let _b = locks.lock(2).await;
    }

    #[tokio::test]
    async fn lock_many_sorts_and_dedups() {
        let locks = TradeLocks::new();
        let guards = locks.lock_many(&[5, 1, 5, 3]).await;
        assert_eq!(guards.len(), 3);
    }
}
