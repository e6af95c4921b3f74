//! Per-wallet serialization of withdrawal bookkeeping.
//!
//! Withdrawal creation reads the available balance and then inserts a
//! pending record; completion flips a withdrawal out of the pending total and
//! then debits the wallet. Both sequences hold the wallet's lock so no other
//! sequence on the same wallet observes the gap.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use marketpay_common::WalletId;

/// Async mutexes keyed by wallet.
#[derive(Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a wallet.
    pub async fn lock(&self, wallet_id: WalletId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let mutex = self
            .locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!(wallet_id = %wallet_id, "Waiting for wallet lock");
        mutex.lock_owned().await
    }

    /// Number of wallets that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_wallet_is_serialized() {
        let locks = Arc::new(WalletLocks::new());
        let wallet = WalletId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(wallet).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_wallets_do_not_block() {
        let locks = WalletLocks::new();
        let _a = locks.lock(WalletId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(WalletId::new())).await;
        assert!(b.is_ok());
    }
}
