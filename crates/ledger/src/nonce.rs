//! Per-account transaction sequencing.
//!
//! Concurrent audit writes from the same admin account must each consume a
//! distinct nonce. [`NonceSequencer`] caches the next nonce behind an async
//! mutex, seeds it from the ledger's pending count on first use, and hands
//! out consecutive values. After a rejected submission the cache is dropped
//! so the next allocation re-reads the ledger.

use tokio::sync::Mutex;

use crate::{address::Address, error::Result, transport::LedgerTransport};

/// Allocates strictly increasing nonces for one account.
#[derive(Debug)]
pub struct NonceSequencer {
    account: Address,
    next: Mutex<Option<u64>>,
}

impl NonceSequencer {
    /// Creates an unseeded sequencer for `account`.
    #[must_use]
    pub fn new(account: Address) -> Self {
        Self { account, next: Mutex::new(None) }
    }

    /// Returns the account this sequencer allocates for.
    #[must_use]
    pub fn account(&self) -> Address {
        self.account
    }

    /// Reserves the next nonce.
    ///
    /// The lock is held across the seeding round trip so two first callers
    /// cannot both read the same pending count.
    pub async fn allocate(&self, transport: &dyn LedgerTransport) -> Result<u64> {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let seeded = transport.transaction_count(self.account).await?;
                tracing::debug!(account = %self.account, nonce = seeded, "seeded nonce sequencer");
                seeded
            },
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Discards the cached nonce after `failed` was rejected or never sent,
    /// so the next allocation re-reads the ledger's pending count.
    pub async fn invalidate(&self, failed: u64) {
        let mut next = self.next.lock().await;
        if next.is_some() {
            tracing::debug!(account = %self.account, failed, "invalidating nonce cache");
            *next = None;
        }
    }

    /// Returns the cached next nonce, if seeded.
    pub async fn peek(&self) -> Option<u64> {
        *self.next.lock().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::testutil::MockLedger;

    #[tokio::test]
    async fn seeds_from_pending_count_then_increments() {
        let ledger = MockLedger::new();
        let account = Address::new([7; 20]);
        ledger.set_pending_nonce(account, 5);

        let sequencer = NonceSequencer::new(account);
        assert_eq!(sequencer.allocate(&ledger).await.unwrap(), 5);
        assert_eq!(sequencer.allocate(&ledger).await.unwrap(), 6);
        assert_eq!(sequencer.peek().await, Some(7));
    }

    #[tokio::test]
    async fn invalidate_reseeds_from_ledger() {
        let ledger = MockLedger::new();
        let account = Address::new([7; 20]);
        let sequencer = NonceSequencer::new(account);

        assert_eq!(sequencer.allocate(&ledger).await.unwrap(), 0);
        sequencer.invalidate(0).await;
        assert_eq!(sequencer.peek().await, None);

        ledger.set_pending_nonce(account, 3);
        assert_eq!(sequencer.allocate(&ledger).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrent_allocations_are_distinct() {
        let ledger = Arc::new(MockLedger::new());
        let sequencer = Arc::new(NonceSequencer::new(Address::new([9; 20])));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            let sequencer = Arc::clone(&sequencer);
            handles.push(tokio::spawn(async move { sequencer.allocate(ledger.as_ref()).await }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap().unwrap()));
        }
        assert_eq!(seen, (0..32).collect());
    }

    #[tokio::test]
    async fn seeding_failure_leaves_cache_empty() {
        let ledger = MockLedger::new();
        ledger.set_unreachable(true);
        let sequencer = NonceSequencer::new(Address::new([1; 20]));

        assert!(sequencer.allocate(&ledger).await.is_err());
        assert_eq!(sequencer.peek().await, None);
    }
}
