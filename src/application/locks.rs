use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::AccountId;

use super::LedgerError;

type Slots = DashMap<AccountId, Arc<Mutex<()>>>;

/// Per-account mutual exclusion, keyed by account id.
///
/// Entries are created on first use and removed once nobody holds or waits
/// for them, so the table only ever holds ids that are in use. A lock is held
/// through an RAII guard, so it is released on every exit path, including
/// errors and dropped futures.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Arc<Slots>,
}

/// Exclusive access to one account.
#[derive(Debug)]
pub struct AccountGuard {
    account_id: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Slots>,
}

impl AccountGuard {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        // Release first so our own reference no longer counts
        drop(self.guard.take());
        evict_idle(&self.locks, self.account_id);
    }
}

/// Remove the entry for `id` if the map holds the only reference to it.
/// New references are only handed out under the same shard lock, so an
/// entry with a holder or a waiter is never removed.
fn evict_idle(locks: &Slots, id: AccountId) {
    locks.remove_if(&id, |_, slot| Arc::strong_count(slot) == 1);
}

/// Exclusive access to the two accounts of a transfer. Holds a single guard
/// when both sides are the same account.
#[derive(Debug)]
pub struct PairGuard {
    first: AccountGuard,
    second: Option<AccountGuard>,
}

impl PairGuard {
    /// Locked account ids, in acquisition order.
    pub fn account_ids(&self) -> Vec<AccountId> {
        std::iter::once(self.first.account_id())
            .chain(self.second.as_ref().map(AccountGuard::account_id))
            .collect()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: AccountId) -> Arc<Mutex<()>> {
        // The map shard lock is released before any await
        self.locks.entry(id).or_default().value().clone()
    }

    /// Lock one account, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        id: AccountId,
        timeout: Duration,
    ) -> Result<AccountGuard, LedgerError> {
        // The pending lock future, and its reference to the slot, is
        // dropped at the end of this statement
        let attempt = tokio::time::timeout(timeout, self.slot(id).lock_owned()).await;
        match attempt {
            Ok(guard) => Ok(AccountGuard {
                account_id: id,
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                evict_idle(&self.locks, id);
                tracing::warn!(account_id = id, ?timeout, "timed out waiting for account lock");
                Err(LedgerError::Conflict { account_id: id })
            }
        }
    }

    /// Lock two accounts in ascending id order, so two transfers moving
    /// funds in opposite directions cannot deadlock.
    pub async fn acquire_pair(
        &self,
        a: AccountId,
        b: AccountId,
        timeout: Duration,
    ) -> Result<PairGuard, LedgerError> {
        if a == b {
            return Ok(PairGuard {
                first: self.acquire(a, timeout).await?,
                second: None,
            });
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(low, timeout).await?;
        // On timeout `first` is dropped here and released
        let second = self.acquire(high, timeout).await?;

        Ok(PairGuard {
            first,
            second: Some(second),
        })
    }

    /// Number of ids currently locked or waited for.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
