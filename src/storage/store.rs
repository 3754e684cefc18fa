use std::future::Future;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Account, AccountId, Amount, NewAccount};

/// Zero-based page selector for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    /// Number of records to skip before this page starts.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    /// Limit and offset as SQL integers. `None` when the page starts past
    /// what a 64-bit offset can address.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        let limit = i64::try_from(self.size).ok()?;
        let offset = self
            .page
            .checked_mul(self.size)
            .and_then(|offset| i64::try_from(offset).ok())?;
        Some((limit, offset))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page of results plus the total number of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size as u64)
        }
    }

    pub fn has_next(&self) -> bool {
        (self.page as u64) + 1 < self.total_pages()
    }
}

/// A save lost an optimistic version check: the record changed since it
/// was read, through another engine sharing the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Account {account_id} changed since it was read (expected version {expected})")]
pub struct StaleWrite {
    pub account_id: AccountId,
    pub expected: i64,
}

/// Keyed durable storage for accounts.
///
/// A store guarantees that a single read returns a whole record (never a
/// mix of two writes). It does not serialize read-modify-write cycles;
/// that is the ledger engine's job. Writes are version-checked, so two
/// engines over one store cannot overwrite each other's updates.
pub trait AccountStore: Send + Sync {
    /// Insert a new account. The store assigns the id.
    fn create(&self, account: NewAccount) -> impl Future<Output = Result<Account>> + Send;

    /// Overwrite an existing account if its stored version still equals
    /// `account.version`, otherwise fail with [`StaleWrite`]. Returns the
    /// account with its version bumped.
    fn save(&self, account: &Account) -> impl Future<Output = Result<Account>> + Send;

    /// Whether `save_all` commits several records as one unit.
    fn supports_atomic_batch(&self) -> bool {
        false
    }

    /// Overwrite several existing accounts, all or nothing, with the same
    /// version check as `save`.
    fn save_all(
        &self,
        accounts: Vec<Account>,
    ) -> impl Future<Output = Result<Vec<Account>>> + Send {
        async move {
            let unsupported: Result<Vec<Account>> = Err(anyhow::anyhow!(
                "atomic batch writes are not supported by this store ({} records)",
                accounts.len()
            ));
            unsupported
        }
    }

    fn find_by_id(&self, id: AccountId) -> impl Future<Output = Result<Option<Account>>> + Send;

    fn exists_by_id(&self, id: AccountId) -> impl Future<Output = Result<bool>> + Send;

    /// Remove an account. Returns false if there was nothing to remove.
    fn delete_by_id(&self, id: AccountId) -> impl Future<Output = Result<bool>> + Send;

    /// All accounts, ordered by id.
    fn find_all(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn find_page(
        &self,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page<Account>>> + Send;

    fn find_by_balance_less_than(
        &self,
        threshold: Amount,
    ) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn find_by_balance_greater_than_zero(
        &self,
    ) -> impl Future<Output = Result<Vec<Account>>> + Send;
}
