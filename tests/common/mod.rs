// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use tally::application::{EngineConfig, LedgerEngine};
use tally::domain::{Account, AccountId, Amount, NewAccount};
use tally::storage::{AccountStore, MemoryStore, Page, PageRequest, SqliteStore};
use tempfile::TempDir;

/// Engine over a fresh in-memory store
pub fn memory_engine() -> LedgerEngine<MemoryStore> {
    LedgerEngine::new(MemoryStore::new())
}

/// Helper to create a test engine with a temporary SQLite database
pub async fn sqlite_engine() -> Result<(LedgerEngine<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let engine = sqlite_engine_at(&temp_dir.path().join("test.db")).await?;
    Ok((engine, temp_dir))
}

/// Engine over the SQLite file at `path`, created if missing. Several
/// engines on one path behave like separate CLI processes.
pub async fn sqlite_engine_at(path: &Path) -> Result<LedgerEngine<SqliteStore>> {
    let store = SqliteStore::init(&format!("sqlite:{}?mode=rwc", path.display())).await?;
    Ok(LedgerEngine::new(store))
}

/// Open an account with the given balance
pub async fn open<S: AccountStore + 'static>(
    engine: &LedgerEngine<S>,
    number: &str,
    balance: Amount,
) -> Result<Account> {
    Ok(engine
        .create_account(NewAccount::new(number, balance))
        .await?)
}

/// Current balance of an account that must exist
pub async fn balance_of<S: AccountStore + 'static>(
    engine: &LedgerEngine<S>,
    id: AccountId,
) -> Result<Amount> {
    Ok(engine.get_account(id).await?.balance)
}

/// Store wrapper that counts calls, can slow down writes and can make
/// writes of chosen accounts fail. It never commits batches atomically, so
/// the engine uses its write-then-compensate path.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    /// Remaining successful saves per account; at zero, saves fail
    save_budget: Mutex<HashMap<AccountId, usize>>,
    save_delay: Duration,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Let `id` be saved `successes` more times, then fail every save.
    pub fn fail_saves_after(&self, id: AccountId, successes: usize) {
        self.save_budget.lock().insert(id, successes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl AccountStore for FaultyStore {
    async fn create(&self, account: NewAccount) -> Result<Account> {
        self.touch();
        self.inner.create(account).await
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        self.touch();
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }

        let allowed = match self.save_budget.lock().get_mut(&account.id) {
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
            None => true,
        };
        if !allowed {
            bail!("injected write failure for account {}", account.id);
        }
        self.inner.save(account).await
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        self.touch();
        self.inner.find_by_id(id).await
    }

    async fn exists_by_id(&self, id: AccountId) -> Result<bool> {
        self.touch();
        self.inner.exists_by_id(id).await
    }

    async fn delete_by_id(&self, id: AccountId) -> Result<bool> {
        self.touch();
        self.inner.delete_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<Account>> {
        self.touch();
        self.inner.find_all().await
    }

    async fn find_page(&self, request: PageRequest) -> Result<Page<Account>> {
        self.touch();
        self.inner.find_page(request).await
    }

    async fn find_by_balance_less_than(&self, threshold: Amount) -> Result<Vec<Account>> {
        self.touch();
        self.inner.find_by_balance_less_than(threshold).await
    }

    async fn find_by_balance_greater_than_zero(&self) -> Result<Vec<Account>> {
        self.touch();
        self.inner.find_by_balance_greater_than_zero().await
    }
}

/// Engine over a `FaultyStore` with a short lock timeout
pub fn faulty_engine(store: FaultyStore, lock_timeout: Duration) -> LedgerEngine<FaultyStore> {
    LedgerEngine::with_config(store, EngineConfig::default().with_lock_timeout(lock_timeout))
}
