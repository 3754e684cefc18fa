use std::collections::BTreeMap;

use anyhow::{Result, bail};
use parking_lot::RwLock;

use crate::domain::{Account, AccountId, Amount, NewAccount};

use super::{AccountStore, Page, PageRequest, StaleWrite};

#[derive(Debug)]
struct MemoryState {
    accounts: BTreeMap<AccountId, Account>,
    /// Last id handed out; only grows, so deleted ids are never reused.
    last_id: AccountId,
}

/// Process-local account store. Every write of a record (or a batch of
/// records) happens under one write lock, so readers never see a torn
/// record and batches are all-or-nothing.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryState {
    /// Check that `account` exists and carries the stored version.
    fn check_current(&self, account: &Account) -> Result<()> {
        match self.accounts.get(&account.id) {
            None => bail!("Account {} does not exist", account.id),
            Some(stored) if stored.version != account.version => Err(StaleWrite {
                account_id: account.id,
                expected: account.version,
            }
            .into()),
            Some(_) => Ok(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                accounts: BTreeMap::new(),
                last_id: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for MemoryStore {
    async fn create(&self, account: NewAccount) -> Result<Account> {
        let mut state = self.state.write();
        state.last_id += 1;
        let created = Account {
            id: state.last_id,
            account_number: account.account_number,
            balance: account.balance,
            version: 0,
        };
        state.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        let mut state = self.state.write();
        state.check_current(account)?;

        let saved = Account {
            version: account.version + 1,
            ..account.clone()
        };
        state.accounts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    async fn save_all(&self, accounts: Vec<Account>) -> Result<Vec<Account>> {
        let mut state = self.state.write();
        for account in &accounts {
            state.check_current(account)?;
        }

        let saved: Vec<Account> = accounts
            .into_iter()
            .map(|account| Account {
                version: account.version + 1,
                ..account
            })
            .collect();
        for account in &saved {
            state.accounts.insert(account.id, account.clone());
        }
        Ok(saved)
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.state.read().accounts.get(&id).cloned())
    }

    async fn exists_by_id(&self, id: AccountId) -> Result<bool> {
        Ok(self.state.read().accounts.contains_key(&id))
    }

    async fn delete_by_id(&self, id: AccountId) -> Result<bool> {
        Ok(self.state.write().accounts.remove(&id).is_some())
    }

    async fn find_all(&self) -> Result<Vec<Account>> {
        Ok(self.state.read().accounts.values().cloned().collect())
    }

    async fn find_page(&self, request: PageRequest) -> Result<Page<Account>> {
        let state = self.state.read();
        let items = state
            .accounts
            .values()
            .skip(request.offset())
            .take(request.size)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: request.page,
            size: request.size,
            total: state.accounts.len() as u64,
        })
    }

    async fn find_by_balance_less_than(&self, threshold: Amount) -> Result<Vec<Account>> {
        Ok(self
            .state
            .read()
            .accounts
            .values()
            .filter(|account| account.balance < threshold)
            .cloned()
            .collect())
    }

    async fn find_by_balance_greater_than_zero(&self) -> Result<Vec<Account>> {
        Ok(self
            .state
            .read()
            .accounts
            .values()
            .filter(|account| account.balance > Amount::ZERO)
            .cloned()
            .collect())
    }
}
