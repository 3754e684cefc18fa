use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, warn};

use crate::domain::{Account, AccountId, AccountPatch, Amount, NewAccount};
use crate::storage::{AccountStore, Page, PageRequest};

use super::{EngineConfig, LedgerError, LockTable, PairGuard};

/// Ledger engine: the single entry point for reading and mutating accounts.
///
/// Every read-modify-write runs while holding the account's lock from the
/// engine's [`LockTable`]; reads go straight to the store.
pub struct LedgerEngine<S> {
    store: Arc<S>,
    locks: LockTable,
    config: EngineConfig,
}

/// Outcome of a transfer: both accounts as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub from: Account,
    pub to: Account,
    pub amount: Amount,
}

/// Balances computed for a transfer before anything is written.
struct TransferPlan {
    from_before: Account,
    from_after: Account,
    to_after: Account,
    amount: Amount,
}

impl<S: AccountStore + 'static> LedgerEngine<S> {
    /// Create an engine over `store` with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            locks: LockTable::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================
    // Account operations
    // ========================

    /// Persist a new account. The store assigns its id.
    pub async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError> {
        ensure_non_negative(account.balance)?;

        let created = self.store.create(account).await?;
        debug!(account_id = created.id, balance = %created.balance, "account created");
        Ok(created)
    }

    /// Look up an account. Absence is `None`, not an error.
    pub async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// Look up an account that must exist.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    pub async fn exists(&self, id: AccountId) -> Result<bool, LedgerError> {
        Ok(self.store.exists_by_id(id).await?)
    }

    /// All accounts, ordered by id.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn list_page(&self, request: PageRequest) -> Result<Page<Account>, LedgerError> {
        if request.size == 0 {
            return Err(LedgerError::Validation(
                "Page size must be positive".to_string(),
            ));
        }
        if request.bounds().is_none() {
            return Err(LedgerError::Validation(format!(
                "Page {} of size {} is out of range",
                request.page, request.size
            )));
        }
        Ok(self.store.find_page(request).await?)
    }

    /// Accounts whose balance is strictly below `threshold`.
    pub async fn accounts_below(&self, threshold: Amount) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.find_by_balance_less_than(threshold).await?)
    }

    /// Accounts holding a positive balance.
    pub async fn funded_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.find_by_balance_greater_than_zero().await?)
    }

    /// Replace the number and balance of an existing account.
    pub async fn update_account(
        &self,
        id: AccountId,
        account: NewAccount,
    ) -> Result<Account, LedgerError> {
        ensure_non_negative(account.balance)?;

        let _guard = self.locks.acquire(id, self.config.lock_timeout()).await?;
        let existing = self.get_account(id).await?;

        let updated = self
            .store
            .save(&Account {
                account_number: account.account_number,
                balance: account.balance,
                ..existing
            })
            .await?;
        debug!(account_id = id, "account replaced");
        Ok(updated)
    }

    /// Apply the present fields of `patch`. A patched balance must not be
    /// negative; it is an administrative overwrite, not a ledger movement.
    pub async fn partial_update(
        &self,
        id: AccountId,
        patch: AccountPatch,
    ) -> Result<Account, LedgerError> {
        if let Some(balance) = patch.balance {
            ensure_non_negative(balance)?;
        }

        let _guard = self.locks.acquire(id, self.config.lock_timeout()).await?;
        let existing = self.get_account(id).await?;
        if patch.is_empty() {
            return Ok(existing);
        }

        let updated = self.store.save(&patch.apply_to(&existing)).await?;
        debug!(
            account_id = id,
            number_changed = patch.account_number.is_some(),
            balance_changed = patch.balance.is_some(),
            "account patched"
        );
        Ok(updated)
    }

    /// Delete an account. Deleting an unknown id is `NotFound`.
    pub async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        let _guard = self.locks.acquire(id, self.config.lock_timeout()).await?;
        if !self.store.delete_by_id(id).await? {
            return Err(LedgerError::NotFound(id));
        }

        debug!(account_id = id, "account deleted");
        Ok(())
    }

    // ========================
    // Monetary operations
    // ========================

    pub async fn deposit(&self, id: AccountId, amount: Amount) -> Result<Account, LedgerError> {
        ensure_positive(amount)?;

        let _guard = self.locks.acquire(id, self.config.lock_timeout()).await?;
        let account = self.get_account(id).await?;

        let updated = self.store.save(&credit(&account, amount)?).await?;
        debug!(account_id = id, %amount, balance = %updated.balance, "deposit applied");
        Ok(updated)
    }

    pub async fn withdraw(&self, id: AccountId, amount: Amount) -> Result<Account, LedgerError> {
        ensure_positive(amount)?;

        let _guard = self.locks.acquire(id, self.config.lock_timeout()).await?;
        let account = self.get_account(id).await?;
        ensure_covers(&account, amount)?;

        let updated = self.store.save(&debit(&account, amount)?).await?;
        debug!(account_id = id, %amount, balance = %updated.balance, "withdrawal applied");
        Ok(updated)
    }

    /// Move `amount` from one account to another, all or nothing.
    ///
    /// Both locks are taken in ascending id order. Both new balances are
    /// computed before the first write. When the store cannot commit both
    /// records atomically, the debit is written first and undone if the
    /// credit fails; if the undo fails too the error is [`LedgerError::Fatal`].
    ///
    /// A transfer to the same account checks funds and writes nothing.
    pub async fn transfer(
        &self,
        from_id: AccountId,
        to_id: AccountId,
        amount: Amount,
    ) -> Result<TransferResult, LedgerError> {
        ensure_positive(amount)?;

        let guard = self
            .locks
            .acquire_pair(from_id, to_id, self.config.lock_timeout())
            .await?;

        let from = self.get_account(from_id).await?;
        let to = self.get_account(to_id).await?;
        ensure_covers(&from, amount)?;

        if from_id == to_id {
            debug!(account_id = from_id, %amount, "self-transfer, balance unchanged");
            return Ok(TransferResult { from, to, amount });
        }

        let plan = TransferPlan {
            from_after: debit(&from, amount)?,
            to_after: credit(&to, amount)?,
            from_before: from,
            amount,
        };

        // The commit runs as its own task and owns the locks, so a caller
        // that stops polling cannot leave the transfer half-written.
        let store = Arc::clone(&self.store);
        let (from, to) = tokio::spawn(commit_transfer(store, guard, plan))
            .await
            .map_err(|join_error| LedgerError::Fatal {
                from: from_id,
                to: to_id,
                amount,
                reason: format!("transfer commit aborted: {join_error}"),
            })??;

        debug!(
            from = from_id,
            to = to_id,
            %amount,
            from_balance = %from.balance,
            to_balance = %to.balance,
            "transfer applied"
        );
        Ok(TransferResult { from, to, amount })
    }
}

/// Persist both legs of a planned transfer while holding both locks.
async fn commit_transfer<S: AccountStore>(
    store: Arc<S>,
    guard: PairGuard,
    plan: TransferPlan,
) -> Result<(Account, Account), LedgerError> {
    let TransferPlan {
        from_before,
        from_after,
        to_after,
        amount,
    } = plan;
    let (from_id, to_id) = (from_after.id, to_after.id);

    let committed = if store.supports_atomic_batch() {
        let saved = store.save_all(vec![from_after, to_after]).await?;
        let [from, to]: [Account; 2] = saved
            .try_into()
            .map_err(|_| anyhow!("Store returned an unexpected batch for transfer"))?;
        Ok((from, to))
    } else {
        // A failed debit leaves nothing to undo
        let from = store.save(&from_after).await?;
        match store.save(&to_after).await {
            Ok(to) => Ok((from, to)),
            Err(credit_error) => {
                warn!(
                    from = from_id,
                    to = to_id,
                    %amount,
                    error = %credit_error,
                    "credit leg failed, restoring debited account"
                );
                // The restore must carry the version the debit produced
                let restore = Account {
                    version: from.version,
                    ..from_before
                };
                match store.save(&restore).await {
                    Ok(_) => Err(LedgerError::from(
                        credit_error.context("Transfer rolled back after credit failed"),
                    )),
                    Err(rollback_error) => {
                        error!(
                            from = from_id,
                            to = to_id,
                            %amount,
                            credit_error = %credit_error,
                            rollback_error = %rollback_error,
                            "transfer rollback failed, funds at risk"
                        );
                        Err(LedgerError::Fatal {
                            from: from_id,
                            to: to_id,
                            amount,
                            reason: format!(
                                "credit failed ({credit_error:#}) and rollback failed ({rollback_error:#})"
                            ),
                        })
                    }
                }
            }
        }
    };

    drop(guard);
    committed
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount <= Amount::ZERO {
        return Err(LedgerError::Validation(format!(
            "Amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn ensure_non_negative(balance: Amount) -> Result<(), LedgerError> {
    if balance < Amount::ZERO {
        return Err(LedgerError::Validation(format!(
            "Balance must not be negative, got {balance}"
        )));
    }
    Ok(())
}

fn credit(account: &Account, amount: Amount) -> Result<Account, LedgerError> {
    account.credited(amount).ok_or_else(|| {
        LedgerError::Validation(format!(
            "Crediting {amount} would overflow the balance of account {}",
            account.id
        ))
    })
}

fn debit(account: &Account, amount: Amount) -> Result<Account, LedgerError> {
    account.debited(amount).ok_or_else(|| {
        LedgerError::Validation(format!(
            "Debiting {amount} would overflow the balance of account {}",
            account.id
        ))
    })
}

fn ensure_covers(account: &Account, amount: Amount) -> Result<(), LedgerError> {
    if !account.can_cover(amount) {
        return Err(LedgerError::InsufficientFunds {
            account_id: account.id,
            balance: account.balance,
            requested: amount,
        });
    }
    Ok(())
}
