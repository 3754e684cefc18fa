use std::str::FromStr;

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{Account, AccountId, Amount, NewAccount};

use super::{AccountStore, MIGRATION_001_ACCOUNTS, Page, PageRequest, StaleWrite};

/// Account store backed by a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL, e.g. `sqlite:ledger.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_ACCOUNTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let balance_str: String = row.get("balance");

        Ok(Account {
            id: row.get("id"),
            account_number: row.get("account_number"),
            balance: Decimal::from_str(&balance_str)
                .with_context(|| format!("Invalid stored balance: {}", balance_str))?,
            version: row.get("version"),
        })
    }

    /// Version-checked update on one connection. Several processes may
    /// open the same file, so the check happens in the `WHERE` clause.
    async fn update_current(conn: &mut SqliteConnection, account: &Account) -> Result<Account> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET account_number = ?, balance = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&account.account_number)
        .bind(account.balance.to_string())
        .bind(account.id)
        .bind(account.version)
        .execute(&mut *conn)
        .await
        .context("Failed to save account")?;

        if result.rows_affected() == 0 {
            let present: i64 =
                sqlx::query("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?) AS present")
                    .bind(account.id)
                    .fetch_one(&mut *conn)
                    .await
                    .context("Failed to check account existence")?
                    .get("present");
            if present == 0 {
                bail!("Account {} does not exist", account.id);
            }
            return Err(StaleWrite {
                account_id: account.id,
                expected: account.version,
            }
            .into());
        }

        Ok(Account {
            version: account.version + 1,
            ..account.clone()
        })
    }

    /// Balances are decimal TEXT, so SQL comparisons would be lexicographic.
    /// Filtering is done on parsed values instead.
    async fn find_matching(&self, keep: impl Fn(&Account) -> bool) -> Result<Vec<Account>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|account| keep(account))
            .collect())
    }
}

impl AccountStore for SqliteStore {
    async fn create(&self, account: NewAccount) -> Result<Account> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (account_number, balance)
            VALUES (?, ?)
            RETURNING id
            "#,
        )
        .bind(&account.account_number)
        .bind(account.balance.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to create account")?;

        Ok(Account {
            id: row.get("id"),
            account_number: account.account_number,
            balance: account.balance,
            version: 0,
        })
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::update_current(&mut *conn, account).await
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    async fn save_all(&self, accounts: Vec<Account>) -> Result<Vec<Account>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut saved = Vec::with_capacity(accounts.len());
        for account in &accounts {
            // On error the dropped transaction rolls back
            saved.push(Self::update_current(&mut *tx, account).await?);
        }

        tx.commit().await.context("Failed to commit batch")?;
        Ok(saved)
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_number, balance, version
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn exists_by_id(&self, id: AccountId) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check account existence")?;

        Ok(row.get::<i64, _>("present") != 0)
    }

    async fn delete_by_id(&self, id: AccountId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete account")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_all(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT id, account_number, balance, version FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn find_page(&self, request: PageRequest) -> Result<Page<Account>> {
        let (limit, offset) = request.bounds().with_context(|| {
            format!(
                "Page {} of size {} is out of range",
                request.page, request.size
            )
        })?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM accounts")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count accounts")?
            .get("total");

        let rows = sqlx::query(
            r#"
            SELECT id, account_number, balance, version
            FROM accounts
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list account page")?;

        Ok(Page {
            items: rows
                .iter()
                .map(Self::row_to_account)
                .collect::<Result<Vec<_>>>()?,
            page: request.page,
            size: request.size,
            total: total as u64,
        })
    }

    async fn find_by_balance_less_than(&self, threshold: Amount) -> Result<Vec<Account>> {
        self.find_matching(|account| account.balance < threshold)
            .await
    }

    async fn find_by_balance_greater_than_zero(&self) -> Result<Vec<Account>> {
        self.find_matching(|account| account.balance > Amount::ZERO)
            .await
    }
}
