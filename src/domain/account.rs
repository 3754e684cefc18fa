use serde::{Deserialize, Serialize};

use super::Amount;

/// Store-assigned account identifier. Never reused after deletion.
pub type AccountId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Amount,
    /// Number of committed writes. A store only accepts a save carrying the
    /// version it currently holds.
    #[serde(default)]
    pub version: i64,
}

impl Account {
    /// Returns true if the balance covers a debit of `amount`.
    pub fn can_cover(&self, amount: Amount) -> bool {
        self.balance >= amount
    }

    /// Copy of this account with `amount` added to the balance, or `None`
    /// if the result does not fit in a `Decimal`.
    pub fn credited(&self, amount: Amount) -> Option<Self> {
        Some(Self {
            balance: self.balance.checked_add(amount)?,
            ..self.clone()
        })
    }

    /// Copy of this account with `amount` taken from the balance, or `None`
    /// on overflow. Callers check `can_cover` first.
    pub fn debited(&self, amount: Amount) -> Option<Self> {
        Some(Self {
            balance: self.balance.checked_sub(amount)?,
            ..self.clone()
        })
    }
}

/// An account that has not been persisted yet, so it has no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub account_number: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Amount,
}

impl NewAccount {
    pub fn new(account_number: impl Into<String>, balance: Amount) -> Self {
        Self {
            account_number: account_number.into(),
            balance,
        }
    }

    /// An account opened with a zero balance.
    pub fn empty(account_number: impl Into<String>) -> Self {
        Self::new(account_number, Amount::ZERO)
    }
}

/// Sparse update: only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPatch {
    pub account_number: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub balance: Option<Amount>,
}

impl AccountPatch {
    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    pub fn with_balance(mut self, balance: Amount) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.account_number.is_none() && self.balance.is_none()
    }

    /// Apply the present fields on top of `account`.
    pub fn apply_to(&self, account: &Account) -> Account {
        Account {
            id: account.id,
            account_number: self
                .account_number
                .clone()
                .unwrap_or_else(|| account.account_number.clone()),
            balance: self.balance.unwrap_or(account.balance),
            version: account.version,
        }
    }
}
