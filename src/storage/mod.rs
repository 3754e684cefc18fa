mod memory;
mod sqlite;
mod store;

pub use memory::*;
pub use sqlite::*;
pub use store::*;

/// SQL migration for the accounts table
pub const MIGRATION_001_ACCOUNTS: &str = include_str!("migrations/001_accounts.sql");
