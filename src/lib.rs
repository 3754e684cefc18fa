pub mod application;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod storage;

pub use application::{LedgerEngine, LedgerError};
pub use domain::*;
pub use storage::{AccountStore, MemoryStore, SqliteStore};
