// Application layer: the ledger engine and everything it needs to keep
// balances consistent (error taxonomy, lock table, configuration).

mod config;
mod engine;
pub mod error;
mod locks;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use locks::*;
