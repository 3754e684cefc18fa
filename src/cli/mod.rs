use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{DEFAULT_LOCK_TIMEOUT_MS, EngineConfig, LedgerEngine};
use crate::domain::{Account, AccountId, AccountPatch, NewAccount, format_amount, parse_amount};
use crate::storage::{PageRequest, SqliteStore};

/// Tally - account ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Manage accounts and move money between them")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "LEDGER_DATABASE", default_value = "tally.db")]
    pub database: String,

    /// Maximum time to wait for a busy account, in milliseconds
    #[arg(long, env = "LEDGER_LOCK_TIMEOUT_MS", default_value_t = DEFAULT_LOCK_TIMEOUT_MS)]
    pub lock_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print accounts as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Add money to an account
    Deposit {
        /// Account ID
        id: AccountId,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,
    },

    /// Take money out of an account
    Withdraw {
        /// Account ID
        id: AccountId,

        /// Amount to withdraw (e.g., "50.00" or "50")
        amount: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account ID
        #[arg(long)]
        from: AccountId,

        /// Destination account ID
        #[arg(long)]
        to: AccountId,
    },

    /// Balance reports
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Create {
        /// Account number (free-form)
        number: String,

        /// Opening balance
        #[arg(short, long, default_value = "0")]
        balance: String,
    },

    /// List accounts
    List {
        /// Show a single page (zero-based) instead of every account
        #[arg(long)]
        page: Option<usize>,

        /// Page size, used with --page
        #[arg(long, default_value_t = 20)]
        size: usize,
    },

    /// Show one account
    Show {
        /// Account ID
        id: AccountId,
    },

    /// Replace an account's number and balance
    Update {
        /// Account ID
        id: AccountId,

        /// New account number
        number: String,

        /// New balance
        #[arg(short, long)]
        balance: String,
    },

    /// Change only the given fields of an account
    Patch {
        /// Account ID
        id: AccountId,

        /// New account number
        #[arg(short, long)]
        number: Option<String>,

        /// New balance
        #[arg(short, long)]
        balance: Option<String>,
    },

    /// Delete an account
    Delete {
        /// Account ID
        id: AccountId,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Accounts with a balance below a threshold
    Below {
        /// Threshold amount (exclusive)
        threshold: String,
    },

    /// Accounts with a positive balance
    Funded,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout_ms: self.lock_timeout_ms,
        }
    }

    async fn open(&self) -> Result<LedgerEngine<SqliteStore>> {
        let store = SqliteStore::connect(&format!("sqlite:{}", self.database)).await?;
        Ok(LedgerEngine::with_config(store, self.engine_config()))
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Commands::Init => {
                SqliteStore::init(&format!("sqlite:{}?mode=rwc", self.database)).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(cmd) => {
                let engine = self.open().await?;
                run_account_command(&engine, cmd, self.json).await?;
            }

            Commands::Deposit { id, amount } => {
                let engine = self.open().await?;
                let amount = parse_amount(amount).context("Invalid amount format")?;
                let account = engine.deposit(*id, amount).await?;
                println!("Deposited {} into account {}", format_amount(amount), id);
                print_account(&account, self.json)?;
            }

            Commands::Withdraw { id, amount } => {
                let engine = self.open().await?;
                let amount = parse_amount(amount).context("Invalid amount format")?;
                let account = engine.withdraw(*id, amount).await?;
                println!("Withdrew {} from account {}", format_amount(amount), id);
                print_account(&account, self.json)?;
            }

            Commands::Transfer { amount, from, to } => {
                let engine = self.open().await?;
                let amount = parse_amount(amount).context("Invalid amount format")?;
                let result = engine.transfer(*from, *to, amount).await?;
                println!(
                    "Transferred {} from account {} to account {}",
                    format_amount(result.amount),
                    result.from.id,
                    result.to.id
                );
                print_accounts(&[result.from, result.to], self.json)?;
            }

            Commands::Report(cmd) => {
                let engine = self.open().await?;
                run_report_command(&engine, cmd, self.json).await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(
    engine: &LedgerEngine<SqliteStore>,
    cmd: &AccountCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        AccountCommands::Create { number, balance } => {
            let balance = parse_amount(balance).context("Invalid balance format")?;
            let account = engine
                .create_account(NewAccount::new(number.clone(), balance))
                .await?;
            println!("Created account {} ({})", account.id, account.account_number);
            print_account(&account, json)?;
        }

        AccountCommands::List { page, size } => match page {
            Some(page) => {
                let page = engine.list_page(PageRequest::new(*page, *size)).await?;
                print_accounts(&page.items, json)?;
                if !json {
                    println!(
                        "\nPage {} of {} ({} accounts)",
                        page.page + 1,
                        page.total_pages().max(1),
                        page.total
                    );
                }
            }
            None => print_accounts(&engine.list_accounts().await?, json)?,
        },

        AccountCommands::Show { id } => {
            let account = engine.get_account(*id).await?;
            print_account(&account, json)?;
        }

        AccountCommands::Update {
            id,
            number,
            balance,
        } => {
            let balance = parse_amount(balance).context("Invalid balance format")?;
            let account = engine
                .update_account(*id, NewAccount::new(number.clone(), balance))
                .await?;
            print_account(&account, json)?;
        }

        AccountCommands::Patch {
            id,
            number,
            balance,
        } => {
            let mut patch = AccountPatch::default();
            if let Some(number) = number {
                patch = patch.with_account_number(number.clone());
            }
            if let Some(balance) = balance {
                patch =
                    patch.with_balance(parse_amount(balance).context("Invalid balance format")?);
            }
            let account = engine.partial_update(*id, patch).await?;
            print_account(&account, json)?;
        }

        AccountCommands::Delete { id } => {
            engine.delete_account(*id).await?;
            println!("Deleted account {}", id);
        }
    }
    Ok(())
}

async fn run_report_command(
    engine: &LedgerEngine<SqliteStore>,
    cmd: &ReportCommands,
    json: bool,
) -> Result<()> {
    let accounts = match cmd {
        ReportCommands::Below { threshold } => {
            let threshold = parse_amount(threshold).context("Invalid threshold format")?;
            engine.accounts_below(threshold).await?
        }
        ReportCommands::Funded => engine.funded_accounts().await?,
    };
    print_accounts(&accounts, json)
}

fn print_account(account: &Account, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(account)?);
    } else {
        println!("Account: {}", account.id);
        println!("  Number:  {}", account.account_number);
        println!("  Balance: {}", format_amount(account.balance));
    }
    Ok(())
}

fn print_accounts(accounts: &[Account], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("No accounts found.");
    } else {
        println!("{:<8} {:<24} {:>14}", "ID", "NUMBER", "BALANCE");
        println!("{}", "-".repeat(48));
        for account in accounts {
            println!(
                "{:<8} {:<24} {:>14}",
                account.id,
                truncate(&account.account_number, 24),
                format_amount(account.balance)
            );
        }
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
