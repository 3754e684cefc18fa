use anyhow::Result;
use clap::Parser;
use tally::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tally::logging::init(cli.verbose);
    cli.run().await
}
