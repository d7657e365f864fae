use anyhow::Result;
use clap::Parser;
use lucrum::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}
