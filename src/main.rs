mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => commands::scan::run(args).await?,
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
    }

    Ok(())
}
