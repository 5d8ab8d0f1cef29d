mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;
use sapl_pdp::{Settings, init_tracing};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.settings.as_deref())?;
    init_tracing(&settings.logging);
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Decide(args) => {
            commands::decide::decide(args, &settings, format).await?;
        }
        Commands::Check(args) => {
            commands::check::check(&args.config, &settings)?;
        }
        Commands::Settings => {
            commands::settings::show(&settings)?;
        }
    }

    Ok(())
}
