use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sapl")]
#[command(about = "SAPL CLI: evaluate authorization subscriptions against a PDP configuration")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./sapl.toml when present)
    #[arg(long, global = true, env = "SAPL_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON document per line
    #[default]
    Json,
    /// Indented JSON
    Pretty,
    /// Colored one-line summary
    Text,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a subscription against a configuration
    Decide(DecideArgs),
    /// Compile a configuration and report errors
    Check(CheckArgs),
    /// Print the effective settings as TOML
    Settings,
}

#[derive(clap::Args)]
pub struct DecideArgs {
    /// Path to the JSON encoded PDP configuration
    #[arg(long, env = "SAPL_CONFIG")]
    pub config: PathBuf,
    /// Path to the JSON encoded authorization subscription
    #[arg(long)]
    pub subscription: PathBuf,
    /// Keep printing decisions as they change
    #[arg(long)]
    pub stream: bool,
    /// Stop streaming after this many decisions
    #[arg(long, requires = "stream")]
    pub take: Option<usize>,
    /// Log a decision report for every decision
    #[arg(long)]
    pub report: bool,
}

#[derive(clap::Args)]
pub struct CheckArgs {
    /// Path to the JSON encoded PDP configuration
    #[arg(long, env = "SAPL_CONFIG")]
    pub config: PathBuf,
}
