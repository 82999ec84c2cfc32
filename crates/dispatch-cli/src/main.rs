//! Dispatch CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::Commands;
use config::DispatchConfig;

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(author, version, about = "Order dispatch with a tag-invalidated cache", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./dispatch.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the dispatch crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "info,dispatch=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = DispatchConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Quote { from, to, discount } => handlers::quote_delivery(&from, &to, discount)?,
        Commands::Demo { orders } => handlers::demo(&config, orders).await?,
        Commands::Migrate { database_url } => handlers::migrate(&config, database_url).await?,
        Commands::Config => handlers::show_config(&config)?,
    }

    Ok(())
}
