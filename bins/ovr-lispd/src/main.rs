use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lisp::Daemon;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "ovr-lispd", about = "LISP control-plane daemon")]
struct Cli {
    /// Sets a custom config file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/ovr/lispd.toml"
    )]
    config: PathBuf,

    /// Enables verbose output on STDOUT
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(config = %cli.config.display(), "loading configuration");
    let settings = config::load(&cli.config)?;

    let mut daemon = Daemon::new(settings);
    Ok(daemon.run()?)
}
