//! CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parley_cli::{Cli, CliError, Commands, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before parsing so `PARLEY_CONFIG` can come from .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Simulate(args) => handlers::simulate::execute(cli.config.as_deref(), args).await,
        Commands::Config { command } => handlers::config::execute(cli.config.as_deref(), &command),
    };

    if let Err(err) = result {
        if let Some(cli_err) = err.downcast_ref::<CliError>() {
            eprintln!("Error: {err:#}");
            std::process::exit(cli_err.exit_code());
        }
        return Err(err);
    }
    Ok(())
}

/// Logs go to stderr so simulated event output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
