//! Dagsmith CLI: layered ML pipeline configs to Airflow DAGs.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dagsmith",
    version,
    about = "Compile layered ML pipeline configurations into Airflow DAGs"
)]
struct Cli {
    #[command(subcommand)]
    command: dagsmith::cli::Commands,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAGSMITH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = dagsmith::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
