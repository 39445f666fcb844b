//! Infragraph CLI: resolve infrastructure graphs against a knowledge base.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "infragraph",
    version,
    about = "Grow a partial infrastructure graph into a complete one"
)]
struct Cli {
    #[command(subcommand)]
    command: infragraph::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = infragraph::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
