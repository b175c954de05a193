// coectl - multi-cloud container cluster manager

mod account;
mod cache;
mod cli;
mod client;
mod console;
mod credentials;
mod error;
mod models;
mod paths;
mod service;
mod version;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing based on the verbose flag.
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = cli::execute(args).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
