//! Entry point for the `archive` binary: a single-process CLI exposing the
//! ingest loop, the query executor, and a layout validator as subcommands.

mod commands;

use archive_config::LoggingConfig;
use clap::Parser;
use observability_deps::tracing;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_format_logfmt {
        let subscriber = Registry::default().with(filter).with(logfmt::LogFmtLayer::new());
        tracing::subscriber::set_global_default(subscriber).expect("failed to install logfmt subscriber");
    } else {
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber).expect("failed to install fmt subscriber");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = commands::Config::parse();
    init_logging(&config.logging_config);

    if let Err(e) = commands::command(config).await {
        tracing::error!(error = %e, "archive command failed");
        std::process::exit(1);
    }
}
