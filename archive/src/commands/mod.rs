use snafu::{ResultExt, Snafu};

pub mod ingest;
pub mod query;
pub mod validate_layout;

#[derive(Debug, Snafu)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("error in ingest subcommand: {source}"))]
    IngestError { source: ingest::Error },

    #[snafu(display("error in query subcommand: {source}"))]
    QueryError { source: query::Error },

    #[snafu(display("error in validate-layout subcommand: {source}"))]
    ValidateLayoutError { source: validate_layout::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub struct Config {
    #[clap(flatten)]
    pub logging_config: archive_config::LoggingConfig,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Follow a chain and append ingested blocks to the local chunk layout.
    Ingest(ingest::Config),

    /// Run one declarative query against a local chunk layout and print the
    /// gzipped JSON response.
    Query(query::Config),

    /// Check a local chunk layout's structural invariants.
    ValidateLayout(validate_layout::Config),
}

pub async fn command(config: Config) -> Result<()> {
    match config.command {
        Command::Ingest(config) => ingest::command(config).await.context(IngestSnafu),
        Command::Query(config) => query::command(config).await.context(QuerySnafu),
        Command::ValidateLayout(config) => validate_layout::command(config).context(ValidateLayoutSnafu),
    }
}
