//! `archive query`: run one declarative [`chain_types::query::ArchiveQuery`]
//! against a local chunk layout and write the gzipped JSON response.

use archive_config::QueryConfig;
use query_exec::ExecError;
use snafu::{ResultExt, Snafu};
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read query from {path}: {source}"))]
    ReadQuery { path: String, source: std::io::Error },

    #[snafu(display("query is not valid JSON: {source}"))]
    ParseQuery { source: serde_json::Error },

    #[snafu(display("failed to execute query: {source}"))]
    Execute { source: ExecError },

    #[snafu(display("failed to write response to {path}: {source}"))]
    WriteResponse { path: String, source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub struct Config {
    /// Root directory of the dataset's chunk layout.
    #[clap(long = "data-dir", env = "ARCHIVE_DATA_DIR")]
    data_dir: PathBuf,

    /// Path to a JSON-encoded query. Reads from stdin when omitted.
    #[clap(long = "query-file")]
    query_file: Option<PathBuf>,

    /// Where to write the gzipped JSON response. Writes to stdout when
    /// omitted.
    #[clap(long = "output")]
    output: Option<PathBuf>,

    /// Print the SHA3-256 hash of the compressed response to stderr instead
    /// of skipping the hash computation.
    #[clap(long = "hash")]
    compute_hash: bool,

    #[clap(flatten)]
    query_config: QueryConfig,
}

fn read_query(path: &Option<PathBuf>) -> Result<chain_types::query::ArchiveQuery> {
    let body = match path {
        Some(path) => std::fs::read_to_string(path).context(ReadQuerySnafu { path: path.display().to_string() })?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context(ReadQuerySnafu { path: "<stdin>".to_string() })?;
            buf
        }
    };
    serde_json::from_str(&body).context(ParseQuerySnafu)
}

pub async fn command(config: Config) -> Result<()> {
    let query = read_query(&config.query_file)?;
    let model = query_plan::eth_model();
    let layout = layout::LocalLayout::new(&config.data_dir);
    let executor_config: query_exec::ExecutorConfig = config.query_config.into();

    let result = query_exec::execute_query(&layout, &config.data_dir, &model, &query, &executor_config, config.compute_hash)
        .context(ExecuteSnafu)?;

    observability_deps::tracing::info!(
        num_chunks_read = result.num_chunks_read,
        last_visited_block = result.last_visited_block,
        uncompressed_size = result.uncompressed_size,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "query executed"
    );
    if let Some(hash) = &result.hash {
        let hex_hash: String = hash.iter().map(|b| format!("{b:02x}")).collect();
        observability_deps::tracing::info!(hash = %hex_hash, "response hash");
    }

    match &config.output {
        Some(path) => {
            std::fs::write(path, &result.compressed_bytes).context(WriteResponseSnafu { path: path.display().to_string() })?;
        }
        None => {
            std::io::stdout()
                .write_all(&result.compressed_bytes)
                .context(WriteResponseSnafu { path: "<stdout>".to_string() })?;
        }
    }

    Ok(())
}
