//! Per-subsystem `clap`-derive configuration blocks for the `archive`
//! binary: each subsystem (logging, RPC pool, ingest loop, chunk sink,
//! query executor) owns its own `Args` struct with `--flag`/`ENV_VAR`
//! pairs, and the binary's top-level `Config` flattens them together
//! per subcommand.

#![warn(missing_debug_implementations, missing_docs)]

/// Logging configuration shared by every subcommand, mirroring how
/// `observability_deps`/`logfmt` are wired up: a textual level filter and a
/// choice of human-readable vs. logfmt output.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Log filter directives, in `tracing_subscriber::EnvFilter` syntax
    /// (e.g. `info,ingest=debug`).
    #[clap(long = "log-filter", env = "ARCHIVE_LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    /// Emit logs as `logfmt` key=value lines instead of the default
    /// human-readable format.
    #[clap(long = "log-format-logfmt", env = "ARCHIVE_LOG_FORMAT_LOGFMT")]
    pub log_format_logfmt: bool,
}

/// One upstream RPC endpoint plus its per-endpoint budget, repeatable on
/// the command line (`--rpc-endpoint` may be passed multiple times).
#[derive(Debug, Clone, clap::Parser)]
pub struct RpcConfig {
    /// Upstream JSON-RPC endpoint URLs. Repeat the flag to configure a
    /// pool of endpoints; the RPC client load-balances across them.
    #[clap(long = "rpc-endpoint", env = "ARCHIVE_RPC_ENDPOINTS", value_delimiter = ',', required = true)]
    pub endpoints: Vec<String>,

    /// Max number of requests in flight per endpoint at once.
    #[clap(long = "rpc-capacity", env = "ARCHIVE_RPC_CAPACITY", default_value = "5")]
    pub capacity: usize,

    /// Per-request timeout.
    #[clap(long = "rpc-request-timeout", env = "ARCHIVE_RPC_REQUEST_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub request_timeout: std::time::Duration,

    /// Optional requests-per-second ceiling per endpoint. Unset means no
    /// limit beyond `--rpc-capacity`.
    #[clap(long = "rpc-rps-limit", env = "ARCHIVE_RPC_RPS_LIMIT")]
    pub rps_limit: Option<u32>,

    /// Sliding window, in seconds, used to compute the RPS rate.
    #[clap(long = "rpc-rps-window-secs", env = "ARCHIVE_RPC_RPS_WINDOW_SECS", default_value = "10")]
    pub rps_limit_window_secs: u32,

    /// JSON-RPC methods every configured endpoint is assumed not to
    /// support (e.g. a pool with no `debug_traceBlockByNumber`/`trace_block`
    /// archive node mixed in); the scheduler skips endpoints for these
    /// methods rather than dispatching a call known to fail.
    #[clap(long = "rpc-missing-method", env = "ARCHIVE_RPC_MISSING_METHODS", value_delimiter = ',')]
    pub missing_methods: Vec<String>,
}

impl RpcConfig {
    /// Build one [`rpc::EndpointConfig`] per configured endpoint, sharing
    /// this block's capacity/timeout/rps settings.
    pub fn endpoint_configs(&self) -> Vec<rpc::EndpointConfig> {
        self.endpoints
            .iter()
            .map(|url| rpc::EndpointConfig {
                url: url.clone(),
                capacity: self.capacity,
                request_timeout: self.request_timeout,
                rps_limit: self.rps_limit,
                rps_limit_window_secs: self.rps_limit_window_secs,
                missing_methods: self.missing_methods.iter().cloned().collect(),
            })
            .collect()
    }
}

/// Ingest loop configuration: which blocks to fetch, how far behind the
/// chain head to stay, and how much to overlap in flight.
#[derive(Debug, Clone, clap::Parser)]
pub struct IngestConfig {
    /// First block to ingest.
    #[clap(long = "from-block", env = "ARCHIVE_FROM_BLOCK", default_value = "0")]
    pub from_block: u64,

    /// Last block to ingest, inclusive. Omit to run forever, following the
    /// chain head.
    #[clap(long = "to-block", env = "ARCHIVE_TO_BLOCK")]
    pub to_block: Option<u64>,

    /// Blocks to stay behind the chain head, so reorgs don't invalidate
    /// already-fetched data.
    #[clap(long = "finality-offset", env = "ARCHIVE_FINALITY_OFFSET", default_value = "10")]
    pub finality_offset: u64,

    /// Blocks requested per stride.
    #[clap(long = "stride-size", env = "ARCHIVE_STRIDE_SIZE", default_value = "20")]
    pub stride_size: u64,

    /// Max number of in-flight strides.
    #[clap(long = "max-strides", env = "ARCHIVE_MAX_STRIDES", default_value = "10")]
    pub max_strides: usize,

    /// Fetch transaction receipts, filling in the transaction table's
    /// receipt-derived columns.
    #[clap(long = "with-receipts", env = "ARCHIVE_WITH_RECEIPTS")]
    pub with_receipts: bool,

    /// Fetch call traces and populate the trace table.
    #[clap(long = "with-traces", env = "ARCHIVE_WITH_TRACES")]
    pub with_traces: bool,

    /// Fetch state diffs and populate the state-diff table.
    #[clap(long = "with-statediffs", env = "ARCHIVE_WITH_STATEDIFFS")]
    pub with_statediffs: bool,

    /// Use `trace_block` instead of `debug_traceBlockByNumber` to fetch
    /// traces.
    #[clap(long = "use-trace-api", env = "ARCHIVE_USE_TRACE_API")]
    pub use_trace_api: bool,

    /// Use `debug_traceBlockByNumber` with a prestate tracer instead of
    /// `trace_replayBlockTransactions` to fetch state diffs.
    #[clap(long = "use-debug-api-for-statediffs", env = "ARCHIVE_USE_DEBUG_API_FOR_STATEDIFFS")]
    pub use_debug_api_for_statediffs: bool,
}

impl From<IngestConfig> for ingest::IngestConfig {
    fn from(cfg: IngestConfig) -> Self {
        ingest::IngestConfig {
            from_block: cfg.from_block,
            to_block: cfg.to_block,
            finality_offset: cfg.finality_offset,
            stride_size: cfg.stride_size,
            max_strides: cfg.max_strides,
            with_receipts: cfg.with_receipts,
            with_traces: cfg.with_traces,
            with_statediffs: cfg.with_statediffs,
            use_trace_api: cfg.use_trace_api,
            use_debug_api_for_statediffs: cfg.use_debug_api_for_statediffs,
        }
    }
}

/// Chunk sink / local layout configuration: where chunks are written and
/// how large a chunk is allowed to grow before it's frozen and flushed.
#[derive(Debug, Clone, clap::Parser)]
pub struct SinkConfig {
    /// Root directory of the dataset's Hive-style chunk layout.
    #[clap(long = "data-dir", env = "ARCHIVE_DATA_DIR")]
    pub data_dir: std::path::PathBuf,

    /// Buffered byte threshold that triggers freezing and flushing a chunk.
    #[clap(long = "flush-threshold-bytes", env = "ARCHIVE_FLUSH_THRESHOLD_BYTES", default_value = "134217728")]
    pub flush_threshold_bytes: usize,
}

/// Query executor configuration: per-query resource caps.
#[derive(Debug, Clone, clap::Parser)]
pub struct QueryConfig {
    /// Max response size, uncompressed, before a query is cut off early.
    #[clap(long = "query-size-limit-bytes", env = "ARCHIVE_QUERY_SIZE_LIMIT_BYTES", default_value = "41943040")]
    pub size_limit_bytes: u64,

    /// Hard cap on the gzip-compressed response size.
    #[clap(long = "query-response-byte-cap", env = "ARCHIVE_QUERY_RESPONSE_BYTE_CAP", default_value = "20971520")]
    pub response_byte_cap: u64,

    /// Wall-clock budget for executing a single query.
    #[clap(long = "query-time-budget", env = "ARCHIVE_QUERY_TIME_BUDGET", default_value = "2s", value_parser = humantime::parse_duration)]
    pub time_budget: std::time::Duration,
}

impl From<QueryConfig> for query_exec::ExecutorConfig {
    fn from(cfg: QueryConfig) -> Self {
        query_exec::ExecutorConfig {
            size_limit_bytes: cfg.size_limit_bytes,
            response_byte_cap: cfg.response_byte_cap,
            time_budget: cfg.time_budget,
        }
    }
}

/// Computes the ingest loop's polling backoff when it catches up to the
/// chain head, shared by the `ingest` subcommand's `ChainSource` impl.
#[derive(Debug, Clone, clap::Parser)]
pub struct BackoffConfig {
    /// Initial backoff before retrying a failed RPC call.
    #[clap(long = "backoff-initial", env = "ARCHIVE_BACKOFF_INITIAL", default_value = "100ms", value_parser = humantime::parse_duration)]
    pub init_backoff: std::time::Duration,

    /// Backoff ceiling; retries never wait longer than this.
    #[clap(long = "backoff-max", env = "ARCHIVE_BACKOFF_MAX", default_value = "30s", value_parser = humantime::parse_duration)]
    pub max_backoff: std::time::Duration,

    /// Multiplier applied to the backoff after each failed attempt.
    #[clap(long = "backoff-base", env = "ARCHIVE_BACKOFF_BASE", default_value = "3.0")]
    pub base: f64,
}

impl From<BackoffConfig> for backoff::BackoffConfig {
    fn from(cfg: BackoffConfig) -> Self {
        backoff::BackoffConfig {
            init_backoff: cfg.init_backoff,
            max_backoff: cfg.max_backoff,
            base: cfg.base,
        }
    }
}
