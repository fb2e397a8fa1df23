//! `archive validate-layout`: check a local chunk layout's structural
//! invariants without reading any table data.

use layout::LayoutError;
use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("layout at {data_dir} is invalid: {source}"))]
    Invalid { data_dir: String, source: LayoutError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub struct Config {
    /// Root directory of the dataset's chunk layout.
    #[clap(long = "data-dir", env = "ARCHIVE_DATA_DIR")]
    data_dir: PathBuf,
}

pub fn command(config: Config) -> Result<()> {
    let local = layout::LocalLayout::new(&config.data_dir);
    layout::validate_layout(&local).context(InvalidSnafu { data_dir: config.data_dir.display().to_string() })?;
    observability_deps::tracing::info!(data_dir = %config.data_dir.display(), "layout is structurally valid");
    Ok(())
}
