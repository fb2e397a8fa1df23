//! Atomic chunk publish: a chunk's files are written under a sibling temp
//! directory, then the whole directory is renamed into its final chunk
//! path.

use chain_time::{Time, TimeProvider};
use snafu::{ResultExt, Snafu};
use std::fs;
use std::path::{Path, PathBuf};

/// Errors raised while publishing a chunk directory.
#[derive(Debug, Snafu)]
pub enum PublishError {
    /// Failed to create the temp staging directory.
    #[snafu(display("could not create temp directory {path:?}: {source}"))]
    CreateTempDir { path: PathBuf, source: std::io::Error },

    /// Failed to write one of the chunk's table files.
    #[snafu(display("could not write {path:?}: {source}"))]
    WriteFile { path: PathBuf, source: std::io::Error },

    /// Failed to rename the temp directory into its final chunk path.
    #[snafu(display("could not publish {from:?} to {to:?}: {source}"))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Prefix a path's basename with `temp-<epoch-ms>-`. The millisecond
/// timestamp disambiguates staging directories left behind by a crashed
/// prior writer.
pub fn add_temp_prefix(path: &Path, now: Time) -> PathBuf {
    let ts_ms = now.date_time().timestamp_millis();
    let name = path
        .file_name()
        .expect("chunk path must have a final component")
        .to_string_lossy();
    let mut temp_name = format!("temp-{ts_ms}-");
    temp_name.push_str(&name);
    match path.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// A staging area for one chunk's files: callers write every table file
/// into the temp directory via [`StagedChunk::write_file`], then call
/// [`StagedChunk::publish`] to atomically rename it into place. If the
/// staging area is dropped without publishing (an error during writing),
/// the temp directory is left on disk for inspection rather than silently
/// removed.
#[derive(Debug)]
pub struct StagedChunk {
    temp_dir: PathBuf,
    final_dir: PathBuf,
}

impl StagedChunk {
    /// Begin staging a chunk that will ultimately live at `final_dir`,
    /// creating the backing temp directory under `final_dir`'s parent.
    pub fn begin(final_dir: &Path, time_provider: &dyn TimeProvider) -> Result<Self, PublishError> {
        let temp_dir = add_temp_prefix(final_dir, time_provider.now());
        fs::create_dir_all(&temp_dir).context(CreateTempDirSnafu { path: temp_dir.clone() })?;
        Ok(Self {
            temp_dir,
            final_dir: final_dir.to_path_buf(),
        })
    }

    /// The staging directory's path, for table writers to write into.
    pub fn dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Write one table's bytes into the staging directory under `name`
    /// (e.g. `"blocks.parquet"`).
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), PublishError> {
        let path = self.temp_dir.join(name);
        fs::write(&path, bytes).context(WriteFileSnafu { path })
    }

    /// Rename the staging directory into its final chunk path, making the
    /// chunk visible to readers atomically (a single directory rename on
    /// the same filesystem).
    pub fn publish(self) -> Result<PathBuf, PublishError> {
        if let Some(parent) = self.final_dir.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::rename(&self.temp_dir, &self.final_dir).context(RenameSnafu {
            from: self.temp_dir.clone(),
            to: self.final_dir.clone(),
        })?;
        Ok(self.final_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_time::SystemProvider;

    #[test]
    fn temp_prefix_keeps_parent_directory() {
        let path = Path::new("/data/0000000000/0000000000-0000000009-deadbeef");
        let now = Time::from_datetime(chrono::Utc::now());
        let temp = add_temp_prefix(path, now);
        assert_eq!(temp.parent().unwrap(), Path::new("/data/0000000000"));
        assert!(temp.file_name().unwrap().to_string_lossy().starts_with("temp-"));
        assert!(temp.file_name().unwrap().to_string_lossy().ends_with("0000000000-0000000009-deadbeef"));
    }

    #[test]
    fn stage_write_and_publish_moves_directory_into_place() {
        let root = tempfile::tempdir().unwrap();
        let final_dir = root.path().join("0000000000/0000000000-0000000009-deadbeef");

        let staged = StagedChunk::begin(&final_dir, &SystemProvider).unwrap();
        staged.write_file("blocks.parquet", b"fake parquet bytes").unwrap();
        assert!(!final_dir.exists());

        let published = staged.publish().unwrap();
        assert_eq!(published, final_dir);
        assert!(final_dir.join("blocks.parquet").exists());
    }
}
