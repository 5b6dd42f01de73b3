//! Filesystem placement of completed downloads.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

/// Moves finished downloads from their temporary location to a named
/// destination inside a fixed directory, and removes leftovers of failed
/// transfers.
#[derive(Debug, Clone)]
pub struct DownloadedFiles {
    dir: PathBuf,
}

impl DownloadedFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Permanent path a file of this name ends up at.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Temporary path a transfer streams into before it is finalized.
    pub(crate) fn temp_path(&self, transport_id: u64) -> PathBuf {
        self.dir.join(format!(".download-{transport_id}.part"))
    }

    pub(crate) async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Move downloaded bytes to their permanent location.
    ///
    /// An existing file of the same name is always overwritten.
    pub async fn move_to_permanent(&self, temp: &Path, file_name: &str) -> io::Result<PathBuf> {
        self.ensure_dir().await?;
        let destination = self.path_for(file_name);
        if fs::try_exists(&destination).await? {
            fs::remove_file(&destination).await?;
        }
        fs::rename(temp, &destination).await?;
        Ok(destination)
    }

    /// Remove a downloaded file. Removing a file that does not exist is not
    /// an error.
    pub async fn remove(&self, file_name: &str) -> io::Result<()> {
        let destination = self.path_for(file_name);
        if fs::try_exists(&destination).await? {
            fs::remove_file(&destination).await?;
        }
        Ok(())
    }
}
