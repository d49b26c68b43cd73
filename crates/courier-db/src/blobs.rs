use std::path::PathBuf;

use anyhow::Result;
use tokio::fs;
use tracing::{info, warn};

/// File-backed blob area. Raw file bytes live outside the store, one flat
/// file per File record, named by the record's id.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self, file_id: &str) -> PathBuf {
        self.dir.join(file_id)
    }

    /// Open a fresh blob for streaming writes (TCP file bodies).
    pub async fn create(&self, file_id: &str) -> Result<fs::File> {
        let file = fs::File::create(self.path(file_id)).await?;
        Ok(file)
    }

    /// Persist a fully assembled blob in one shot (UDP reassembly).
    pub async fn write(&self, file_id: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.path(file_id), bytes).await?;
        Ok(())
    }

    pub async fn read(&self, file_id: &str) -> Result<Vec<u8>> {
        let bytes = fs::read(self.path(file_id)).await?;
        Ok(bytes)
    }

    /// Delete a blob, used to roll back failed transfers. A missing file is
    /// not an error.
    pub async fn remove(&self, file_id: &str) -> Result<()> {
        match fs::remove_file(self.path(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", file_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
