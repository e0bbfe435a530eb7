use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::application::ports::{UploadSink, UploadStorePort};
use crate::domain::errors::{DomainError, DomainResult};

/// Writes `bytes` verbatim to `dest` in one go. Same semantics as a
/// single-chunk upload through [`FsUploadStore`].
pub async fn save_file(bytes: &[u8], dest: &Path) -> DomainResult<u64> {
    let mut sink = FsUploadStore::new().create(dest).await?;
    if let Err(e) = sink.write_chunk(bytes).await {
        sink.abort().await;
        return Err(e);
    }
    sink.finish().await
}

/// Upload storage on the local filesystem. Parent directories are created on
/// demand and existing files are overwritten. Not atomic.
pub struct FsUploadStore;

impl FsUploadStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FsUploadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadStorePort for FsUploadStore {
    async fn create(&self, dest: &Path) -> DomainResult<Box<dyn UploadSink>> {
        if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DomainError::Upload(format!("cannot create {}: {e}", dir.display())))?;
        }
        let file = File::create(dest)
            .await
            .map_err(|e| DomainError::Upload(format!("cannot write {}: {e}", dest.display())))?;
        Ok(Box::new(FsUploadSink { file, dest: dest.to_path_buf(), written: 0 }))
    }
}

struct FsUploadSink {
    file: File,
    dest: PathBuf,
    written: u64,
}

#[async_trait]
impl UploadSink for FsUploadSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> DomainResult<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| DomainError::Upload(format!("cannot write {}: {e}", self.dest.display())))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> DomainResult<u64> {
        self.file
            .flush()
            .await
            .map_err(|e| DomainError::Upload(format!("cannot write {}: {e}", self.dest.display())))?;
        Ok(self.written)
    }

    async fn abort(self: Box<Self>) {
        let FsUploadSink { file, dest, .. } = *self;
        drop(file);
        match tokio::fs::remove_file(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial upload {}: {}", dest.display(), e),
        }
    }
}
