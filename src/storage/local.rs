//! Local filesystem storage

use super::artifact::ArtifactContent;
use super::traits::{
    DirectoryHandle, FileHandle, StorageError, StorageResult, StoredContent, WritableHandle,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A directory on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirectory {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    async fn create_file(&self, name: &str) -> StorageResult<Box<dyn FileHandle>> {
        tokio::fs::create_dir_all(&self.path).await?;
        let path = self.path.join(name);
        tokio::fs::File::create(&path).await?;
        tracing::debug!("Created file {:?}", path);
        Ok(Box::new(LocalFile { path }))
    }
}

struct LocalFile {
    path: PathBuf,
}

#[async_trait]
impl FileHandle for LocalFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    async fn open_writable(&self) -> StorageResult<Box<dyn WritableHandle>> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        Ok(Box::new(LocalWritable { file: Some(file) }))
    }

    async fn read_back(&self) -> StorageResult<StoredContent> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(StoredContent {
            content: ArtifactContent::File(self.path.clone()),
            size_bytes: metadata.len(),
        })
    }
}

struct LocalWritable {
    file: Option<tokio::fs::File>,
}

#[async_trait]
impl WritableHandle for LocalWritable {
    async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        let mut file = self.file.take().ok_or(StorageError::Closed)?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
