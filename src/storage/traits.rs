//! Storage trait definitions
//!
//! A directory the user granted access to, the files created in it and
//! their sequential writers. The local filesystem implementation lives in
//! [`super::local`].

use super::artifact::ArtifactContent;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Finalize failed: {0}")]
    FinalizeFailure(String),

    #[error("Another recording is already being written")]
    SinkBusy,

    #[error("Writer is closed")]
    Closed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Content and size read back from a finished file
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub content: ArtifactContent,
    pub size_bytes: u64,
}

/// A destination directory
#[async_trait]
pub trait DirectoryHandle: fmt::Debug + Send + Sync {
    /// Display name of the directory
    fn name(&self) -> String;

    /// Create (or truncate) a file in this directory
    async fn create_file(&self, name: &str) -> StorageResult<Box<dyn FileHandle>>;
}

/// A file inside a [`DirectoryHandle`]
#[async_trait]
pub trait FileHandle: Send + Sync {
    fn name(&self) -> String;

    /// Open the file for sequential writing from the start
    async fn open_writable(&self) -> StorageResult<Box<dyn WritableHandle>>;

    /// Read back what was written, after the writable has been closed
    async fn read_back(&self) -> StorageResult<StoredContent>;
}

/// Sequential writer over a [`FileHandle`]
#[async_trait]
pub trait WritableHandle: Send {
    async fn write(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Flush and close. No writes are accepted afterwards.
    async fn close(&mut self) -> StorageResult<()>;
}

/// Create `name` in `directory` and write `data` in a single write
pub async fn write_whole(
    directory: &dyn DirectoryHandle,
    name: &str,
    data: &[u8],
) -> StorageResult<StoredContent> {
    let file = directory.create_file(name).await?;
    let mut writable = file.open_writable().await?;
    writable.write(data).await?;
    writable.close().await?;
    file.read_back().await
}
