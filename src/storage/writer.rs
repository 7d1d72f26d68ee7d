//! Incremental persistence writer
//!
//! Encoded chunks are streamed to the destination file while recording is
//! still running. Appends never block the caller: each chunk is queued on a
//! single FIFO consumed by one writer task, so writes land strictly in
//! append order and a write only starts once the previous one completed.

use super::artifact::RecordingArtifact;
use super::traits::{DirectoryHandle, FileHandle, StorageError, StorageResult, WritableHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Guards the single open incremental sink
#[derive(Debug, Clone, Default)]
pub struct SinkSlot {
    busy: Arc<AtomicBool>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn claim(&self) -> StorageResult<SinkClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StorageError::SinkBusy)?;
        Ok(SinkClaim {
            busy: self.busy.clone(),
        })
    }
}

/// Holding this means owning the slot; dropping it frees the slot
struct SinkClaim {
    busy: Arc<AtomicBool>,
}

impl Drop for SinkClaim {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

enum WriteOp {
    Chunk(Vec<u8>),
    Finalize(oneshot::Sender<Option<RecordingArtifact>>),
}

/// An open incremental sink
pub struct IncrementalWriter {
    name: String,
    ops: mpsc::UnboundedSender<WriteOp>,
}

impl IncrementalWriter {
    /// Create `name` in `directory`, open it for writing and claim `slot`.
    pub async fn begin(
        slot: &SinkSlot,
        directory: &dyn DirectoryHandle,
        name: &str,
    ) -> StorageResult<Self> {
        // Released again if anything below fails
        let claim = slot.claim()?;

        let file = directory.create_file(name).await?;
        let writable = file.open_writable().await?;

        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(claim, name.to_string(), file, writable, rx));

        tracing::info!("Streaming recording to {}/{}", directory.name(), name);

        Ok(Self {
            name: name.to_string(),
            ops,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a chunk behind every previously appended one
    pub fn append(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        if self.ops.send(WriteOp::Chunk(chunk)).is_err() {
            tracing::warn!("Writer for {} is gone, chunk dropped", self.name);
        }
    }

    /// Wait for all queued writes, close the file and read it back.
    ///
    /// Returns None when closing or reading back fails. The sink slot is
    /// released either way.
    pub async fn finalize(self) -> Option<RecordingArtifact> {
        let (reply, rx) = oneshot::channel();
        if self.ops.send(WriteOp::Finalize(reply)).is_err() {
            tracing::warn!("Writer for {} is gone, nothing to finalize", self.name);
            return None;
        }
        rx.await.ok().flatten()
    }
}

async fn run_writer(
    claim: SinkClaim,
    name: String,
    file: Box<dyn FileHandle>,
    mut writable: Box<dyn WritableHandle>,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
) {
    let mut written: u64 = 0;
    let mut index: usize = 0;

    while let Some(op) = ops.recv().await {
        match op {
            WriteOp::Chunk(data) => {
                match writable.write(&data).await {
                    Ok(()) => {
                        written += data.len() as u64;
                        tracing::debug!("Wrote chunk {} ({} bytes) to {}", index, data.len(), name);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to write chunk {} to {}: {}", index, name, e);
                    }
                }
                index += 1;
            }
            WriteOp::Finalize(reply) => {
                let artifact = finish(&name, file.as_ref(), writable.as_mut()).await;
                drop(claim);
                if let Some(artifact) = &artifact {
                    tracing::info!(
                        "Finalized {} ({} bytes written, {} bytes on disk)",
                        artifact.name,
                        written,
                        artifact.size_bytes
                    );
                }
                let _ = reply.send(artifact);
                return;
            }
        }
    }

    // Dropped without finalize
    if let Err(e) = writable.close().await {
        tracing::warn!("Failed to close abandoned writer for {}: {}", name, e);
    }
}

async fn finish(
    name: &str,
    file: &dyn FileHandle,
    writable: &mut dyn WritableHandle,
) -> Option<RecordingArtifact> {
    if let Err(e) = writable.close().await {
        tracing::error!("Failed to close {}: {}", name, e);
        return None;
    }

    match file.read_back().await {
        Ok(stored) => Some(RecordingArtifact {
            name: name.to_string(),
            size_bytes: stored.size_bytes,
            content: stored.content,
        }),
        Err(e) => {
            tracing::error!("Failed to read back {}: {}", name, e);
            None
        }
    }
}
