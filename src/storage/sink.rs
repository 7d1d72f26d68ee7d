//! Where a session's encoded chunks go

use super::artifact::RecordingArtifact;
use super::traits::{write_whole, DirectoryHandle};
use super::writer::IncrementalWriter;
use std::sync::Arc;

/// How chunks are persisted during a session
pub enum PersistenceMode {
    /// Accumulated in memory, assembled at stop
    Deferred(Vec<Vec<u8>>),
    /// Streamed to the destination as they arrive
    Incremental(IncrementalWriter),
}

/// Chunk sink for one session
pub struct PersistenceSink {
    name: String,
    mode: PersistenceMode,
}

impl PersistenceSink {
    pub fn deferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: PersistenceMode::Deferred(Vec::new()),
        }
    }

    pub fn incremental(writer: IncrementalWriter) -> Self {
        Self {
            name: writer.name().to_string(),
            mode: PersistenceMode::Incremental(writer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self.mode, PersistenceMode::Incremental(_))
    }

    /// Take the next encoded chunk
    pub fn accept(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        match &mut self.mode {
            PersistenceMode::Deferred(chunks) => chunks.push(chunk),
            PersistenceMode::Incremental(writer) => writer.append(chunk),
        }
    }

    /// Produce the session's artifact.
    ///
    /// In deferred mode the chunks are concatenated in arrival order and,
    /// when `autosave` is given, also written there in a single write.
    /// Autosave failures are logged; the in-memory artifact is still returned.
    pub async fn finish(self, autosave: Option<Arc<dyn DirectoryHandle>>) -> Option<RecordingArtifact> {
        match self.mode {
            PersistenceMode::Incremental(writer) => writer.finalize().await,
            PersistenceMode::Deferred(chunks) => {
                let bytes = chunks.concat();
                tracing::info!(
                    "Assembled {} from {} chunks ({} bytes)",
                    self.name,
                    chunks.len(),
                    bytes.len()
                );

                if let Some(directory) = autosave {
                    match write_whole(directory.as_ref(), &self.name, &bytes).await {
                        Ok(stored) => tracing::info!(
                            "Saved {} to {} ({} bytes)",
                            self.name,
                            directory.name(),
                            stored.size_bytes
                        ),
                        Err(e) => tracing::warn!(
                            "Failed to save {} to {}: {}",
                            self.name,
                            directory.name(),
                            e
                        ),
                    }
                }

                Some(RecordingArtifact::in_memory(self.name, bytes))
            }
        }
    }
}
