//! Finished recordings

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;

/// Where an artifact's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    /// Held in memory
    Memory(Arc<Vec<u8>>),
    /// Written to a file
    File(PathBuf),
}

impl ArtifactContent {
    /// Load the full content
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            ArtifactContent::Memory(bytes) => Ok(bytes.as_ref().clone()),
            ArtifactContent::File(path) => tokio::fs::read(path).await,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ArtifactContent::File(path) => Some(path),
            ArtifactContent::Memory(_) => None,
        }
    }
}

impl Serialize for ArtifactContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArtifactContent::Memory(bytes) => {
                serializer.serialize_str(&format!("memory:{} bytes", bytes.len()))
            }
            ArtifactContent::File(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

/// A completed recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingArtifact {
    pub name: String,
    pub size_bytes: u64,
    pub content: ArtifactContent,
}

impl RecordingArtifact {
    pub fn in_memory(name: String, bytes: Vec<u8>) -> Self {
        Self {
            name,
            size_bytes: bytes.len() as u64,
            content: ArtifactContent::Memory(Arc::new(bytes)),
        }
    }

    /// Size in megabytes, rounded to two decimals for display
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// `{prefix}-YYYYMMDD-hhmmss.{extension}`
pub fn artifact_file_name(prefix: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{}-{}.{}", prefix, at.format("%Y%m%d-%H%M%S"), extension)
}
