//! Recording persistence
//!
//! Destination directories, the incremental writer that streams chunks
//! while recording, and the artifacts that come out at the end.

pub mod artifact;
pub mod destinations;
pub mod local;
pub mod sink;
pub mod traits;
pub mod writer;

pub use artifact::{artifact_file_name, ArtifactContent, RecordingArtifact};
pub use destinations::DestinationTable;
pub use local::LocalDirectory;
pub use sink::{PersistenceMode, PersistenceSink};
pub use traits::{
    write_whole, DirectoryHandle, FileHandle, StorageError, StorageResult, StoredContent,
    WritableHandle,
};
pub use writer::{IncrementalWriter, SinkSlot};
