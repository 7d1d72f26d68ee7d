//! Destination directory lookup
//!
//! A global default directory plus per-schedule overrides. Finished
//! recordings are routed by the owner tag of their session.

use super::traits::DirectoryHandle;
use crate::schedule::ScheduleId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DestinationTable {
    default: RwLock<Option<Arc<dyn DirectoryHandle>>>,
    overrides: RwLock<HashMap<ScheduleId, Arc<dyn DirectoryHandle>>>,
}

impl DestinationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&self, directory: Option<Arc<dyn DirectoryHandle>>) {
        *self.default.write() = directory;
    }

    pub fn default_directory(&self) -> Option<Arc<dyn DirectoryHandle>> {
        self.default.read().clone()
    }

    pub fn set_override(&self, id: ScheduleId, directory: Arc<dyn DirectoryHandle>) {
        self.overrides.write().insert(id, directory);
    }

    pub fn remove_override(&self, id: &ScheduleId) -> Option<Arc<dyn DirectoryHandle>> {
        self.overrides.write().remove(id)
    }

    pub fn override_for(&self, id: &ScheduleId) -> Option<Arc<dyn DirectoryHandle>> {
        self.overrides.read().get(id).cloned()
    }

    /// Destination for a session: the owner's override, else the default
    pub fn resolve(&self, owner: Option<&ScheduleId>) -> Option<Arc<dyn DirectoryHandle>> {
        owner
            .and_then(|id| self.override_for(id))
            .or_else(|| self.default_directory())
    }

    /// Like [`resolve`](Self::resolve), but also drops the owner's override
    pub fn take_for(&self, owner: Option<&ScheduleId>) -> Option<Arc<dyn DirectoryHandle>> {
        owner
            .and_then(|id| self.remove_override(id))
            .or_else(|| self.default_directory())
    }
}
