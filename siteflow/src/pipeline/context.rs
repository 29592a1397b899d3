//! In-memory project context shared by a session and its runs.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::core::ProjectStructure;

/// The structural description a session is currently working against.
///
/// Generation replaces it during the persist-structure stage; modification
/// reads it to compose prompts. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct StructureContext {
    inner: Arc<RwLock<Option<ProjectStructure>>>,
}

impl StructureContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context holding `structure`.
    #[must_use]
    pub fn with_structure(structure: ProjectStructure) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(structure))),
        }
    }

    /// Returns a copy of the current structure.
    #[must_use]
    pub fn current(&self) -> Option<ProjectStructure> {
        self.inner.read().clone()
    }

    /// Replaces the structure.
    pub fn replace(&self, structure: ProjectStructure) {
        *self.inner.write() = Some(structure);
    }

    /// Returns true if a structure is held.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}
