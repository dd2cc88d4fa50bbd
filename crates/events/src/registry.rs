use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::Projector;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("projector with identifier '{0}' does not exist")]
pub struct ProjectorDoesNotExistError(pub String);

/// Registered projectors, in registration order.
///
/// Registration order is the order in which projectors see each event, both
/// in live dispatch and in batch replay.
#[derive(Clone, Default)]
pub struct ProjectorRegistry {
    projectors: Vec<Arc<dyn Projector>>,
}

impl ProjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projectors(projectors: impl IntoIterator<Item = Arc<dyn Projector>>) -> Self {
        let mut registry = Self::new();
        for projector in projectors {
            registry.register(projector);
        }
        registry
    }

    /// Register a projector. A projector with the same identifier is replaced
    /// in place, keeping its original position in the order.
    pub fn register(&mut self, projector: Arc<dyn Projector>) {
        let id = projector.identifier();
        if let Some(slot) = self.projectors.iter_mut().find(|p| p.identifier() == id) {
            warn!(projector = id, "projector registered twice, replacing previous instance");
            *slot = projector;
        } else {
            self.projectors.push(projector);
        }
    }

    pub fn all(&self) -> &[Arc<dyn Projector>] {
        &self.projectors
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Projector>> {
        self.projectors
            .iter()
            .find(|p| p.identifier() == id)
            .cloned()
    }

    pub fn find(&self, id: &str) -> Result<Arc<dyn Projector>, ProjectorDoesNotExistError> {
        self.get(id)
            .ok_or_else(|| ProjectorDoesNotExistError(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

impl core::fmt::Debug for ProjectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.projectors.iter().map(|p| p.identifier()))
            .finish()
    }
}
