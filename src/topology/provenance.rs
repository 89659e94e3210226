//! Origin tags for live entities.
//!
//! The tag decides whether reconciliation may delete an entity whose
//! declaration disappeared. Anything never recorded is treated as created
//! by client traffic and left alone.

use dashmap::DashMap;
use serde::Serialize;

use crate::topology::entity::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// Auto-created by a session. Never deleted by reconciliation.
    ClientCreated,
    /// Declared in configuration. Deleted once the declaration disappears.
    ConfigManaged,
    /// Declared with the permanent flag. Never deleted by reconciliation.
    Permanent,
}

#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    tags: DashMap<EntityKey, Provenance>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag an entity declared by the current configuration.
    pub fn record_declared(&self, key: EntityKey, permanent: bool) {
        let tag = if permanent {
            Provenance::Permanent
        } else {
            Provenance::ConfigManaged
        };
        self.tags.insert(key, tag);
    }

    /// Tag an entity created by client traffic. An existing declared tag is
    /// kept: a client touching a configured queue does not take it over.
    pub fn record_client_created(&self, key: EntityKey) {
        self.tags.entry(key).or_insert(Provenance::ClientCreated);
    }

    pub fn classify(&self, key: &EntityKey) -> Provenance {
        self.tags
            .get(key)
            .map_or(Provenance::ClientCreated, |tag| *tag)
    }

    /// Drop the tag of an entity that no longer exists.
    pub fn forget(&self, key: &EntityKey) {
        self.tags.remove(key);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
