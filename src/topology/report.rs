//! Outcome of one reconciliation pass.

use serde::Serialize;
use thiserror::Error;

use crate::topology::entity::EntityKey;
use crate::topology::registry::RegistryError;

/// A failure scoped to one entity. Never aborts the pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("failed to create {entity}: {source}")]
    Create {
        entity: EntityKey,
        source: RegistryError,
    },

    #[error("failed to update {entity}: {source}")]
    Update {
        entity: EntityKey,
        source: RegistryError,
    },

    #[error("{entity} is still referenced; delete deferred to the next pass")]
    Conflict { entity: EntityKey },

    #[error("failed to delete {entity}: {source}")]
    Delete {
        entity: EntityKey,
        source: RegistryError,
    },
}

impl EntityError {
    pub fn entity(&self) -> &EntityKey {
        match self {
            EntityError::Create { entity, .. }
            | EntityError::Update { entity, .. }
            | EntityError::Conflict { entity }
            | EntityError::Delete { entity, .. } => entity,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EntityError::Conflict { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub created: Vec<EntityKey>,
    pub updated: Vec<EntityKey>,
    pub deleted: Vec<EntityKey>,
    /// Declared entities whose fingerprint did not change.
    pub unchanged: usize,
    /// Undeclared entities kept because of their provenance.
    pub skipped: Vec<EntityKey>,
    pub errors: Vec<EntityError>,
}

impl ReconciliationReport {
    /// True when the pass created, updated and deleted nothing.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        self.errors.iter().any(EntityError::is_conflict)
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &EntityKey> {
        self.errors
            .iter()
            .filter(|e| e.is_conflict())
            .map(EntityError::entity)
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            created: self.created.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged,
            skipped: self.skipped.len(),
            conflicts: self.conflicts().count(),
            errors: self.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Serializable counts for the admin API and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
}
