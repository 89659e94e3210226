//! Desired-vs-live diff and apply.
//!
//! Phase 1 creates and updates in dependency order (addresses, queues,
//! diverts, bridges). Phase 2 deletes in reverse order. Every create
//! therefore happens before any delete, and a failure on one entity only
//! skips that entity.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::topology::binding::{Binding, BindingId, PropertyDiff};
use crate::topology::entity::{Declaration, DesiredTopology, EntityKey, EntityKind, EntitySpec};
use crate::topology::provenance::{Provenance, ProvenanceTracker};
use crate::topology::registry::{LiveRegistry, RegistryError};
use crate::topology::report::{EntityError, ReconciliationReport};

pub struct TopologyReconciler {
    registry: Arc<dyn LiveRegistry>,
    tracker: Arc<ProvenanceTracker>,
}

impl TopologyReconciler {
    pub fn new(registry: Arc<dyn LiveRegistry>, tracker: Arc<ProvenanceTracker>) -> Self {
        Self { registry, tracker }
    }

    pub fn tracker(&self) -> &Arc<ProvenanceTracker> {
        &self.tracker
    }

    /// Bring the live registry in line with `desired`.
    pub fn apply(&self, desired: &DesiredTopology) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let live: BTreeMap<EntityKey, Binding> = self
            .registry
            .list_bindings()
            .into_iter()
            .map(|b| (b.key(), b))
            .collect();
        let mut declared: HashSet<EntityKey> = HashSet::with_capacity(desired.len());

        for kind in EntityKind::ALL {
            for declaration in desired.of_kind(kind) {
                let key = declaration.spec.key();
                if !declared.insert(key.clone()) {
                    tracing::warn!(entity = %key, "Duplicate declaration ignored");
                    continue;
                }
                match live.get(&key) {
                    None => self.create(key, declaration, &mut report),
                    Some(binding) => self.update(key, binding, declaration, &mut report),
                }
            }
        }

        for kind in EntityKind::ALL.iter().rev() {
            for key in live.keys().filter(|k| k.kind == *kind && !declared.contains(*k)) {
                self.delete_undeclared(key, &declared, &mut report);
            }
        }

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Reconciliation pass complete"
        );
        report
    }

    fn create(&self, key: EntityKey, declaration: &Declaration, report: &mut ReconciliationReport) {
        match self.registry.add_binding(declaration.spec.clone()) {
            Ok(id) => {
                self.tracker.record_declared(key.clone(), declaration.permanent);
                tracing::info!(entity = %key, id = %id, permanent = declaration.permanent, "Created");
                report.created.push(key);
            }
            Err(source) => {
                tracing::warn!(entity = %key, error = %source, "Create failed");
                report.errors.push(EntityError::Create { entity: key, source });
            }
        }
    }

    fn update(
        &self,
        key: EntityKey,
        binding: &Binding,
        declaration: &Declaration,
        report: &mut ReconciliationReport,
    ) {
        if self.tracker.classify(&key) == Provenance::ClientCreated {
            tracing::info!(entity = %key, "Adopting client-created entity");
        }
        // The entity is declared either way; an update failure leaves it
        // in place with its old properties.
        self.tracker.record_declared(key.clone(), declaration.permanent);

        if binding.fingerprint() == declaration.spec.fingerprint() {
            report.unchanged += 1;
            return;
        }

        let result = PropertyDiff::between(&binding.spec(), &declaration.spec).and_then(|diff| {
            self.registry
                .update_binding_properties(&key, &diff)
                .map(|()| diff)
        });
        match result {
            Ok(diff) => {
                tracing::info!(entity = %key, changed = ?diff.fields(), "Updated in place");
                report.updated.push(key);
            }
            Err(source) => {
                tracing::warn!(entity = %key, error = %source, "Update failed");
                report.errors.push(EntityError::Update { entity: key, source });
            }
        }
    }

    fn delete_undeclared(
        &self,
        key: &EntityKey,
        declared: &HashSet<EntityKey>,
        report: &mut ReconciliationReport,
    ) {
        match self.tracker.classify(key) {
            Provenance::ClientCreated | Provenance::Permanent => {
                report.skipped.push(key.clone());
                return;
            }
            Provenance::ConfigManaged => {}
        }

        // A dependent this pass keeps would block the delete on every retry.
        if let Some(holder) = self.retained_dependent(key, declared) {
            tracing::info!(entity = %key, held_by = %holder, "Kept for a retained dependent");
            report.skipped.push(key.clone());
            return;
        }

        match self.registry.remove_binding(key) {
            Ok(true) => {
                self.tracker.forget(key);
                tracing::info!(entity = %key, "Deleted");
                report.deleted.push(key.clone());
            }
            Ok(false) => {
                tracing::warn!(entity = %key, "Still referenced, delete deferred");
                report.errors.push(EntityError::Conflict {
                    entity: key.clone(),
                });
            }
            Err(RegistryError::NotFound(_)) => {
                self.tracker.forget(key);
            }
            Err(source) => {
                tracing::warn!(entity = %key, error = %source, "Delete failed");
                report.errors.push(EntityError::Delete {
                    entity: key.clone(),
                    source,
                });
            }
        }
    }

    /// Create an entity outside configuration. It is tagged client-created,
    /// so later passes leave it alone unless a document declares it.
    pub fn create_unmanaged(&self, spec: EntitySpec) -> Result<BindingId, RegistryError> {
        let key = spec.key();
        let id = self.registry.add_binding(spec)?;
        self.tracker.record_client_created(key.clone());
        tracing::info!(entity = %key, id = %id, "Created outside configuration");
        Ok(id)
    }

    /// Remove an entity outside configuration. `Ok(false)` if it is still
    /// referenced. A declared entity comes back on the next applied document.
    pub fn destroy_unmanaged(&self, key: &EntityKey) -> Result<bool, RegistryError> {
        let removed = self.registry.remove_binding(key)?;
        if removed {
            self.tracker.forget(key);
            tracing::info!(entity = %key, "Destroyed outside configuration");
        }
        Ok(removed)
    }

    /// A live binding on `key` that is declared or never deleted by
    /// reconciliation.
    fn retained_dependent(&self, key: &EntityKey, declared: &HashSet<EntityKey>) -> Option<EntityKey> {
        self.registry
            .list_bindings()
            .into_iter()
            .filter(|b| b.depends_on(key))
            .map(|b| b.key())
            .find(|k| declared.contains(k) || self.tracker.classify(k) != Provenance::ConfigManaged)
    }
}
