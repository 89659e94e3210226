//! Live bindings and in-place property changes.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::topology::entity::{
    AddressSpec, BridgeSpec, ComponentRoutingType, DivertSpec, EntityKey, EntityKind, EntitySpec,
    Fingerprint, QueueSpec, RoutingType,
};
use crate::topology::registry::RegistryError;

/// Stable identity assigned by the registry when a binding is created.
///
/// In-place updates never change it; only delete + create does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live entity as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Binding {
    Address { id: BindingId, spec: AddressSpec },
    Queue { id: BindingId, spec: QueueSpec },
    Divert { id: BindingId, spec: DivertSpec },
    Bridge { id: BindingId, spec: BridgeSpec },
}

impl Binding {
    pub fn id(&self) -> BindingId {
        match self {
            Binding::Address { id, .. }
            | Binding::Queue { id, .. }
            | Binding::Divert { id, .. }
            | Binding::Bridge { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Binding::Address { .. } => EntityKind::Address,
            Binding::Queue { .. } => EntityKind::Queue,
            Binding::Divert { .. } => EntityKind::Divert,
            Binding::Bridge { .. } => EntityKind::Bridge,
        }
    }

    pub fn key(&self) -> EntityKey {
        let name = match self {
            Binding::Address { spec, .. } => &spec.name,
            Binding::Queue { spec, .. } => &spec.name,
            Binding::Divert { spec, .. } => &spec.name,
            Binding::Bridge { spec, .. } => &spec.name,
        };
        EntityKey::new(self.kind(), name.clone())
    }

    /// The properties currently in effect, in declaration form.
    pub fn spec(&self) -> EntitySpec {
        match self {
            Binding::Address { spec, .. } => EntitySpec::Address(spec.clone()),
            Binding::Queue { spec, .. } => EntitySpec::Queue(spec.clone()),
            Binding::Divert { spec, .. } => EntitySpec::Divert(spec.clone()),
            Binding::Bridge { spec, .. } => EntitySpec::Bridge(spec.clone()),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.spec().fingerprint()
    }

    /// Whether this binding hangs off `key`: a queue or divert on an
    /// address, or a bridge draining a queue.
    pub fn depends_on(&self, key: &EntityKey) -> bool {
        match (self, key.kind) {
            (Binding::Queue { spec, .. }, EntityKind::Address) => spec.address == key.name,
            (Binding::Divert { spec, .. }, EntityKind::Address) => spec.address == key.name,
            (Binding::Bridge { spec, .. }, EntityKind::Queue) => spec.queue_name == key.name,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressChange {
    RoutingTypes(BTreeSet<RoutingType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueChange {
    /// Rebind to another address. Stored messages stay with the queue.
    Address(String),
    RoutingType(RoutingType),
    Filter(Option<String>),
    MaxConsumers(i32),
    PurgeOnNoConsumers(bool),
    Enabled(bool),
    Exclusive(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivertChange {
    Address(String),
    ForwardingAddress(String),
    Filter(Option<String>),
    Exclusive(bool),
    RoutingType(ComponentRoutingType),
    Transformer(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeChange {
    QueueName(String),
    ForwardingAddress(String),
    Filter(Option<String>),
    Transformer(Option<String>),
    Concurrency(u32),
    RoutingType(ComponentRoutingType),
}

/// Properties that differ between a live binding and its declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyDiff {
    Address(Vec<AddressChange>),
    Queue(Vec<QueueChange>),
    Divert(Vec<DivertChange>),
    Bridge(Vec<BridgeChange>),
}

macro_rules! push_if_changed {
    ($changes:ident, $live:ident, $desired:ident, $field:ident => $variant:path) => {
        if $live.$field != $desired.$field {
            $changes.push($variant($desired.$field.clone()));
        }
    };
}

impl PropertyDiff {
    /// Compute the changes turning `live` into `desired`.
    pub fn between(live: &EntitySpec, desired: &EntitySpec) -> Result<Self, RegistryError> {
        let diff = match (live, desired) {
            (EntitySpec::Address(l), EntitySpec::Address(d)) => {
                let mut c = Vec::new();
                push_if_changed!(c, l, d, routing_types => AddressChange::RoutingTypes);
                PropertyDiff::Address(c)
            }
            (EntitySpec::Queue(l), EntitySpec::Queue(d)) => {
                let mut c = Vec::new();
                push_if_changed!(c, l, d, address => QueueChange::Address);
                push_if_changed!(c, l, d, routing_type => QueueChange::RoutingType);
                push_if_changed!(c, l, d, filter => QueueChange::Filter);
                push_if_changed!(c, l, d, max_consumers => QueueChange::MaxConsumers);
                push_if_changed!(c, l, d, purge_on_no_consumers => QueueChange::PurgeOnNoConsumers);
                push_if_changed!(c, l, d, enabled => QueueChange::Enabled);
                push_if_changed!(c, l, d, exclusive => QueueChange::Exclusive);
                PropertyDiff::Queue(c)
            }
            (EntitySpec::Divert(l), EntitySpec::Divert(d)) => {
                let mut c = Vec::new();
                push_if_changed!(c, l, d, address => DivertChange::Address);
                push_if_changed!(c, l, d, forwarding_address => DivertChange::ForwardingAddress);
                push_if_changed!(c, l, d, filter => DivertChange::Filter);
                push_if_changed!(c, l, d, exclusive => DivertChange::Exclusive);
                push_if_changed!(c, l, d, routing_type => DivertChange::RoutingType);
                push_if_changed!(c, l, d, transformer => DivertChange::Transformer);
                PropertyDiff::Divert(c)
            }
            (EntitySpec::Bridge(l), EntitySpec::Bridge(d)) => {
                let mut c = Vec::new();
                push_if_changed!(c, l, d, queue_name => BridgeChange::QueueName);
                push_if_changed!(c, l, d, forwarding_address => BridgeChange::ForwardingAddress);
                push_if_changed!(c, l, d, filter => BridgeChange::Filter);
                push_if_changed!(c, l, d, transformer => BridgeChange::Transformer);
                push_if_changed!(c, l, d, concurrency => BridgeChange::Concurrency);
                push_if_changed!(c, l, d, routing_type => BridgeChange::RoutingType);
                PropertyDiff::Bridge(c)
            }
            (l, d) => {
                return Err(RegistryError::KindMismatch {
                    expected: l.kind(),
                    found: d.kind(),
                })
            }
        };
        Ok(diff)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            PropertyDiff::Address(_) => EntityKind::Address,
            PropertyDiff::Queue(_) => EntityKind::Queue,
            PropertyDiff::Divert(_) => EntityKind::Divert,
            PropertyDiff::Bridge(_) => EntityKind::Bridge,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PropertyDiff::Address(c) => c.len(),
            PropertyDiff::Queue(c) => c.len(),
            PropertyDiff::Divert(c) => c.len(),
            PropertyDiff::Bridge(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the changed properties, for logging.
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            PropertyDiff::Address(c) => c.iter().map(|_| "routing_types").collect(),
            PropertyDiff::Queue(c) => c
                .iter()
                .map(|ch| match ch {
                    QueueChange::Address(_) => "address",
                    QueueChange::RoutingType(_) => "routing_type",
                    QueueChange::Filter(_) => "filter",
                    QueueChange::MaxConsumers(_) => "max_consumers",
                    QueueChange::PurgeOnNoConsumers(_) => "purge_on_no_consumers",
                    QueueChange::Enabled(_) => "enabled",
                    QueueChange::Exclusive(_) => "exclusive",
                })
                .collect(),
            PropertyDiff::Divert(c) => c
                .iter()
                .map(|ch| match ch {
                    DivertChange::Address(_) => "address",
                    DivertChange::ForwardingAddress(_) => "forwarding_address",
                    DivertChange::Filter(_) => "filter",
                    DivertChange::Exclusive(_) => "exclusive",
                    DivertChange::RoutingType(_) => "routing_type",
                    DivertChange::Transformer(_) => "transformer",
                })
                .collect(),
            PropertyDiff::Bridge(c) => c
                .iter()
                .map(|ch| match ch {
                    BridgeChange::QueueName(_) => "queue_name",
                    BridgeChange::ForwardingAddress(_) => "forwarding_address",
                    BridgeChange::Filter(_) => "filter",
                    BridgeChange::Transformer(_) => "transformer",
                    BridgeChange::Concurrency(_) => "concurrency",
                    BridgeChange::RoutingType(_) => "routing_type",
                })
                .collect(),
        }
    }
}

impl AddressChange {
    pub(crate) fn apply(&self, spec: &mut AddressSpec) {
        match self {
            AddressChange::RoutingTypes(v) => spec.routing_types = v.clone(),
        }
    }
}

impl QueueChange {
    pub(crate) fn apply(&self, spec: &mut QueueSpec) {
        match self {
            QueueChange::Address(v) => spec.address = v.clone(),
            QueueChange::RoutingType(v) => spec.routing_type = *v,
            QueueChange::Filter(v) => spec.filter = v.clone(),
            QueueChange::MaxConsumers(v) => spec.max_consumers = *v,
            QueueChange::PurgeOnNoConsumers(v) => spec.purge_on_no_consumers = *v,
            QueueChange::Enabled(v) => spec.enabled = *v,
            QueueChange::Exclusive(v) => spec.exclusive = *v,
        }
    }
}

impl DivertChange {
    pub(crate) fn apply(&self, spec: &mut DivertSpec) {
        match self {
            DivertChange::Address(v) => spec.address = v.clone(),
            DivertChange::ForwardingAddress(v) => spec.forwarding_address = v.clone(),
            DivertChange::Filter(v) => spec.filter = v.clone(),
            DivertChange::Exclusive(v) => spec.exclusive = *v,
            DivertChange::RoutingType(v) => spec.routing_type = *v,
            DivertChange::Transformer(v) => spec.transformer = v.clone(),
        }
    }
}

impl BridgeChange {
    pub(crate) fn apply(&self, spec: &mut BridgeSpec) {
        match self {
            BridgeChange::QueueName(v) => spec.queue_name = v.clone(),
            BridgeChange::ForwardingAddress(v) => spec.forwarding_address = v.clone(),
            BridgeChange::Filter(v) => spec.filter = v.clone(),
            BridgeChange::Transformer(v) => spec.transformer = v.clone(),
            BridgeChange::Concurrency(v) => spec.concurrency = *v,
            BridgeChange::RoutingType(v) => spec.routing_type = *v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_lists_only_changed_fields() {
        let live = QueueSpec::new("q", "a", RoutingType::Anycast);
        let desired = QueueSpec {
            routing_type: RoutingType::Multicast,
            max_consumers: 5,
            ..live.clone()
        };
        let diff =
            PropertyDiff::between(&EntitySpec::Queue(live), &EntitySpec::Queue(desired)).unwrap();
        assert_eq!(diff.fields(), vec!["routing_type", "max_consumers"]);
    }

    #[test]
    fn test_identical_specs_yield_empty_diff() {
        let spec = EntitySpec::Queue(QueueSpec::new("q", "a", RoutingType::Anycast));
        assert!(PropertyDiff::between(&spec, &spec).unwrap().is_empty());
    }

    #[test]
    fn test_kind_mismatch() {
        let queue = EntitySpec::Queue(QueueSpec::new("q", "a", RoutingType::Anycast));
        let address = EntitySpec::Address(AddressSpec {
            name: "q".into(),
            routing_types: BTreeSet::new(),
        });
        assert!(matches!(
            PropertyDiff::between(&queue, &address),
            Err(RegistryError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_applying_diff_reaches_desired() {
        let mut live = QueueSpec::new("q", "a", RoutingType::Anycast);
        let desired = QueueSpec {
            address: "b".into(),
            filter: Some("x = 'x'".into()),
            ..live.clone()
        };
        let diff = PropertyDiff::between(
            &EntitySpec::Queue(live.clone()),
            &EntitySpec::Queue(desired.clone()),
        )
        .unwrap();
        if let PropertyDiff::Queue(changes) = diff {
            changes.iter().for_each(|c| c.apply(&mut live));
        }
        assert_eq!(live, desired);
    }
}
