//! Declared entities and their identity.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// How an address delivers to its queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    /// Point to point: one queue receives each message.
    Anycast,
    /// Publish/subscribe: every queue receives a copy.
    Multicast,
}

/// Routing type applied by a divert or bridge to the messages it forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentRoutingType {
    Anycast,
    Multicast,
    /// Keep whatever routing type the message carries.
    Pass,
    /// Clear the routing type.
    #[default]
    Strip,
}

impl ComponentRoutingType {
    pub fn apply(self, current: Option<RoutingType>) -> Option<RoutingType> {
        match self {
            Self::Anycast => Some(RoutingType::Anycast),
            Self::Multicast => Some(RoutingType::Multicast),
            Self::Pass => current,
            Self::Strip => None,
        }
    }
}

/// Entity kinds in dependency order: an address must exist before the
/// queues and diverts bound to it, a queue before the bridge draining it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Address,
    Queue,
    Divert,
    Bridge,
}

impl EntityKind {
    /// All kinds, creation order.
    pub const ALL: [EntityKind; 4] = [Self::Address, Self::Queue, Self::Divert, Self::Bridge];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Queue => "queue",
            Self::Divert => "divert",
            Self::Bridge => "bridge",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a managed entity. Names are unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn address(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Address, name)
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Queue, name)
    }

    pub fn divert(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Divert, name)
    }

    pub fn bridge(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Bridge, name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AddressSpec {
    pub name: String,
    pub routing_types: BTreeSet<RoutingType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueueSpec {
    pub name: String,
    pub address: String,
    pub routing_type: RoutingType,
    pub filter: Option<String>,
    /// -1 means unlimited.
    pub max_consumers: i32,
    pub purge_on_no_consumers: bool,
    pub enabled: bool,
    pub exclusive: bool,
}

impl QueueSpec {
    /// A queue with broker defaults.
    pub fn new(name: impl Into<String>, address: impl Into<String>, routing_type: RoutingType) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type,
            filter: None,
            max_consumers: -1,
            purge_on_no_consumers: false,
            enabled: true,
            exclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DivertSpec {
    pub name: String,
    pub address: String,
    pub forwarding_address: String,
    pub filter: Option<String>,
    /// An exclusive divert takes matching messages away from the original address.
    pub exclusive: bool,
    pub routing_type: ComponentRoutingType,
    pub transformer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BridgeSpec {
    pub name: String,
    pub queue_name: String,
    pub forwarding_address: String,
    pub filter: Option<String>,
    pub transformer: Option<String>,
    pub concurrency: u32,
    pub routing_type: ComponentRoutingType,
}

/// Content hash of an entity's declared properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

/// Declared properties of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntitySpec {
    Address(AddressSpec),
    Queue(QueueSpec),
    Divert(DivertSpec),
    Bridge(BridgeSpec),
}

impl EntitySpec {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Address(_) => EntityKind::Address,
            Self::Queue(_) => EntityKind::Queue,
            Self::Divert(_) => EntityKind::Divert,
            Self::Bridge(_) => EntityKind::Bridge,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Address(s) => &s.name,
            Self::Queue(s) => &s.name,
            Self::Divert(s) => &s.name,
            Self::Bridge(s) => &s.name,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.name())
    }

    pub fn filter(&self) -> Option<&str> {
        match self {
            Self::Address(_) => None,
            Self::Queue(s) => s.filter.as_deref(),
            Self::Divert(s) => s.filter.as_deref(),
            Self::Bridge(s) => s.filter.as_deref(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

/// One entity of the desired configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub spec: EntitySpec,
    /// Never deleted by reconciliation once created.
    pub permanent: bool,
}

/// The topology a configuration snapshot asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredTopology {
    declarations: Vec<Declaration>,
}

impl DesiredTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, spec: EntitySpec, permanent: bool) -> &mut Self {
        self.declarations.push(Declaration { spec, permanent });
        self
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter()
    }

    /// Declarations of one kind, in declaration order.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Declaration> {
        self.declarations
            .iter()
            .filter(move |d| d.spec.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_tracks_properties() {
        let queue = QueueSpec::new("q", "a", RoutingType::Anycast);
        let same = EntitySpec::Queue(queue.clone()).fingerprint();
        assert_eq!(EntitySpec::Queue(queue.clone()).fingerprint(), same);

        let filtered = QueueSpec {
            filter: Some("x = 'x'".into()),
            ..queue
        };
        assert_ne!(EntitySpec::Queue(filtered).fingerprint(), same);
    }

    #[test]
    fn test_kinds_are_in_dependency_order() {
        let mut kinds = vec![EntityKind::Bridge, EntityKind::Address, EntityKind::Divert, EntityKind::Queue];
        kinds.sort();
        assert_eq!(kinds, EntityKind::ALL.to_vec());
    }

    #[test]
    fn test_component_routing_type() {
        let any = Some(RoutingType::Anycast);
        assert_eq!(ComponentRoutingType::Pass.apply(any), any);
        assert_eq!(ComponentRoutingType::Strip.apply(any), None);
        assert_eq!(
            ComponentRoutingType::Multicast.apply(any),
            Some(RoutingType::Multicast)
        );
    }
}
