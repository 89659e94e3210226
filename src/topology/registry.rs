//! Live binding registry.
//!
//! # Responsibilities
//! - Own the runtime addresses, queues, diverts and bridges
//! - Apply create, in-place update and delete requests from the reconciler
//! - Route messages through diverts, queues and bridges so the effect of a
//!   reconciliation pass can be observed
//!
//! # Design Decisions
//! - One `DashMap` per entity kind: updating one queue never blocks traffic
//!   on another
//! - No map guard is held while another entry of the same map is touched;
//!   routing collects targets first and then mutates
//! - Writes go through [`LiveRegistry`]; everything else sees [`RegistryReader`]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::topology::binding::{Binding, BindingId, PropertyDiff};
use crate::topology::entity::{
    AddressSpec, BridgeSpec, ComponentRoutingType, DivertSpec, EntityKey, EntityKind, EntitySpec,
    QueueSpec, RoutingType,
};
use crate::topology::filter::{Filter, FilterError};

/// Divert and bridge hops a single send may take before it is dropped.
const MAX_HOPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} does not exist")]
    NotFound(EntityKey),

    #[error("{0} already exists")]
    AlreadyExists(EntityKey),

    #[error("{entity} has an invalid filter: {source}")]
    InvalidFilter {
        entity: EntityKey,
        source: FilterError,
    },

    #[error("expected a {expected} binding, found a {found}")]
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    #[error("{entity} is bound to missing address '{address}'")]
    MissingAddress { entity: EntityKey, address: String },

    #[error("{entity} drains missing queue '{queue}'")]
    MissingQueue { entity: EntityKey, queue: String },

    #[error("queue '{queue}' already has its maximum of {limit} consumers")]
    MaxConsumersReached { queue: String, limit: i32 },

    #[error("address '{address}' does not allow {routing_type:?} routing")]
    RoutingTypeNotAllowed {
        address: String,
        routing_type: RoutingType,
    },
}

/// Read access to live bindings.
pub trait RegistryReader: Send + Sync {
    /// Every live binding, ordered by kind then name.
    fn list_bindings(&self) -> Vec<Binding>;

    fn get_binding(&self, key: &EntityKey) -> Option<Binding>;
}

/// Write access to live bindings. Handed only to the reconciler.
pub trait LiveRegistry: RegistryReader {
    fn add_binding(&self, spec: EntitySpec) -> Result<BindingId, RegistryError>;

    /// Returns `Ok(false)` if the binding is still referenced by something
    /// this node does not own; nothing is removed in that case.
    fn remove_binding(&self, key: &EntityKey) -> Result<bool, RegistryError>;

    /// Change properties in place. Either every change applies or none does.
    fn update_binding_properties(
        &self,
        key: &EntityKey,
        diff: &PropertyDiff,
    ) -> Result<(), RegistryError>;
}

/// A message travelling through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub body: String,
    pub properties: BTreeMap<String, String>,
    /// `None` reaches queues of either routing type.
    pub routing_type: Option<RoutingType>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_routing_type(mut self, routing_type: RoutingType) -> Self {
        self.routing_type = Some(routing_type);
        self
    }

    fn transformed(&self, routing: ComponentRoutingType) -> Self {
        let mut copy = self.clone();
        copy.routing_type = routing.apply(self.routing_type);
        copy
    }
}

struct AddressEntry {
    id: BindingId,
    spec: AddressSpec,
}

struct QueueEntry {
    id: BindingId,
    spec: QueueSpec,
    filter: Option<Filter>,
    messages: VecDeque<Message>,
    consumers: u32,
}

struct DivertEntry {
    id: BindingId,
    spec: DivertSpec,
    filter: Option<Filter>,
}

struct BridgeEntry {
    id: BindingId,
    spec: BridgeSpec,
    filter: Option<Filter>,
}

fn passes(filter: &Option<Filter>, message: &Message) -> bool {
    filter
        .as_ref()
        .map_or(true, |f| f.matches(&message.properties))
}

/// In-memory post office.
pub struct PostOffice {
    next_id: AtomicU64,
    addresses: DashMap<String, AddressEntry>,
    queues: DashMap<String, QueueEntry>,
    diverts: DashMap<String, DivertEntry>,
    bridges: DashMap<String, BridgeEntry>,
    remote: DashMap<EntityKey, usize>,
}

impl Default for PostOffice {
    fn default() -> Self {
        Self::new()
    }
}

impl PostOffice {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            addresses: DashMap::new(),
            queues: DashMap::new(),
            diverts: DashMap::new(),
            bridges: DashMap::new(),
            remote: DashMap::new(),
        }
    }

    fn allocate_id(&self) -> BindingId {
        BindingId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn compile(key: &EntityKey, filter: Option<&str>) -> Result<Option<Filter>, RegistryError> {
        Filter::parse_optional(filter).map_err(|source| RegistryError::InvalidFilter {
            entity: key.clone(),
            source,
        })
    }

    // Traffic

    /// Route `message` to `address`. Returns the number of queues that
    /// stored a copy.
    pub fn send(&self, address: &str, message: Message) -> usize {
        self.route(address, message, 0)
    }

    /// Take the oldest message from a queue.
    pub fn receive(&self, queue: &str) -> Option<Message> {
        self.queues.get_mut(queue)?.messages.pop_front()
    }

    pub fn message_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.messages.len())
    }

    /// Local consumers plus the consumers of bridges draining the queue.
    pub fn consumer_count(&self, queue: &str) -> Option<u32> {
        let bridged = self.bridge_consumers(queue);
        self.queues.get(queue).map(|q| q.consumers + bridged)
    }

    pub fn open_consumer(&self, queue: &str) -> Result<(), RegistryError> {
        let bridged = self.bridge_consumers(queue);
        let mut entry = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| RegistryError::NotFound(EntityKey::queue(queue)))?;

        let limit = entry.spec.max_consumers;
        if limit >= 0 && i64::from(entry.consumers + bridged) >= i64::from(limit) {
            return Err(RegistryError::MaxConsumersReached {
                queue: queue.to_string(),
                limit,
            });
        }
        entry.consumers += 1;
        Ok(())
    }

    /// Close one consumer. The last close purges the queue when it is
    /// configured to purge on no consumers.
    pub fn close_consumer(&self, queue: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| RegistryError::NotFound(EntityKey::queue(queue)))?;

        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers == 0 && entry.spec.purge_on_no_consumers {
            let purged = entry.messages.len();
            entry.messages.clear();
            tracing::debug!(queue = %queue, purged, "Purged queue with no consumers");
        }
        Ok(())
    }

    /// Create a queue on behalf of client traffic, creating its address as
    /// needed. An existing address gains the routing type only when `widen`
    /// is set; otherwise it must already allow it. Returns the entities that
    /// did not exist before.
    pub fn auto_create_queue(
        &self,
        name: &str,
        address: &str,
        routing_type: RoutingType,
        widen: bool,
    ) -> Result<Vec<EntityKey>, RegistryError> {
        let mut created = Vec::new();
        if self.queues.contains_key(name) {
            return Ok(created);
        }

        match self.addresses.entry(address.to_string()) {
            Entry::Occupied(mut occupied) => {
                let types = &mut occupied.get_mut().spec.routing_types;
                if !types.contains(&routing_type) {
                    if !widen {
                        return Err(RegistryError::RoutingTypeNotAllowed {
                            address: address.to_string(),
                            routing_type,
                        });
                    }
                    types.insert(routing_type);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(AddressEntry {
                    id: self.allocate_id(),
                    spec: AddressSpec {
                        name: address.to_string(),
                        routing_types: [routing_type].into_iter().collect(),
                    },
                });
                created.push(EntityKey::address(address));
            }
        }

        if let Entry::Vacant(vacant) = self.queues.entry(name.to_string()) {
            vacant.insert(QueueEntry {
                id: self.allocate_id(),
                spec: QueueSpec::new(name, address, routing_type),
                filter: None,
                messages: VecDeque::new(),
                consumers: 0,
            });
            created.push(EntityKey::queue(name));
        }
        Ok(created)
    }

    /// Layer a binding owned by another node on top of `key`.
    pub fn add_remote_binding(&self, key: EntityKey) {
        *self.remote.entry(key).or_insert(0) += 1;
    }

    pub fn remove_remote_binding(&self, key: &EntityKey) -> bool {
        let removed = match self.remote.get_mut(key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                true
            }
            None => false,
        };
        self.remote.remove_if(key, |_, count| *count == 0);
        removed
    }

    fn is_remotely_referenced(&self, key: &EntityKey) -> bool {
        self.remote.get(key).is_some_and(|count| *count > 0)
    }

    fn bridge_consumers(&self, queue: &str) -> u32 {
        self.bridges
            .iter()
            .filter(|b| b.spec.queue_name == queue)
            .map(|b| b.spec.concurrency)
            .sum()
    }

    fn route(&self, address: &str, message: Message, hops: usize) -> usize {
        if hops > MAX_HOPS {
            tracing::warn!(address = %address, hops, "Dropping message: too many forwarding hops");
            return 0;
        }

        let diverts: Vec<(String, ComponentRoutingType, bool)> = self
            .diverts
            .iter()
            .filter(|d| d.spec.address == address && passes(&d.filter, &message))
            .map(|d| {
                (
                    d.spec.forwarding_address.clone(),
                    d.spec.routing_type,
                    d.spec.exclusive,
                )
            })
            .collect();

        let mut delivered = 0;
        let mut exclusive = false;
        for (forwarding, routing, is_exclusive) in diverts {
            delivered += self.route(&forwarding, message.transformed(routing), hops + 1);
            exclusive |= is_exclusive;
        }
        if exclusive || !self.addresses.contains_key(address) {
            return delivered;
        }

        let candidates: Vec<(String, RoutingType, usize)> = self
            .queues
            .iter()
            .filter(|q| {
                q.spec.address == address
                    && q.spec.enabled
                    && message.routing_type.map_or(true, |rt| rt == q.spec.routing_type)
                    && passes(&q.filter, &message)
            })
            .map(|q| (q.spec.name.clone(), q.spec.routing_type, q.messages.len()))
            .collect();

        // Every multicast queue gets a copy; one anycast queue, the least loaded.
        let anycast = candidates
            .iter()
            .filter(|(_, rt, _)| *rt == RoutingType::Anycast)
            .min_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)))
            .map(|(name, _, _)| name.clone());
        let targets = candidates
            .iter()
            .filter(|(_, rt, _)| *rt == RoutingType::Multicast)
            .map(|(name, _, _)| name.clone())
            .chain(anycast);

        for queue in targets {
            delivered += self.enqueue(&queue, message.clone(), hops);
        }
        delivered
    }

    fn enqueue(&self, queue: &str, message: Message, hops: usize) -> usize {
        let bridge = self
            .bridges
            .iter()
            .filter(|b| b.spec.queue_name == queue && b.spec.concurrency > 0)
            .find(|b| passes(&b.filter, &message))
            .map(|b| (b.spec.forwarding_address.clone(), b.spec.routing_type));

        if let Some((forwarding, routing)) = bridge {
            return self.route(&forwarding, message.transformed(routing), hops + 1);
        }

        match self.queues.get_mut(queue) {
            Some(mut entry) => {
                entry.messages.push_back(message);
                1
            }
            None => 0,
        }
    }

    /// Forward messages already sitting in a bridge's source queue.
    fn pump_bridge(&self, bridge: &str) {
        let Some((queue, forwarding, routing, filter)) = self.bridges.get(bridge).and_then(|b| {
            (b.spec.concurrency > 0).then(|| {
                (
                    b.spec.queue_name.clone(),
                    b.spec.forwarding_address.clone(),
                    b.spec.routing_type,
                    b.filter.clone(),
                )
            })
        }) else {
            return;
        };

        let drained: Vec<Message> = match self.queues.get_mut(&queue) {
            Some(mut entry) => {
                let (take, keep): (VecDeque<Message>, VecDeque<Message>) = entry
                    .messages
                    .drain(..)
                    .partition(|m| passes(&filter, m));
                entry.messages = keep;
                take.into_iter().collect()
            }
            None => return,
        };

        for message in drained {
            self.route(&forwarding, message.transformed(routing), 1);
        }
    }

    fn add_address(&self, spec: AddressSpec) -> Result<BindingId, RegistryError> {
        match self.addresses.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(EntityKey::address(&spec.name))),
            Entry::Vacant(vacant) => {
                let id = self.allocate_id();
                vacant.insert(AddressEntry { id, spec });
                Ok(id)
            }
        }
    }

    fn add_queue(&self, spec: QueueSpec) -> Result<BindingId, RegistryError> {
        let key = EntityKey::queue(&spec.name);
        if !self.addresses.contains_key(&spec.address) {
            return Err(RegistryError::MissingAddress {
                entity: key,
                address: spec.address,
            });
        }
        let filter = Self::compile(&key, spec.filter.as_deref())?;
        match self.queues.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(key)),
            Entry::Vacant(vacant) => {
                let id = self.allocate_id();
                vacant.insert(QueueEntry {
                    id,
                    spec,
                    filter,
                    messages: VecDeque::new(),
                    consumers: 0,
                });
                Ok(id)
            }
        }
    }

    fn add_divert(&self, spec: DivertSpec) -> Result<BindingId, RegistryError> {
        let key = EntityKey::divert(&spec.name);
        let filter = Self::compile(&key, spec.filter.as_deref())?;
        match self.diverts.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(key)),
            Entry::Vacant(vacant) => {
                let id = self.allocate_id();
                vacant.insert(DivertEntry { id, spec, filter });
                Ok(id)
            }
        }
    }

    fn add_bridge(&self, spec: BridgeSpec) -> Result<BindingId, RegistryError> {
        let key = EntityKey::bridge(&spec.name);
        if !self.queues.contains_key(&spec.queue_name) {
            return Err(RegistryError::MissingQueue {
                entity: key,
                queue: spec.queue_name,
            });
        }
        let filter = Self::compile(&key, spec.filter.as_deref())?;
        let name = spec.name.clone();
        let id = match self.bridges.entry(spec.name.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyExists(key)),
            Entry::Vacant(vacant) => {
                let id = self.allocate_id();
                vacant.insert(BridgeEntry { id, spec, filter });
                id
            }
        };
        self.pump_bridge(&name);
        Ok(id)
    }

    fn is_referenced(&self, key: &EntityKey) -> bool {
        if self.is_remotely_referenced(key) {
            return true;
        }
        match key.kind {
            EntityKind::Address => {
                self.queues.iter().any(|q| q.spec.address == key.name)
                    || self.diverts.iter().any(|d| d.spec.address == key.name)
            }
            EntityKind::Queue => self.bridges.iter().any(|b| b.spec.queue_name == key.name),
            EntityKind::Divert | EntityKind::Bridge => false,
        }
    }

    fn exists(&self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Address => self.addresses.contains_key(&key.name),
            EntityKind::Queue => self.queues.contains_key(&key.name),
            EntityKind::Divert => self.diverts.contains_key(&key.name),
            EntityKind::Bridge => self.bridges.contains_key(&key.name),
        }
    }
}

impl RegistryReader for PostOffice {
    fn list_bindings(&self) -> Vec<Binding> {
        let mut bindings: Vec<Binding> = Vec::new();
        bindings.extend(self.addresses.iter().map(|e| Binding::Address {
            id: e.id,
            spec: e.spec.clone(),
        }));
        bindings.extend(self.queues.iter().map(|e| Binding::Queue {
            id: e.id,
            spec: e.spec.clone(),
        }));
        bindings.extend(self.diverts.iter().map(|e| Binding::Divert {
            id: e.id,
            spec: e.spec.clone(),
        }));
        bindings.extend(self.bridges.iter().map(|e| Binding::Bridge {
            id: e.id,
            spec: e.spec.clone(),
        }));
        bindings.sort_by_key(Binding::key);
        bindings
    }

    fn get_binding(&self, key: &EntityKey) -> Option<Binding> {
        match key.kind {
            EntityKind::Address => self.addresses.get(&key.name).map(|e| Binding::Address {
                id: e.id,
                spec: e.spec.clone(),
            }),
            EntityKind::Queue => self.queues.get(&key.name).map(|e| Binding::Queue {
                id: e.id,
                spec: e.spec.clone(),
            }),
            EntityKind::Divert => self.diverts.get(&key.name).map(|e| Binding::Divert {
                id: e.id,
                spec: e.spec.clone(),
            }),
            EntityKind::Bridge => self.bridges.get(&key.name).map(|e| Binding::Bridge {
                id: e.id,
                spec: e.spec.clone(),
            }),
        }
    }
}

impl LiveRegistry for PostOffice {
    fn add_binding(&self, spec: EntitySpec) -> Result<BindingId, RegistryError> {
        let key = spec.key();
        let id = match spec {
            EntitySpec::Address(s) => self.add_address(s),
            EntitySpec::Queue(s) => self.add_queue(s),
            EntitySpec::Divert(s) => self.add_divert(s),
            EntitySpec::Bridge(s) => self.add_bridge(s),
        }?;
        tracing::debug!(entity = %key, id = %id, "Binding added");
        Ok(id)
    }

    fn remove_binding(&self, key: &EntityKey) -> Result<bool, RegistryError> {
        if !self.exists(key) {
            return Err(RegistryError::NotFound(key.clone()));
        }
        if self.is_referenced(key) {
            return Ok(false);
        }
        let removed = match key.kind {
            EntityKind::Address => self.addresses.remove(&key.name).is_some(),
            EntityKind::Queue => self.queues.remove(&key.name).is_some(),
            EntityKind::Divert => self.diverts.remove(&key.name).is_some(),
            EntityKind::Bridge => self.bridges.remove(&key.name).is_some(),
        };
        if !removed {
            return Err(RegistryError::NotFound(key.clone()));
        }
        tracing::debug!(entity = %key, "Binding removed");
        Ok(true)
    }

    fn update_binding_properties(
        &self,
        key: &EntityKey,
        diff: &PropertyDiff,
    ) -> Result<(), RegistryError> {
        if diff.kind() != key.kind {
            return Err(RegistryError::KindMismatch {
                expected: key.kind,
                found: diff.kind(),
            });
        }
        let not_found = || RegistryError::NotFound(key.clone());

        match diff {
            PropertyDiff::Address(changes) => {
                let mut entry = self.addresses.get_mut(&key.name).ok_or_else(not_found)?;
                changes.iter().for_each(|c| c.apply(&mut entry.spec));
            }
            PropertyDiff::Queue(changes) => {
                use crate::topology::binding::QueueChange;

                let mut filter = None;
                for change in changes {
                    match change {
                        QueueChange::Address(address) if !self.addresses.contains_key(address) => {
                            return Err(RegistryError::MissingAddress {
                                entity: key.clone(),
                                address: address.clone(),
                            });
                        }
                        QueueChange::Filter(f) => filter = Some(Self::compile(key, f.as_deref())?),
                        _ => {}
                    }
                }
                let mut entry = self.queues.get_mut(&key.name).ok_or_else(not_found)?;
                changes.iter().for_each(|c| c.apply(&mut entry.spec));
                if let Some(filter) = filter {
                    entry.filter = filter;
                }
            }
            PropertyDiff::Divert(changes) => {
                use crate::topology::binding::DivertChange;

                let mut filter = None;
                for change in changes {
                    if let DivertChange::Filter(f) = change {
                        filter = Some(Self::compile(key, f.as_deref())?);
                    }
                }
                let mut entry = self.diverts.get_mut(&key.name).ok_or_else(not_found)?;
                changes.iter().for_each(|c| c.apply(&mut entry.spec));
                if let Some(filter) = filter {
                    entry.filter = filter;
                }
            }
            PropertyDiff::Bridge(changes) => {
                use crate::topology::binding::BridgeChange;

                let mut filter = None;
                for change in changes {
                    match change {
                        BridgeChange::QueueName(queue) if !self.queues.contains_key(queue) => {
                            return Err(RegistryError::MissingQueue {
                                entity: key.clone(),
                                queue: queue.clone(),
                            });
                        }
                        BridgeChange::Filter(f) => filter = Some(Self::compile(key, f.as_deref())?),
                        _ => {}
                    }
                }
                {
                    let mut entry = self.bridges.get_mut(&key.name).ok_or_else(not_found)?;
                    changes.iter().for_each(|c| c.apply(&mut entry.spec));
                    if let Some(filter) = filter {
                        entry.filter = filter;
                    }
                }
                self.pump_bridge(&key.name);
            }
        }

        tracing::debug!(entity = %key, changed = ?diff.fields(), "Binding updated in place");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn address(name: &str, types: &[RoutingType]) -> EntitySpec {
        EntitySpec::Address(AddressSpec {
            name: name.into(),
            routing_types: types.iter().copied().collect::<BTreeSet<_>>(),
        })
    }

    fn queue(name: &str, address: &str, rt: RoutingType) -> EntitySpec {
        EntitySpec::Queue(QueueSpec::new(name, address, rt))
    }

    fn divert(name: &str, from: &str, to: &str, filter: Option<&str>, exclusive: bool) -> DivertSpec {
        DivertSpec {
            name: name.into(),
            address: from.into(),
            forwarding_address: to.into(),
            filter: filter.map(String::from),
            exclusive,
            routing_type: ComponentRoutingType::Strip,
            transformer: None,
        }
    }

    fn post_office() -> PostOffice {
        let po = PostOffice::new();
        po.add_binding(address("source", &[RoutingType::Anycast])).unwrap();
        po.add_binding(address("target", &[RoutingType::Anycast])).unwrap();
        po.add_binding(queue("source", "source", RoutingType::Anycast)).unwrap();
        po.add_binding(queue("target", "target", RoutingType::Anycast)).unwrap();
        po
    }

    #[test]
    fn test_queue_requires_address() {
        let po = PostOffice::new();
        let err = po.add_binding(queue("q", "missing", RoutingType::Anycast)).unwrap_err();
        assert!(matches!(err, RegistryError::MissingAddress { .. }));
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let po = post_office();
        let err = po.add_binding(queue("source", "source", RoutingType::Anycast)).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists(EntityKey::queue("source")));
    }

    #[test]
    fn test_invalid_filter_rejected_at_create() {
        let po = post_office();
        let spec = EntitySpec::Divert(divert("d", "source", "target", Some("x = "), false));
        assert!(matches!(
            po.add_binding(spec),
            Err(RegistryError::InvalidFilter { .. })
        ));
        assert!(po.get_binding(&EntityKey::divert("d")).is_none());
    }

    #[test]
    fn test_multicast_copies_anycast_picks_one() {
        let po = PostOffice::new();
        po.add_binding(address("news", &[RoutingType::Anycast, RoutingType::Multicast]))
            .unwrap();
        po.add_binding(queue("sub1", "news", RoutingType::Multicast)).unwrap();
        po.add_binding(queue("sub2", "news", RoutingType::Multicast)).unwrap();
        po.add_binding(queue("work1", "news", RoutingType::Anycast)).unwrap();
        po.add_binding(queue("work2", "news", RoutingType::Anycast)).unwrap();

        assert_eq!(po.send("news", Message::new("a")), 3);
        assert_eq!(po.send("news", Message::new("b").with_routing_type(RoutingType::Anycast)), 1);
        assert_eq!(po.message_count("work1"), Some(1));
        assert_eq!(po.message_count("work2"), Some(1));
        assert_eq!(po.message_count("sub1"), Some(1));
    }

    #[test]
    fn test_divert_filter_and_exclusivity() {
        let po = post_office();
        po.add_binding(EntitySpec::Divert(divert("d", "source", "target", Some("x = 'x'"), false)))
            .unwrap();

        po.send("source", Message::new("plain"));
        po.send("source", Message::new("tagged").with_property("x", "x"));
        assert_eq!(po.message_count("source"), Some(2));
        assert_eq!(po.message_count("target"), Some(1));

        let id = po.get_binding(&EntityKey::divert("d")).unwrap().id();
        let diff = PropertyDiff::Divert(vec![crate::topology::binding::DivertChange::Exclusive(true)]);
        po.update_binding_properties(&EntityKey::divert("d"), &diff).unwrap();
        assert_eq!(po.get_binding(&EntityKey::divert("d")).unwrap().id(), id);

        po.send("source", Message::new("tagged").with_property("x", "x"));
        assert_eq!(po.message_count("source"), Some(2));
        assert_eq!(po.message_count("target"), Some(2));
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let po = post_office();
        use crate::topology::binding::QueueChange;
        let diff = PropertyDiff::Queue(vec![
            QueueChange::MaxConsumers(3),
            QueueChange::Filter(Some("((".into())),
        ]);
        assert!(po.update_binding_properties(&EntityKey::queue("source"), &diff).is_err());
        match po.get_binding(&EntityKey::queue("source")).unwrap() {
            Binding::Queue { spec, .. } => assert_eq!(spec.max_consumers, -1),
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn test_queue_rebind_keeps_messages() {
        let po = post_office();
        po.send("source", Message::new("kept"));
        use crate::topology::binding::QueueChange;
        let diff = PropertyDiff::Queue(vec![QueueChange::Address("target".into())]);
        po.update_binding_properties(&EntityKey::queue("source"), &diff).unwrap();

        po.send("target", Message::new("new").with_routing_type(RoutingType::Anycast));
        assert_eq!(po.receive("source").unwrap().body, "kept");
    }

    #[test]
    fn test_referenced_address_not_removed() {
        let po = post_office();
        assert_eq!(po.remove_binding(&EntityKey::address("source")), Ok(false));
        assert_eq!(po.remove_binding(&EntityKey::queue("source")), Ok(true));
        assert_eq!(po.remove_binding(&EntityKey::address("source")), Ok(true));
        assert_eq!(
            po.remove_binding(&EntityKey::address("source")),
            Err(RegistryError::NotFound(EntityKey::address("source")))
        );
    }

    #[test]
    fn test_remote_binding_blocks_removal() {
        let po = post_office();
        let key = EntityKey::queue("target");
        po.add_remote_binding(key.clone());
        assert_eq!(po.remove_binding(&key), Ok(false));
        assert!(po.remove_remote_binding(&key));
        assert_eq!(po.remove_binding(&key), Ok(true));
    }

    #[test]
    fn test_bridge_drains_and_follows_target_change() {
        let po = post_office();
        po.add_binding(address("other", &[RoutingType::Anycast])).unwrap();
        po.add_binding(queue("other", "other", RoutingType::Anycast)).unwrap();
        po.send("source", Message::new("before"));

        let bridge = BridgeSpec {
            name: "b".into(),
            queue_name: "source".into(),
            forwarding_address: "target".into(),
            filter: None,
            transformer: None,
            concurrency: 2,
            routing_type: ComponentRoutingType::Pass,
        };
        po.add_binding(EntitySpec::Bridge(bridge)).unwrap();
        assert_eq!(po.message_count("source"), Some(0));
        assert_eq!(po.message_count("target"), Some(1));
        assert_eq!(po.consumer_count("source"), Some(2));

        use crate::topology::binding::BridgeChange;
        let diff = PropertyDiff::Bridge(vec![BridgeChange::ForwardingAddress("other".into())]);
        po.update_binding_properties(&EntityKey::bridge("b"), &diff).unwrap();
        po.send("source", Message::new("after"));
        assert_eq!(po.message_count("target"), Some(1));
        assert_eq!(po.message_count("other"), Some(1));
    }

    #[test]
    fn test_consumer_limit_and_purge() {
        let po = post_office();
        use crate::topology::binding::QueueChange;
        let diff = PropertyDiff::Queue(vec![
            QueueChange::MaxConsumers(1),
            QueueChange::PurgeOnNoConsumers(true),
        ]);
        po.update_binding_properties(&EntityKey::queue("source"), &diff).unwrap();

        po.open_consumer("source").unwrap();
        assert!(matches!(
            po.open_consumer("source"),
            Err(RegistryError::MaxConsumersReached { .. })
        ));
        po.send("source", Message::new("m"));
        po.close_consumer("source").unwrap();
        assert_eq!(po.message_count("source"), Some(0));
    }

    #[test]
    fn test_auto_create_widens_address() {
        let po = post_office();
        let created = po
            .auto_create_queue("sub", "source", RoutingType::Multicast, true)
            .unwrap();
        assert_eq!(created, vec![EntityKey::queue("sub")]);
        match po.get_binding(&EntityKey::address("source")).unwrap() {
            Binding::Address { spec, .. } => assert_eq!(spec.routing_types.len(), 2),
            other => panic!("unexpected binding {other:?}"),
        }
        assert!(po
            .auto_create_queue("sub", "source", RoutingType::Multicast, true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_auto_create_without_widening() {
        let po = post_office();
        let before = po.get_binding(&EntityKey::address("source"));
        assert_eq!(
            po.auto_create_queue("sub", "source", RoutingType::Multicast, false),
            Err(RegistryError::RoutingTypeNotAllowed {
                address: "source".into(),
                routing_type: RoutingType::Multicast,
            })
        );
        assert_eq!(po.get_binding(&EntityKey::address("source")), before);
        assert!(po.get_binding(&EntityKey::queue("sub")).is_none());

        let created = po
            .auto_create_queue("p2p", "source", RoutingType::Anycast, false)
            .unwrap();
        assert_eq!(created, vec![EntityKey::queue("p2p")]);
    }
}
