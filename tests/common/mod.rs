//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use broker_reload::config::MemoryConfigSource;
use broker_reload::topology::{Binding, BindingId, EntityKey, EntitySpec, ReconciliationReport};
use broker_reload::wildcard::WildcardSyntax;
use broker_reload::{Broker, TickOutcome};

/// A broker over an in-memory document. The returned source is used to
/// simulate edits to the configuration file.
pub fn broker_with(content: &str) -> (Arc<MemoryConfigSource>, Arc<Broker>) {
    let source = Arc::new(MemoryConfigSource::new(content));
    let broker = Broker::new(
        source.clone(),
        WildcardSyntax::default(),
        Duration::from_millis(20),
    );
    (source, Arc::new(broker))
}

/// A broker that has already applied `content`.
pub fn started(content: &str) -> (Arc<MemoryConfigSource>, Arc<Broker>) {
    let (source, broker) = broker_with(content);
    applied(broker.reload());
    (source, broker)
}

/// Replace the document and run one pass, expecting it to apply.
pub fn redeploy(source: &MemoryConfigSource, broker: &Broker, content: &str) -> ReconciliationReport {
    source.set(content);
    applied(broker.reload())
}

pub fn applied(outcome: TickOutcome) -> ReconciliationReport {
    match outcome {
        TickOutcome::Applied(report) => report,
        other => panic!("expected an applied pass, got {}", other.label()),
    }
}

pub fn binding_id(broker: &Broker, key: &EntityKey) -> BindingId {
    broker
        .binding(key)
        .unwrap_or_else(|| panic!("{key} should exist"))
        .id()
}

/// Live specs keyed by entity, without registry-assigned ids.
pub fn live_specs(broker: &Broker) -> BTreeMap<EntityKey, EntitySpec> {
    broker
        .bindings()
        .iter()
        .map(|b: &Binding| (b.key(), b.spec()))
        .collect()
}
