//! Topology redeploy scenarios driven through the reload manager.

mod common;

use std::collections::BTreeSet;

use broker_reload::topology::{
    Binding, ComponentRoutingType, DivertSpec, EntityKey, Message, Provenance, RoutingType,
};
use broker_reload::TickOutcome;

use common::{applied, binding_id, live_specs, redeploy, started};

const BASE: &str = r#"
    [[addresses]]
    name = "orders"

    [[addresses.queues]]
    name = "orders.q"

    [[addresses]]
    name = "audit"
    permanent = true

    [[addresses.queues]]
    name = "audit.q"
"#;

#[test]
fn test_redeploy_deletes_only_config_managed() {
    let (source, broker) = started(BASE);
    broker
        .auto_create_queue("temp", "events", RoutingType::Anycast)
        .unwrap();

    let report = redeploy(&source, &broker, "");

    let deleted: BTreeSet<_> = report.deleted.iter().cloned().collect();
    assert_eq!(
        deleted,
        BTreeSet::from([
            EntityKey::queue("orders.q"),
            EntityKey::queue("audit.q"),
            EntityKey::address("orders"),
        ])
    );
    let skipped: BTreeSet<_> = report.skipped.iter().cloned().collect();
    assert_eq!(
        skipped,
        BTreeSet::from([
            EntityKey::address("audit"),
            EntityKey::address("events"),
            EntityKey::queue("temp"),
        ])
    );
    assert!(report.errors.is_empty());
    assert_eq!(
        broker.provenance(&EntityKey::address("audit")),
        Provenance::Permanent
    );
}

#[test]
fn test_unchanged_entities_keep_identity_and_messages() {
    let (source, broker) = started(BASE);
    let before = binding_id(&broker, &EntityKey::queue("orders.q"));
    broker.send("orders", Message::new("kept"));

    let with_extra = format!("{BASE}\n[[addresses]]\nname = \"extra\"\n");
    let report = redeploy(&source, &broker, &with_extra);

    assert_eq!(report.created, vec![EntityKey::address("extra")]);
    assert!(report.updated.is_empty());
    assert_eq!(binding_id(&broker, &EntityKey::queue("orders.q")), before);
    assert_eq!(broker.message_count("orders.q"), Some(1));
}

#[test]
fn test_declaring_a_client_queue_adopts_it() {
    let (source, broker) = started("");
    broker
        .auto_create_queue("orders.q", "orders", RoutingType::Anycast)
        .unwrap();
    broker.send("orders", Message::new("before adoption"));

    let report = redeploy(&source, &broker, BASE);
    assert!(!report.created.contains(&EntityKey::queue("orders.q")));
    assert_eq!(
        broker.provenance(&EntityKey::queue("orders.q")),
        Provenance::ConfigManaged
    );

    // Once adopted, removing the declaration deletes it.
    source.set("");
    broker.receive("orders.q");
    let report = applied(broker.reload());
    assert!(report.deleted.contains(&EntityKey::queue("orders.q")));
}

fn divert_config(filter: Option<&str>, exclusive: bool, address: &str) -> String {
    let filter = filter
        .map(|f| format!("filter = \"{f}\"\n"))
        .unwrap_or_default();
    format!(
        r#"
        [[addresses]]
        name = "orders"
        [[addresses.queues]]
        name = "orders.q"

        [[addresses]]
        name = "eu"
        [[addresses.queues]]
        name = "eu.q"

        [[addresses]]
        name = "other"

        [[diverts]]
        name = "eu-divert"
        address = "{address}"
        forwarding_address = "eu"
        exclusive = {exclusive}
        {filter}
        "#
    )
}

fn eu_message() -> Message {
    Message::new("order").with_property("region", "eu")
}

fn drain(broker: &broker_reload::Broker, queue: &str) -> usize {
    let mut n = 0;
    while broker.receive(queue).is_some() {
        n += 1;
    }
    n
}

#[test]
fn test_divert_filter_changes_apply_in_place() {
    let (source, broker) = started(&divert_config(Some("region = 'eu'"), false, "orders"));
    let divert = EntityKey::divert("eu-divert");
    let id = binding_id(&broker, &divert);

    assert_eq!(broker.send("orders", eu_message()), 2);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (1, 1));

    let report = redeploy(&source, &broker, &divert_config(Some("region = 'us'"), false, "orders"));
    assert_eq!(report.updated, vec![divert.clone()]);
    assert_eq!(binding_id(&broker, &divert), id);
    assert_eq!(broker.send("orders", eu_message()), 1);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (0, 1));

    redeploy(&source, &broker, &divert_config(None, false, "orders"));
    assert_eq!(broker.send("orders", Message::new("no region")), 2);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (1, 1));

    // A filter that comes back after removal is honoured again.
    redeploy(&source, &broker, &divert_config(Some("region = 'eu'"), false, "orders"));
    assert_eq!(broker.send("orders", Message::new("no region")), 1);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (0, 1));
    assert_eq!(binding_id(&broker, &divert), id);
}

#[test]
fn test_divert_exclusivity_and_address_change() {
    let (source, broker) = started(&divert_config(None, false, "orders"));
    let divert = EntityKey::divert("eu-divert");

    redeploy(&source, &broker, &divert_config(None, true, "orders"));
    assert_eq!(broker.send("orders", eu_message()), 1);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (1, 0));

    let report = redeploy(&source, &broker, &divert_config(None, true, "other"));
    assert_eq!(report.updated, vec![divert.clone()]);
    match broker.binding(&divert) {
        Some(Binding::Divert { spec, .. }) => assert_eq!(spec.address, "other"),
        other => panic!("unexpected binding {other:?}"),
    }
    assert_eq!(broker.send("orders", eu_message()), 1);
    assert_eq!((drain(&broker, "eu.q"), drain(&broker, "orders.q")), (0, 1));
    assert_eq!(broker.send("other", eu_message()), 1);
    assert_eq!(drain(&broker, "eu.q"), 1);
}

fn bridge_config(target: &str) -> String {
    format!(
        r#"
        [[addresses]]
        name = "in"
        [[addresses.queues]]
        name = "in.q"

        [[addresses]]
        name = "out-a"
        [[addresses.queues]]
        name = "a.q"

        [[addresses]]
        name = "out-b"
        [[addresses.queues]]
        name = "b.q"

        [[bridges]]
        name = "forward"
        queue_name = "in.q"
        forwarding_address = "{target}"
        "#
    )
}

#[test]
fn test_bridge_target_change_is_in_place() {
    let (source, broker) = started(&bridge_config("out-a"));
    let bridge = EntityKey::bridge("forward");
    let id = binding_id(&broker, &bridge);

    broker.send("in", Message::new("first"));
    assert_eq!(broker.message_count("a.q"), Some(1));
    assert_eq!(broker.message_count("in.q"), Some(0));

    let report = redeploy(&source, &broker, &bridge_config("out-b"));
    assert_eq!(report.updated, vec![bridge.clone()]);
    assert_eq!(binding_id(&broker, &bridge), id);

    broker.send("in", Message::new("second"));
    assert_eq!(broker.message_count("a.q"), Some(1));
    assert_eq!(broker.message_count("b.q"), Some(1));
}

#[test]
fn test_new_bridge_drains_waiting_messages() {
    let without_bridge = r#"
        [[addresses]]
        name = "in"
        [[addresses.queues]]
        name = "in.q"

        [[addresses]]
        name = "out-a"
        [[addresses.queues]]
        name = "a.q"
    "#;
    let (source, broker) = started(without_bridge);
    broker.send("in", Message::new("waiting"));
    assert_eq!(broker.message_count("in.q"), Some(1));

    let with_bridge = format!(
        "{without_bridge}\n[[bridges]]\nname = \"forward\"\nqueue_name = \"in.q\"\nforwarding_address = \"out-a\"\n"
    );
    let report = redeploy(&source, &broker, &with_bridge);
    assert_eq!(report.created, vec![EntityKey::bridge("forward")]);
    assert_eq!(broker.message_count("in.q"), Some(0));
    assert_eq!(broker.message_count("a.q"), Some(1));
}

fn routing_config(queue_type: &str, address: &str) -> String {
    let queue = format!(
        "[[addresses.queues]]\nname = \"events.q\"\nrouting_type = \"{queue_type}\"\n"
    );
    let (on_events, on_v2) = if address == "events" {
        (queue.as_str(), "")
    } else {
        ("", queue.as_str())
    };
    format!(
        r#"
        [[addresses]]
        name = "events"
        routing_types = ["anycast", "multicast"]
        {on_events}

        [[addresses]]
        name = "events.v2"
        routing_types = ["anycast", "multicast"]
        {on_v2}
        "#
    )
}

#[test]
fn test_queue_routing_type_change_keeps_messages() {
    let (source, broker) = started(&routing_config("anycast", "events"));
    let queue = EntityKey::queue("events.q");
    let id = binding_id(&broker, &queue);
    broker.send("events", Message::new("stored"));

    let report = redeploy(&source, &broker, &routing_config("multicast", "events"));
    assert_eq!(report.updated, vec![queue.clone()]);
    assert_eq!(binding_id(&broker, &queue), id);
    assert_eq!(broker.message_count("events.q"), Some(1));
    match broker.binding(&queue) {
        Some(Binding::Queue { spec, .. }) => assert_eq!(spec.routing_type, RoutingType::Multicast),
        other => panic!("unexpected binding {other:?}"),
    }

    // Anycast-only traffic no longer reaches it.
    assert_eq!(
        broker.send("events", Message::new("p2p").with_routing_type(RoutingType::Anycast)),
        0
    );
}

#[test]
fn test_queue_address_change_rebinds_in_place() {
    let (source, broker) = started(&routing_config("anycast", "events"));
    broker.send("events", Message::new("stored"));

    let report = redeploy(&source, &broker, &routing_config("anycast", "events.v2"));
    assert_eq!(report.updated, vec![EntityKey::queue("events.q")]);
    assert_eq!(broker.message_count("events.q"), Some(1));
    assert_eq!(broker.send("events", Message::new("old address")), 0);
    assert_eq!(broker.send("events.v2", Message::new("new address")), 1);
}

#[test]
fn test_referenced_delete_is_retried() {
    let (source, broker) = started(BASE);
    broker.add_remote_binding(EntityKey::queue("orders.q"));

    let report = redeploy(&source, &broker, "[[addresses]]\nname = \"audit\"\npermanent = true\n");
    let conflicts: BTreeSet<_> = report.conflicts().cloned().collect();
    assert_eq!(
        conflicts,
        BTreeSet::from([EntityKey::queue("orders.q"), EntityKey::address("orders")])
    );
    assert_eq!(broker.reload_manager().status().pending_conflicts, 2);

    // Still referenced: the retry conflicts again.
    match broker.reload() {
        TickOutcome::Retried(report) => assert!(report.has_conflicts()),
        other => panic!("expected a retry, got {}", other.label()),
    }

    assert!(broker.remove_remote_binding(&EntityKey::queue("orders.q")));
    match broker.reload() {
        TickOutcome::Retried(report) => {
            assert!(!report.has_conflicts());
            assert!(report.deleted.contains(&EntityKey::queue("orders.q")));
            assert!(report.deleted.contains(&EntityKey::address("orders")));
        }
        other => panic!("expected a retry, got {}", other.label()),
    }
    assert!(matches!(broker.reload(), TickOutcome::Unchanged));
    assert_eq!(broker.reload_manager().status().pending_conflicts, 0);
}

#[test]
fn test_kept_dependents_do_not_cause_endless_retries() {
    let (source, broker) = started(
        r#"
        [[addresses]]
        name = "a"

        [[addresses.queues]]
        name = "q"
        permanent = true

        [[addresses]]
        name = "orders"
        "#,
    );
    broker
        .auto_create_queue("temp", "orders", RoutingType::Anycast)
        .unwrap();

    let report = redeploy(&source, &broker, "");
    assert!(!report.has_conflicts());
    let skipped: BTreeSet<_> = report.skipped.iter().cloned().collect();
    assert_eq!(
        skipped,
        BTreeSet::from([
            EntityKey::queue("q"),
            EntityKey::queue("temp"),
            EntityKey::address("a"),
            EntityKey::address("orders"),
        ])
    );
    assert_eq!(broker.reload_manager().status().pending_conflicts, 0);

    for _ in 0..3 {
        assert!(matches!(broker.reload(), TickOutcome::Unchanged));
    }
}

#[test]
fn test_management_divert_survives_redeploy() {
    let (source, broker) = started(&divert_config(None, false, "orders"));
    let tap = DivertSpec {
        name: "tap".into(),
        address: "orders".into(),
        forwarding_address: "other".into(),
        filter: None,
        exclusive: false,
        routing_type: ComponentRoutingType::Pass,
        transformer: None,
    };
    broker.management().create_divert(tap).unwrap();
    let key = EntityKey::divert("tap");
    let id = binding_id(&broker, &key);
    assert_eq!(broker.provenance(&key), Provenance::ClientCreated);

    let report = redeploy(&source, &broker, &divert_config(Some("region = 'eu'"), true, "orders"));
    assert_eq!(report.updated, vec![EntityKey::divert("eu-divert")]);
    assert!(report.skipped.contains(&key));
    assert_eq!(binding_id(&broker, &key), id);

    // The divert keeps its address alive when the document drops it.
    let report = redeploy(&source, &broker, "");
    assert!(!report.has_conflicts());
    assert!(report.skipped.contains(&EntityKey::address("orders")));
    assert_eq!(binding_id(&broker, &key), id);

    assert!(broker.management().destroy_divert("tap").unwrap());
    assert!(broker.binding(&key).is_none());
}

#[test]
fn test_overly_nested_filter_is_an_entity_error() {
    let (source, broker) = started(&divert_config(Some("region = 'eu'"), false, "orders"));
    let nested = format!("{}region = 'us'{}", "(".repeat(10_000), ")".repeat(10_000));

    let report = redeploy(&source, &broker, &divert_config(Some(&nested), false, "orders"));
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].entity(), &EntityKey::divert("eu-divert"));
    assert!(report.updated.is_empty());

    // The previous filter is still in effect.
    assert_eq!(broker.send("orders", eu_message()), 2);
}

#[test]
fn test_rejected_document_keeps_last_known_good() {
    let (source, broker) = started(BASE);
    let before = live_specs(&broker);

    source.set("[[addresses]\nname = ");
    assert!(matches!(broker.reload(), TickOutcome::Failed(_)));

    // Parses, but declares the same queue twice.
    source.set(
        r#"
        [[addresses]]
        name = "orders"
        [[addresses.queues]]
        name = "dup"
        [[addresses.queues]]
        name = "dup"
        "#,
    );
    assert!(matches!(broker.reload(), TickOutcome::Failed(_)));
    assert_eq!(live_specs(&broker), before);
    assert!(broker.reload_manager().status().last_error.is_some());
}

#[test]
fn test_nodes_converge_on_the_same_topology() {
    let target = divert_config(Some("region = 'eu'"), true, "orders");

    // A live node that went through an intermediate deployment.
    let (source, live) = started(&bridge_config("out-a"));
    redeploy(&source, &live, &target);

    // A backup that starts directly from the final document.
    let (_, backup) = started(&target);

    assert_eq!(live_specs(&live), live_specs(&backup));
}
