//! Configuration schema definitions.
//!
//! This module defines the desired-state document the broker reconciles
//! against. All types derive Serde traits for deserialization from TOML.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::settings::{AddressSettings, Role, RoleSet};
use crate::topology::{
    AddressSpec, BridgeSpec, ComponentRoutingType, DesiredTopology, DivertSpec, EntitySpec,
    QueueSpec, RoutingType,
};
use crate::wildcard::WildcardSyntax;

/// Root configuration for the broker.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Reload scheduling.
    pub reload: ReloadConfig,

    /// Characters used by address patterns.
    pub wildcard: WildcardSyntax,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Global fallback applied after every matching pattern.
    pub default_address_settings: Option<DefaultAddressSettings>,

    /// Per-pattern settings fragments.
    pub address_settings: Vec<AddressSettingsEntry>,

    /// Per-pattern role grants.
    pub security_settings: Vec<SecuritySettingsEntry>,

    pub addresses: Vec<AddressConfig>,

    pub diverts: Vec<DivertConfig>,

    pub bridges: Vec<BridgeConfig>,
}

/// Reload scheduling.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReloadConfig {
    /// Check the source periodically.
    pub enabled: bool,

    /// Check period in milliseconds.
    pub period_ms: u64,

    /// Also check as soon as the file system reports a change.
    pub watch: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 5000,
            watch: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8161".to_string(),
        }
    }
}

/// `[[address_settings]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AddressSettingsEntry {
    #[serde(rename = "match")]
    pub pattern: String,

    #[serde(flatten)]
    pub settings: AddressSettings,

    /// Keys that are not settings; validation refuses them.
    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// `[default_address_settings]` table.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DefaultAddressSettings {
    #[serde(flatten)]
    pub settings: AddressSettings,

    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// `[[security_settings]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SecuritySettingsEntry {
    #[serde(rename = "match")]
    pub pattern: String,

    pub roles: Vec<Role>,
}

/// `[[addresses]]` entry with its queues.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AddressConfig {
    pub name: String,

    /// Empty means "whatever the queues need", or anycast without queues.
    pub routing_types: Vec<RoutingType>,

    pub permanent: bool,

    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,

    /// Defaults to the address's first routing type.
    pub routing_type: Option<RoutingType>,

    pub filter: Option<String>,

    /// -1 means unlimited.
    pub max_consumers: i32,

    pub purge_on_no_consumers: bool,

    pub enabled: bool,

    pub exclusive: bool,

    pub permanent: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            routing_type: None,
            filter: None,
            max_consumers: -1,
            purge_on_no_consumers: false,
            enabled: true,
            exclusive: false,
            permanent: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DivertConfig {
    pub name: String,
    pub address: String,
    pub forwarding_address: String,
    pub filter: Option<String>,
    pub exclusive: bool,
    pub routing_type: ComponentRoutingType,
    pub transformer: Option<String>,
    pub permanent: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub name: String,

    /// Queue the bridge consumes from.
    pub queue_name: String,

    pub forwarding_address: String,
    pub filter: Option<String>,
    pub transformer: Option<String>,

    /// Consumers the bridge opens on its queue.
    pub concurrency: u32,

    pub routing_type: ComponentRoutingType,
    pub permanent: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            queue_name: String::new(),
            forwarding_address: String::new(),
            filter: None,
            transformer: None,
            concurrency: 1,
            routing_type: ComponentRoutingType::Pass,
            permanent: false,
        }
    }
}

/// A blank filter is the same as no filter.
fn normalize_filter(filter: &Option<String>) -> Option<String> {
    filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
}

impl DivertConfig {
    pub fn to_spec(&self) -> DivertSpec {
        DivertSpec {
            name: self.name.clone(),
            address: self.address.clone(),
            forwarding_address: self.forwarding_address.clone(),
            filter: normalize_filter(&self.filter),
            exclusive: self.exclusive,
            routing_type: self.routing_type,
            transformer: self.transformer.clone(),
        }
    }
}

impl AddressConfig {
    fn effective_routing_types(&self) -> BTreeSet<RoutingType> {
        let mut types: BTreeSet<RoutingType> = self.routing_types.iter().copied().collect();
        if types.is_empty() {
            types.extend(self.queues.iter().filter_map(|q| q.routing_type));
        }
        if types.is_empty() {
            types.insert(RoutingType::Anycast);
        }
        types
    }
}

impl BrokerConfig {
    /// Addresses, queues, diverts and bridges this document declares.
    pub fn desired_topology(&self) -> DesiredTopology {
        let mut desired = DesiredTopology::new();

        for address in &self.addresses {
            let routing_types = address.effective_routing_types();
            let fallback = routing_types
                .iter()
                .next()
                .copied()
                .unwrap_or(RoutingType::Anycast);

            for queue in &address.queues {
                desired.declare(
                    EntitySpec::Queue(QueueSpec {
                        name: queue.name.clone(),
                        address: address.name.clone(),
                        routing_type: queue.routing_type.unwrap_or(fallback),
                        filter: normalize_filter(&queue.filter),
                        max_consumers: queue.max_consumers,
                        purge_on_no_consumers: queue.purge_on_no_consumers,
                        enabled: queue.enabled,
                        exclusive: queue.exclusive,
                    }),
                    queue.permanent,
                );
            }
            desired.declare(
                EntitySpec::Address(AddressSpec {
                    name: address.name.clone(),
                    routing_types,
                }),
                address.permanent,
            );
        }

        for divert in &self.diverts {
            desired.declare(EntitySpec::Divert(divert.to_spec()), divert.permanent);
        }

        for bridge in &self.bridges {
            desired.declare(
                EntitySpec::Bridge(BridgeSpec {
                    name: bridge.name.clone(),
                    queue_name: bridge.queue_name.clone(),
                    forwarding_address: bridge.forwarding_address.clone(),
                    filter: normalize_filter(&bridge.filter),
                    transformer: bridge.transformer.clone(),
                    concurrency: bridge.concurrency,
                    routing_type: bridge.routing_type,
                }),
                bridge.permanent,
            );
        }

        desired
    }

    /// `(pattern, fragment)` pairs in document order.
    pub fn settings_entries(&self) -> Vec<(String, AddressSettings)> {
        self.address_settings
            .iter()
            .map(|e| (e.pattern.clone(), e.settings.clone()))
            .collect()
    }

    pub fn default_settings(&self) -> Option<AddressSettings> {
        self.default_address_settings
            .as_ref()
            .map(|d| d.settings.clone())
    }

    /// `(pattern, roles)` pairs in document order.
    pub fn security_entries(&self) -> Vec<(String, RoleSet)> {
        self.security_settings
            .iter()
            .map(|e| (e.pattern.clone(), e.roles.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AddressFullMessagePolicy;
    use crate::topology::{EntityKey, EntityKind};

    const DOCUMENT: &str = r##"
        [reload]
        period_ms = 100

        [default_address_settings]
        max_delivery_attempts = 5

        [[address_settings]]
        match = "orders.#"
        dead_letter_address = "DLQ"
        redelivery_multiplier = 2
        address_full_message_policy = "BLOCK"

        [[security_settings]]
        match = "#"
        roles = [{ name = "admin", send = true, manage = true }]

        [[addresses]]
        name = "orders"
        permanent = true

        [[addresses.queues]]
        name = "orders.eu"
        filter = "  "

        [[addresses.queues]]
        name = "orders.audit"
        routing_type = "multicast"

        [[diverts]]
        name = "audit"
        address = "orders"
        forwarding_address = "audit"
        filter = "region = 'eu'"

        [[bridges]]
        name = "b"
        queue_name = "orders.eu"
        forwarding_address = "remote.orders"
    "##;

    #[test]
    fn test_minimal_document_loads_defaults() {
        let config: BrokerConfig = toml::from_str("").unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.reload.period_ms, 5000);
        assert_eq!(config.wildcard, WildcardSyntax::default());
    }

    #[test]
    fn test_full_document() {
        let config: BrokerConfig = toml::from_str(DOCUMENT).unwrap();
        assert_eq!(config.reload.period_ms, 100);

        let settings = &config.address_settings[0];
        assert_eq!(settings.pattern, "orders.#");
        assert_eq!(settings.settings.redelivery_multiplier, Some(2.0));
        assert_eq!(
            settings.settings.address_full_message_policy,
            Some(AddressFullMessagePolicy::Block)
        );
        assert_eq!(settings.settings.expiry_address, None);

        let roles = config.security_entries();
        assert!(roles[0].1.contains_role("admin"));
    }

    #[test]
    fn test_desired_topology() {
        let config: BrokerConfig = toml::from_str(DOCUMENT).unwrap();
        let desired = config.desired_topology();
        assert_eq!(desired.len(), 5);

        let address = desired.of_kind(EntityKind::Address).next().unwrap();
        assert!(address.permanent);
        match &address.spec {
            EntitySpec::Address(spec) => assert_eq!(spec.routing_types.len(), 1),
            other => panic!("unexpected {other:?}"),
        }

        let queue = desired
            .of_kind(EntityKind::Queue)
            .find(|d| d.spec.key() == EntityKey::queue("orders.eu"))
            .unwrap();
        match &queue.spec {
            EntitySpec::Queue(spec) => {
                assert_eq!(spec.filter, None);
                assert_eq!(spec.routing_type, RoutingType::Multicast);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unrecognised_settings_keys_are_kept_aside() {
        let doc = r##"
            [default_address_settings]
            max_delivery_atempts = 3

            [[address_settings]]
            match = "orders.#"
            dead_leter_address = "DLQ"
            redelivery_delay = 5
        "##;
        let config: BrokerConfig = toml::from_str(doc).unwrap();

        let entry = &config.address_settings[0];
        assert_eq!(entry.settings.redelivery_delay, Some(5));
        assert_eq!(entry.settings.dead_letter_address, None);
        assert!(entry.unknown.contains_key("dead_leter_address"));
        assert!(!entry.unknown.contains_key("match"));
        assert!(!entry.unknown.contains_key("redelivery_delay"));

        let default = config.default_address_settings.as_ref().unwrap();
        assert!(default.unknown.contains_key("max_delivery_atempts"));
        assert_eq!(config.default_settings(), Some(AddressSettings::default()));
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        let doc = r##"
            [[address_settings]]
            match = "#"
            address_full_message_policy = "SOMETIMES"
        "##;
        assert!(toml::from_str::<BrokerConfig>(doc).is_err());
    }
}
