//! Broker composition root.
//!
//! Wires the live registry, provenance tracker, policy repositories, reload
//! manager and management service together. Client-facing operations go
//! through [`Broker`]; only the reconciler inside the reload manager holds a
//! write handle on the registry.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BrokerConfig, ConfigSource};
use crate::management::ManagementService;
use crate::reload::{ReloadManager, TickOutcome};
use crate::settings::{ResolvedAddressSettings, RoleSet, SecurityRepository, SettingsRepository};
use crate::topology::{
    Binding, EntityKey, Message, PostOffice, Provenance, ProvenanceTracker, RegistryError,
    RegistryReader, RoutingType, TopologyReconciler,
};
use crate::wildcard::WildcardSyntax;

pub struct Broker {
    post_office: Arc<PostOffice>,
    tracker: Arc<ProvenanceTracker>,
    settings: Arc<SettingsRepository>,
    security: Arc<SecurityRepository>,
    reload: Arc<ReloadManager>,
    management: Arc<ManagementService>,
}

impl Broker {
    pub fn new(source: Arc<dyn ConfigSource>, syntax: WildcardSyntax, period: Duration) -> Self {
        let post_office = Arc::new(PostOffice::new());
        let tracker = Arc::new(ProvenanceTracker::new());
        let settings = Arc::new(SettingsRepository::new("address-settings", syntax));
        let security = Arc::new(SecurityRepository::new("security", syntax));

        let reconciler = TopologyReconciler::new(post_office.clone(), tracker.clone());
        let reload = Arc::new(ReloadManager::new(
            source,
            reconciler,
            settings.clone(),
            security.clone(),
            period,
        ));
        let management = Arc::new(ManagementService::new(
            settings.clone(),
            security.clone(),
            reload.clone(),
        ));

        Self {
            post_office,
            tracker,
            settings,
            security,
            reload,
            management,
        }
    }

    /// Take wildcard syntax and reload period from an already loaded config.
    pub fn from_config(source: Arc<dyn ConfigSource>, config: &BrokerConfig) -> Self {
        Self::new(
            source,
            config.wildcard,
            Duration::from_millis(config.reload.period_ms),
        )
    }

    /// Run one reload check now.
    pub fn reload(&self) -> TickOutcome {
        self.reload.tick()
    }

    pub fn reload_manager(&self) -> &Arc<ReloadManager> {
        &self.reload
    }

    pub fn management(&self) -> &Arc<ManagementService> {
        &self.management
    }

    pub fn registry(&self) -> Arc<dyn RegistryReader> {
        self.post_office.clone()
    }

    pub fn settings_for(&self, address: &str) -> Arc<ResolvedAddressSettings> {
        self.settings.resolve(address)
    }

    pub fn roles_for(&self, address: &str) -> Arc<RoleSet> {
        self.security.resolve(address)
    }

    pub fn provenance(&self, key: &EntityKey) -> Provenance {
        self.tracker.classify(key)
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.post_office.list_bindings()
    }

    pub fn binding(&self, key: &EntityKey) -> Option<Binding> {
        self.post_office.get_binding(key)
    }

    /// Route a message to `address`. Returns the number of queues it reached.
    pub fn send(&self, address: &str, message: Message) -> usize {
        self.post_office.send(address, message)
    }

    pub fn receive(&self, queue: &str) -> Option<Message> {
        self.post_office.receive(queue)
    }

    pub fn message_count(&self, queue: &str) -> Option<usize> {
        self.post_office.message_count(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> Option<u32> {
        self.post_office.consumer_count(queue)
    }

    pub fn open_consumer(&self, queue: &str) -> Result<(), RegistryError> {
        self.post_office.open_consumer(queue)
    }

    pub fn close_consumer(&self, queue: &str) -> Result<(), RegistryError> {
        self.post_office.close_consumer(queue)
    }

    /// Create a queue for a client session. Anything this creates is tagged
    /// client-created and survives every later reload. A declared address
    /// is never widened; it must already allow `routing_type`.
    pub fn auto_create_queue(
        &self,
        name: &str,
        address: &str,
        routing_type: RoutingType,
    ) -> Result<(), RegistryError> {
        let widen = self.tracker.classify(&EntityKey::address(address)) == Provenance::ClientCreated;
        for key in self
            .post_office
            .auto_create_queue(name, address, routing_type, widen)?
        {
            tracing::debug!(entity = %key, "Auto-created for client");
            self.tracker.record_client_created(key);
        }
        Ok(())
    }

    /// Attach a binding owned by another cluster node.
    pub fn add_remote_binding(&self, key: EntityKey) {
        self.post_office.add_remote_binding(key);
    }

    pub fn remove_remote_binding(&self, key: &EntityKey) -> bool {
        self.post_office.remove_remote_binding(key)
    }
}
