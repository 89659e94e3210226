//! Hierarchical, pattern-keyed policy.
//!
//! # Data Flow
//! ```text
//! desired snapshot / management call
//!     → repository.rs (pattern → fragment, config and management layers)
//!     → ArcSwap<Store> (whole store replaced on every change)
//!
//! resolve(address):
//!     Store.ordered (patterns sorted most specific first)
//!     → keep patterns matching address
//!     → overlay.rs (fold fragments into one accumulator)
//!     → global default fragment, then hard-coded defaults
//!     → cached per address inside the Store
//! ```
//!
//! # Design Decisions
//! - Address settings merge fill-if-unset: the most specific assignment wins
//! - Security roles merge by union: each pattern grants independently
//! - The cache lives inside the swapped store, so a reader sees either the
//!   old policy or the new one, never a mix

pub mod address_settings;
pub mod overlay;
pub mod repository;
pub mod security;

pub use address_settings::{
    AddressFullMessagePolicy, AddressSettings, ResolvedAddressSettings, SlowConsumerPolicy,
    SlowConsumerThresholdMeasurementUnit,
};
pub use overlay::Mergeable;
pub use repository::{HierarchicalRepository, RebuildOutcome};
pub use security::{CheckType, Role, RoleSet};

/// Resolves per-address operational settings.
pub type SettingsRepository = HierarchicalRepository<AddressSettings>;

/// Resolves per-address role grants.
pub type SecurityRepository = HierarchicalRepository<RoleSet>;
