//! Live topology and its reconciliation.
//!
//! # Data Flow
//! ```text
//! DesiredTopology (from a parsed snapshot)
//!     → reconciler.rs
//!         phase 1: create / update in place   (address → queue → divert → bridge)
//!         phase 2: delete undeclared          (bridge → divert → queue → address)
//!     → LiveRegistry (registry.rs, PostOffice)
//!     → ReconciliationReport (report.rs)
//!
//! Delete decision:
//!     provenance.rs: CLIENT_CREATED | PERMANENT → keep
//!                    CONFIG_MANAGED             → remove_binding
//!                                                 false → Conflict, retried next pass
//! ```
//!
//! # Design Decisions
//! - An unchanged fingerprint is never touched, so binding ids, stored
//!   messages and open consumers survive every pass
//! - Changed properties are applied in place; nothing is deleted and
//!   recreated to change a property
//! - Bindings are a closed enum matched exhaustively

pub mod binding;
pub mod entity;
pub mod filter;
pub mod provenance;
pub mod reconciler;
pub mod registry;
pub mod report;

pub use binding::{Binding, BindingId, PropertyDiff};
pub use entity::{
    AddressSpec, BridgeSpec, ComponentRoutingType, Declaration, DesiredTopology, DivertSpec,
    EntityKey, EntityKind, EntitySpec, Fingerprint, QueueSpec, RoutingType,
};
pub use filter::{Filter, FilterError};
pub use provenance::{Provenance, ProvenanceTracker};
pub use reconciler::TopologyReconciler;
pub use registry::{LiveRegistry, Message, PostOffice, RegistryError, RegistryReader};
pub use report::{EntityError, ReconciliationReport, ReportSummary};
