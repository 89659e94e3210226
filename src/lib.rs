//! Live reconfiguration core of a message broker.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file ──▶ config (parse + validate) ──▶ reload manager (periodic / watch / admin)
//!                                                   │
//!                       ┌───────────────────────────┼──────────────────────────┐
//!                       ▼                           ▼                          ▼
//!              settings repository        security repository        topology reconciler
//!              (address-settings)         (role sets)                 │  provenance tracker
//!                       ▲                           ▲                 ▼
//!                       └──── management ───────────┘            live registry (post office)
//!                               ▲                                      ▲
//!                            admin API ────────── broker-cli      client traffic
//! ```
//!
//! Policy lookups go through [`wildcard`] patterns ordered by specificity;
//! every matching fragment contributes the fields the more specific ones
//! left unset.

pub mod admin;
pub mod broker;
pub mod config;
pub mod lifecycle;
pub mod management;
pub mod observability;
pub mod reload;
pub mod settings;
pub mod topology;
pub mod wildcard;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use lifecycle::Shutdown;
pub use reload::{ReloadManager, TickOutcome};
