//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build broker → First reload pass
//!         → Spawn reload loop, watcher, admin server
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C → Trigger → Reload loop exits → Admin server drains → Exit
//! ```
//!
//! # Design Decisions
//! - The first pass runs before any listener starts, so the initial topology
//!   exists before clients or operators can observe it
//! - A pass in progress finishes before the loop exits

pub mod shutdown;

pub use shutdown::Shutdown;
