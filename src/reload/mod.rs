//! Hot reload of topology and policy.
//!
//! # Data Flow
//! ```text
//! timer tick / watcher nudge / admin request
//!     → manager.rs tick()                      IDLE → CHECKING
//!     → ConfigSource::change_indicator()
//!         unchanged → retry deferred deletes if any, else IDLE
//!         changed   → RECONCILING
//!             → ConfigSource::load()           (parse failure: stop here)
//!             → TopologyReconciler::apply()
//!             → SettingsRepository / SecurityRepository rebuild
//!             → record indicator               → IDLE
//! ```
//!
//! # Design Decisions
//! - One pass at a time, enforced by a try-lock rather than a queue
//! - Readers of the repositories never wait for a pass

pub mod manager;
pub mod state;

pub use manager::{ReloadError, ReloadManager, ReloadStatus, TickHook, TickOutcome};
pub use state::ReloadState;
