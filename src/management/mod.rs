//! Out-of-band policy changes.
//!
//! Registrations made here go to the management layer of each repository.
//! They use the same precedence rules as file entries, survive file reloads,
//! and are dropped only when a reloaded file declares the same pattern.
//!
//! Diverts created here are tagged client-created, so reloads never delete
//! them.

pub mod service;

pub use service::{ManagementError, ManagementService};
