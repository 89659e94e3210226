//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → source.rs (change indicator: mtime + content hash)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BrokerConfig (validated, immutable)
//!     → desired topology + settings/security entries for one reload pass
//!
//! On change:
//!     watcher.rs detects a file event
//!     → nudges the reload manager
//!     → manager compares change indicators and runs a pass if they differ
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A document that fails to load changes nothing

pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AdminConfig, BrokerConfig, DivertConfig, ObservabilityConfig, ReloadConfig};
pub use source::{ChangeIndicator, ConfigSource, FileConfigSource, MemoryConfigSource};
pub use validation::ValidationError;
