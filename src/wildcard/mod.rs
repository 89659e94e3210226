//! Wildcard address patterns.
//!
//! # Data Flow
//! ```text
//! pattern string (config file or management call)
//!     → pattern.rs (split on delimiter, classify segments)
//!     → AddressPattern (immutable once parsed)
//!
//! Lookup for a concrete address:
//!     registered patterns
//!     → AddressPattern::matches(address)
//!     → specificity.rs (total order, most specific first)
//! ```
//!
//! # Design Decisions
//! - `*` matches exactly one segment, `#` zero or more trailing segments
//! - `#` anywhere but the final segment is rejected, never reinterpreted
//! - Wildcards are whole segments: `orders*` is a literal
//! - Ordering is total so resolution is identical across restarts

pub mod pattern;
pub mod specificity;

pub use pattern::{AddressPattern, MatcherError, WildcardSyntax};
pub use specificity::Specificity;
