//! Pattern-keyed repository with atomic rebuilds.
//!
//! # Responsibilities
//! - Hold fragments per exact pattern string, in two layers: entries from the
//!   configuration file and entries registered through management
//! - Resolve a concrete address by overlaying every matching fragment, most
//!   specific first, then the global default
//! - Cache resolutions per address until the next change
//!
//! # Design Decisions
//! - Every change builds a new `Store` and publishes it with one atomic swap
//! - The resolution cache belongs to the store it was computed from, so
//!   invalidation is just "publish a store with an empty cache"
//! - Writers are serialized; readers never take a lock

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::settings::overlay::{overlay, Mergeable};
use crate::wildcard::{AddressPattern, MatcherError, WildcardSyntax};

/// Upper bound on cached resolutions held by one store.
const MAX_CACHED_ADDRESSES: usize = 10_000;

#[derive(Debug, Clone)]
struct Entry<T> {
    pattern: AddressPattern,
    fragment: T,
}

struct Store<T: Mergeable> {
    config: BTreeMap<String, Entry<T>>,
    management: BTreeMap<String, Entry<T>>,
    default: Option<T>,
    /// Effective entries, most specific first.
    ordered: Vec<Entry<T>>,
    cache: DashMap<String, Arc<T::Resolved>>,
}

impl<T: Mergeable> Store<T> {
    fn build(
        config: BTreeMap<String, Entry<T>>,
        management: BTreeMap<String, Entry<T>>,
        default: Option<T>,
    ) -> Self {
        let mut effective: BTreeMap<&str, &Entry<T>> =
            config.iter().map(|(k, v)| (k.as_str(), v)).collect();
        // A management entry for the same pattern is the more recent write.
        for (key, entry) in &management {
            effective.insert(key.as_str(), entry);
        }
        let mut ordered: Vec<Entry<T>> = effective.into_values().cloned().collect();
        ordered.sort_by_cached_key(|e| Reverse(e.pattern.specificity()));

        Self {
            config,
            management,
            default,
            ordered,
            cache: DashMap::new(),
        }
    }

    fn empty() -> Self {
        Self::build(BTreeMap::new(), BTreeMap::new(), None)
    }

    fn resolve(&self, address: &str) -> Arc<T::Resolved> {
        if let Some(hit) = self.cache.get(address) {
            return Arc::clone(hit.value());
        }

        let matching = self
            .ordered
            .iter()
            .filter(|e| e.pattern.matches(address))
            .map(|e| &e.fragment);
        let resolved = Arc::new(overlay(matching, self.default.as_ref()));

        if self.cache.len() < MAX_CACHED_ADDRESSES {
            self.cache.insert(address.to_string(), Arc::clone(&resolved));
        }
        resolved
    }
}

/// Result of replacing the configuration layer.
#[derive(Debug, Default)]
pub struct RebuildOutcome {
    /// Patterns now registered from the configuration.
    pub registered: usize,
    /// Entries dropped because their pattern was malformed.
    pub rejected: Vec<(String, MatcherError)>,
    /// Management entries replaced by a configuration entry for the same pattern.
    pub superseded: Vec<String>,
}

/// Store of pattern → fragment with cached, atomically rebuilt resolution.
pub struct HierarchicalRepository<T: Mergeable> {
    kind: &'static str,
    syntax: WildcardSyntax,
    store: ArcSwap<Store<T>>,
    writer: Mutex<()>,
}

impl<T: Mergeable> HierarchicalRepository<T> {
    /// Create an empty repository. `kind` names it in log output.
    pub fn new(kind: &'static str, syntax: WildcardSyntax) -> Self {
        Self {
            kind,
            syntax,
            store: ArcSwap::from_pointee(Store::empty()),
            writer: Mutex::new(()),
        }
    }

    pub fn syntax(&self) -> &WildcardSyntax {
        &self.syntax
    }

    /// Resolve the effective policy for a concrete address.
    pub fn resolve(&self, address: &str) -> Arc<T::Resolved> {
        self.store.load().resolve(address)
    }

    /// Register `fragment` for an exact pattern outside of a file pass.
    ///
    /// Replaces any previous management entry for the same pattern string.
    pub fn register(&self, pattern: &str, fragment: T) -> Result<(), MatcherError> {
        let parsed = AddressPattern::parse(pattern, &self.syntax)?;
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.store.load_full();
        let mut management = current.management.clone();
        management.insert(
            pattern.to_string(),
            Entry {
                pattern: parsed,
                fragment,
            },
        );
        self.store.store(Arc::new(Store::build(
            current.config.clone(),
            management,
            current.default.clone(),
        )));

        tracing::debug!(repository = self.kind, pattern = %pattern, "Registered management entry");
        Ok(())
    }

    /// Remove a management entry. Returns false if none was registered.
    pub fn unregister(&self, pattern: &str) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.store.load_full();
        if !current.management.contains_key(pattern) {
            return false;
        }
        let mut management = current.management.clone();
        management.remove(pattern);
        self.store.store(Arc::new(Store::build(
            current.config.clone(),
            management,
            current.default.clone(),
        )));
        true
    }

    /// Replace the configuration layer wholesale and clear the cache.
    ///
    /// Malformed patterns are rejected individually; the rest still apply.
    /// A management entry survives unless `entries` declares the same pattern.
    pub fn rebuild<I>(&self, entries: I, default: Option<T>) -> RebuildOutcome
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut outcome = RebuildOutcome::default();
        let mut config = BTreeMap::new();

        for (raw, fragment) in entries {
            match AddressPattern::parse(&raw, &self.syntax) {
                Ok(pattern) => {
                    config.insert(raw, Entry { pattern, fragment });
                }
                Err(e) => {
                    tracing::warn!(
                        repository = self.kind,
                        pattern = %raw,
                        error = %e,
                        "Rejected malformed pattern"
                    );
                    outcome.rejected.push((raw, e));
                }
            }
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.store.load_full();
        let mut management = current.management.clone();
        for key in config.keys() {
            if management.remove(key).is_some() {
                outcome.superseded.push(key.clone());
            }
        }
        outcome.registered = config.len();

        self.store
            .store(Arc::new(Store::build(config, management, default)));

        tracing::debug!(
            repository = self.kind,
            registered = outcome.registered,
            rejected = outcome.rejected.len(),
            superseded = outcome.superseded.len(),
            "Repository rebuilt"
        );
        outcome
    }

    /// Drop every cached resolution.
    pub fn invalidate_all(&self) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.store.load_full();
        self.store.store(Arc::new(Store::build(
            current.config.clone(),
            current.management.clone(),
            current.default.clone(),
        )));
    }

    /// The effective fragment registered for an exact pattern string.
    pub fn fragment(&self, pattern: &str) -> Option<T> {
        let store = self.store.load();
        store
            .management
            .get(pattern)
            .or_else(|| store.config.get(pattern))
            .map(|e| e.fragment.clone())
    }

    /// Effective patterns, most specific first.
    pub fn patterns(&self) -> Vec<String> {
        self.store
            .load()
            .ordered
            .iter()
            .map(|e| e.pattern.to_string())
            .collect()
    }

    /// Number of addresses with a cached resolution.
    pub fn cached_len(&self) -> usize {
        self.store.load().cache.len()
    }
}
