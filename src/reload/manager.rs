//! The reload scheduling loop.
//!
//! # Responsibilities
//! - Compare the source's change indicator against the last applied one
//! - Run one exclusive pass: parse, reconcile topology, rebuild the
//!   settings and security repositories
//! - Retry deferred deletes against the last applied snapshot
//!
//! # Design Decisions
//! - `tick` is synchronous so tests can drive passes without a timer
//! - Single flight: a tick that finds a pass running returns `Deferred`
//! - A snapshot that fails to parse changes nothing and is not recorded

use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};

use crate::config::{ChangeIndicator, ConfigError, ConfigSource};
use crate::observability::metrics;
use crate::reload::state::{AtomicReloadState, ReloadState};
use crate::settings::{SecurityRepository, SettingsRepository};
use crate::topology::{
    BindingId, DesiredTopology, EntityKey, EntitySpec, ReconciliationReport, RegistryError,
    ReportSummary, TopologyReconciler,
};

/// Hook run once after the next completed tick.
pub type TickHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
}

/// Result of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The source did not change and nothing was pending.
    Unchanged,
    /// A new snapshot was applied.
    Applied(ReconciliationReport),
    /// Deferred deletes were retried against the last applied snapshot.
    Retried(ReconciliationReport),
    /// Another pass was running.
    Deferred,
    /// The snapshot could not be read or parsed; nothing changed.
    Failed(ReloadError),
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Unchanged => "unchanged",
            TickOutcome::Applied(_) => "applied",
            TickOutcome::Retried(_) => "retried",
            TickOutcome::Deferred => "deferred",
            TickOutcome::Failed(_) => "failed",
        }
    }

    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            TickOutcome::Applied(report) | TickOutcome::Retried(report) => Some(report),
            _ => None,
        }
    }
}

/// Snapshot of the reload cycle for operators.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadStatus {
    pub state: ReloadState,
    pub source: String,
    pub passes: u64,
    pub last_outcome: Option<&'static str>,
    pub last_report: Option<ReportSummary>,
    pub last_error: Option<String>,
    pub pending_conflicts: usize,
}

#[derive(Default)]
struct PassState {
    last_applied: Option<ChangeIndicator>,
    last_failed: Option<ChangeIndicator>,
    last_topology: Option<DesiredTopology>,
    retry_pending: bool,
}

pub struct ReloadManager {
    source: Arc<dyn ConfigSource>,
    reconciler: TopologyReconciler,
    settings: Arc<SettingsRepository>,
    security: Arc<SecurityRepository>,
    period: Duration,
    state: AtomicReloadState,
    pass: Mutex<PassState>,
    tick_hook: Mutex<Option<TickHook>>,
    status: ArcSwap<ReloadStatus>,
}

impl ReloadManager {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        reconciler: TopologyReconciler,
        settings: Arc<SettingsRepository>,
        security: Arc<SecurityRepository>,
        period: Duration,
    ) -> Self {
        let status = ReloadStatus {
            state: ReloadState::Idle,
            source: source.describe(),
            passes: 0,
            last_outcome: None,
            last_report: None,
            last_error: None,
            pending_conflicts: 0,
        };
        Self {
            source,
            reconciler,
            settings,
            security,
            period,
            state: AtomicReloadState::default(),
            pass: Mutex::new(PassState::default()),
            tick_hook: Mutex::new(None),
            status: ArcSwap::from_pointee(status),
        }
    }

    pub fn state(&self) -> ReloadState {
        self.state.load()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn status(&self) -> ReloadStatus {
        let mut status = ReloadStatus::clone(&self.status.load());
        status.state = self.state();
        status
    }

    /// Run `hook` once, after the next tick that is not deferred completes.
    pub fn set_tick(&self, hook: impl FnOnce() + Send + 'static) {
        *self.tick_hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Create an entity outside configuration, after any running pass.
    pub fn create_unmanaged(&self, spec: EntitySpec) -> Result<BindingId, RegistryError> {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.reconciler.create_unmanaged(spec)
    }

    /// Remove an entity outside configuration, after any running pass.
    pub fn destroy_unmanaged(&self, key: &EntityKey) -> Result<bool, RegistryError> {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.reconciler.destroy_unmanaged(key)
    }

    /// Check the source and run a pass if needed.
    pub fn tick(&self) -> TickOutcome {
        let outcome = match self.pass.try_lock() {
            Ok(mut pass) => self.run_pass(&mut pass),
            Err(TryLockError::Poisoned(poisoned)) => self.run_pass(&mut poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Reload pass already running, tick deferred");
                return TickOutcome::Deferred;
            }
        };

        metrics::record_pass(outcome.label());
        if let Some(report) = outcome.report() {
            metrics::record_entities(report);
        }
        self.publish_status(&outcome);

        let hook = self
            .tick_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
        outcome
    }

    fn run_pass(&self, pass: &mut PassState) -> TickOutcome {
        self.state.store(ReloadState::Checking);
        let outcome = self.check_and_apply(pass);
        self.state.store(ReloadState::Idle);
        outcome
    }

    fn check_and_apply(&self, pass: &mut PassState) -> TickOutcome {
        let indicator = match self.source.change_indicator() {
            Ok(indicator) => indicator,
            Err(e) => {
                tracing::error!(source = %self.source.describe(), error = %e, "Failed to check configuration source");
                return TickOutcome::Failed(e.into());
            }
        };

        if pass.last_applied == Some(indicator) || pass.last_failed == Some(indicator) {
            return match (&pass.last_topology, pass.retry_pending) {
                (Some(topology), true) => {
                    self.state.store(ReloadState::Reconciling);
                    tracing::info!("Retrying deferred deletes");
                    let report = self.reconciler.apply(topology);
                    pass.retry_pending = report.has_conflicts();
                    TickOutcome::Retried(report)
                }
                _ => TickOutcome::Unchanged,
            };
        }

        self.state.store(ReloadState::Reconciling);
        let (indicator, config) = match self.source.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(
                    source = %self.source.describe(),
                    error = %e,
                    "Configuration rejected, keeping current configuration"
                );
                pass.last_failed = Some(indicator);
                return TickOutcome::Failed(e.into());
            }
        };

        if config.wildcard != *self.settings.syntax() {
            tracing::warn!("Wildcard syntax changes take effect after a restart");
        }

        let topology = config.desired_topology();
        let report = self.reconciler.apply(&topology);

        let settings = self.settings.rebuild(
            config.settings_entries(),
            config.default_settings(),
        );
        let security = self.security.rebuild(config.security_entries(), None);

        pass.last_applied = Some(indicator);
        pass.last_failed = None;
        pass.last_topology = Some(topology);
        pass.retry_pending = report.has_conflicts();

        tracing::info!(
            source = %self.source.describe(),
            address_settings = settings.registered,
            security_settings = security.registered,
            rejected_patterns = settings.rejected.len() + security.rejected.len(),
            pending_conflicts = report.conflicts().count(),
            "Configuration applied"
        );
        TickOutcome::Applied(report)
    }

    fn publish_status(&self, outcome: &TickOutcome) {
        let previous = self.status.load();
        let mut status = ReloadStatus::clone(&previous);
        status.passes += 1;
        status.last_outcome = Some(outcome.label());
        match outcome {
            TickOutcome::Applied(report) | TickOutcome::Retried(report) => {
                status.last_report = Some(report.summary());
                status.last_error = None;
                status.pending_conflicts = report.conflicts().count();
            }
            TickOutcome::Failed(e) => status.last_error = Some(e.to_string()),
            TickOutcome::Unchanged | TickOutcome::Deferred => {}
        }
        metrics::set_pending_conflicts(status.pending_conflicts);
        self.status.store(Arc::new(status));
    }

    /// Tick every period, and whenever `nudges` delivers, until shutdown.
    /// Passes run on the blocking pool.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        mut nudges: Option<mpsc::Receiver<()>>,
    ) {
        tracing::info!(
            period_ms = self.period.as_millis() as u64,
            source = %self.source.describe(),
            "Reload manager starting"
        );

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already ran a pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = next_nudge(&mut nudges) => {
                    tracing::debug!("Reload nudged by file watcher");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reload manager received shutdown signal, exiting loop");
                    break;
                }
            }

            let manager = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || manager.tick()).await {
                tracing::error!(error = %e, "Reload pass aborted");
            }
        }
    }
}

async fn next_nudge(nudges: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match nudges {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigSource;
    use crate::topology::{PostOffice, ProvenanceTracker};
    use crate::wildcard::WildcardSyntax;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(source: Arc<MemoryConfigSource>) -> ReloadManager {
        let po = Arc::new(PostOffice::new());
        ReloadManager::new(
            source,
            TopologyReconciler::new(po, Arc::new(ProvenanceTracker::new())),
            Arc::new(SettingsRepository::new("address-settings", WildcardSyntax::default())),
            Arc::new(SecurityRepository::new("security", WildcardSyntax::default())),
            Duration::from_millis(10),
        )
    }

    const V1: &str = r#"
        [[address_settings]]
        match = "a.#"
        dead_letter_address = "DLQ"

        [[addresses]]
        name = "a"
    "#;

    #[test]
    fn test_apply_then_unchanged() {
        let source = Arc::new(MemoryConfigSource::new(V1));
        let manager = manager(source);

        assert!(matches!(manager.tick(), TickOutcome::Applied(_)));
        assert_eq!(
            manager.settings.resolve("a.b").dead_letter_address.as_deref(),
            Some("DLQ")
        );
        assert!(matches!(manager.tick(), TickOutcome::Unchanged));
        assert_eq!(manager.state(), ReloadState::Idle);
        assert_eq!(manager.status().passes, 2);
    }

    #[test]
    fn test_parse_failure_keeps_last_known_good() {
        let source = Arc::new(MemoryConfigSource::new(V1));
        let manager = manager(source.clone());
        manager.tick();

        source.set("[[address_settings]\nmatch = ");
        assert!(matches!(manager.tick(), TickOutcome::Failed(_)));
        assert!(matches!(manager.tick(), TickOutcome::Unchanged));
        assert_eq!(
            manager.settings.resolve("a.b").dead_letter_address.as_deref(),
            Some("DLQ")
        );
        assert!(manager.status().last_error.is_some());

        source.set("");
        assert!(matches!(manager.tick(), TickOutcome::Applied(_)));
        assert_eq!(manager.settings.resolve("a.b").dead_letter_address, None);
    }

    #[test]
    fn test_tick_hook_runs_once() {
        let source = Arc::new(MemoryConfigSource::new(V1));
        let manager = manager(source);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        manager.set_tick(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.tick();
        manager.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_tick_is_deferred() {
        let source = Arc::new(MemoryConfigSource::new(V1));
        let manager = manager(source);
        let _running = manager.pass.lock().unwrap();
        assert!(matches!(manager.tick(), TickOutcome::Deferred));
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let source = Arc::new(MemoryConfigSource::new(V1));
        let manager = Arc::new(manager(source));
        let (tx, rx) = broadcast::channel(1);
        let (nudge_tx, nudge_rx) = mpsc::channel(1);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        manager.set_tick(move || {
            let _ = done_tx.send(());
        });
        let handle = tokio::spawn(Arc::clone(&manager).run(rx, Some(nudge_rx)));

        nudge_tx.send(()).await.unwrap();
        time::timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
        assert!(manager.status().passes >= 1);

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
