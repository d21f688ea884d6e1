//! Sync coordinator.
//!
//! The object the dashboard talks to. It forwards mutations to the
//! [`OptimisticEngine`], then always schedules a trailing reconciliation load
//! so the local view converges on the server's, whether the mutation was
//! confirmed or rolled back. Bursts of mutations share one reconciliation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use orderly_engine::{Operation, Phase, Record};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::SyncConfig;
use crate::ledger::{DebouncedSync, RequestLedger, RequestOutcome};
use crate::optimistic::{OptimisticEngine, Settled};
use crate::remote::{Filters, Loader, RemoteResponse};
use crate::{lock, read, write, Result, SyncError};

/// Ledger key of reconciliation loads.
pub const RECONCILE_KEY: &str = "reconcile";

/// What the coordinator is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    Idle,
    /// At least one mutation is waiting on the remote
    Mutating,
    /// A reconciliation load is armed or running
    Reconciling,
}

/// Counts a running reconciliation for as long as it is alive.
struct SyncingGuard<'a>(&'a AtomicUsize);

impl<'a> SyncingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs mutations and keeps the local view reconciled with the server.
pub struct SyncCoordinator {
    engine: Arc<OptimisticEngine>,
    ledger: Arc<RequestLedger>,
    reconcile_delay: Duration,
    sync_delay: Duration,
    /// Bumped by `cancel_all`; mutations started before a bump schedule nothing
    teardowns: AtomicU64,
    filters: RwLock<Filters>,
    syncing: AtomicUsize,
    /// Confirmed operations the next reconciliation will settle
    awaiting: Mutex<Vec<Operation>>,
    last_reconcile: Mutex<Option<DebouncedSync>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("engine", &self.engine)
            .field("reconcile_delay", &self.reconcile_delay)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Coordinate an existing engine.
    pub fn new(engine: Arc<OptimisticEngine>, config: &SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            engine,
            ledger: Arc::new(RequestLedger::new()),
            reconcile_delay: config.reconcile_delay,
            sync_delay: config.sync_delay,
            teardowns: AtomicU64::new(0),
            filters: RwLock::new(Filters::new()),
            syncing: AtomicUsize::new(0),
            awaiting: Mutex::new(Vec::new()),
            last_reconcile: Mutex::new(None),
        })
    }

    /// Build the engine and coordinator from `config`.
    pub fn from_config(config: SyncConfig, loader: Loader) -> Arc<Self> {
        let engine = Arc::new(OptimisticEngine::new(config.engine_config(), loader));
        Self::new(engine, &config)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<OptimisticEngine> {
        &self.engine
    }

    /// Current records.
    pub fn data(&self) -> Arc<[Record]> {
        self.engine.data()
    }

    /// Whether a collection load is running.
    pub fn is_loading(&self) -> bool {
        self.engine.is_loading()
    }

    /// Whether a reconciliation load is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst) > 0
    }

    pub fn status(&self) -> CoordinatorStatus {
        if self.engine.has_pending_mutations() {
            CoordinatorStatus::Mutating
        } else if self.ledger.is_debouncing(RECONCILE_KEY) || self.ledger.is_pending(RECONCILE_KEY) {
            CoordinatorStatus::Reconciling
        } else {
            CoordinatorStatus::Idle
        }
    }

    /// Replace the filters used by loads and reconciliations.
    pub fn set_filters(&self, filters: Filters) {
        *write(&self.filters) = filters;
    }

    pub fn filters(&self) -> Filters {
        read(&self.filters).clone()
    }

    /// Confirmed operations waiting for the next reconciliation.
    pub fn tracked_operations(&self) -> Vec<Operation> {
        lock(&self.awaiting).clone()
    }

    /// Load the collection with the current filters.
    pub async fn load(&self) -> Result<RequestOutcome<usize>> {
        self.engine.load(self.filters()).await
    }

    /// Create through the engine, then schedule reconciliation.
    pub async fn fast_create<F, Fut>(self: &Arc<Self>, item: &Record, remote_create: F) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let epoch = self.teardowns.load(Ordering::SeqCst);
        let result = self.engine.create_optimistic(item, remote_create).await;
        self.after_mutation(epoch, &result);
        result
    }

    /// Update through the engine, then schedule reconciliation.
    pub async fn fast_update<F, Fut>(
        self: &Arc<Self>,
        id: &str,
        partial: &Map<String, Value>,
        remote_update: F,
    ) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let epoch = self.teardowns.load(Ordering::SeqCst);
        let result = self.engine.update_optimistic(id, partial, remote_update).await;
        self.after_mutation(epoch, &result);
        result
    }

    /// Delete through the engine, then schedule reconciliation.
    pub async fn fast_delete<F, Fut>(self: &Arc<Self>, id: &str, remote_delete: F) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let epoch = self.teardowns.load(Ordering::SeqCst);
        let result = self.engine.delete_optimistic(id, remote_delete).await;
        self.after_mutation(epoch, &result);
        result
    }

    /// Overwrite the local view with `external` if the two have drifted.
    ///
    /// Drift means a different record count or a different set of resolved
    /// identifiers; field-level differences are left alone. Returns whether
    /// the local view was overwritten.
    pub fn observe_external(&self, external: &[Record]) -> bool {
        if !self.engine.diverges_from(external) {
            return false;
        }
        tracing::info!(
            local = self.engine.len(),
            external = external.len(),
            "Local view drifted from external list; overwriting"
        );
        self.engine.replace_all(external.to_vec());
        true
    }

    /// Debounced load with the current filters, using the configured sync
    /// window.
    pub fn sync(&self) -> DebouncedSync {
        self.engine.sync(self.filters(), self.sync_delay)
    }

    /// Wait for the most recently scheduled reconciliation.
    ///
    /// Resolves at once with `Completed` if none was ever scheduled.
    pub async fn wait_for_reconciliation(&self) -> Result<RequestOutcome<()>> {
        let handle = lock(&self.last_reconcile).clone();
        match handle {
            Some(handle) => handle.await,
            None => Ok(RequestOutcome::Completed(())),
        }
    }

    /// Reconcile immediately, superseding a reconciliation already running.
    pub async fn reconcile_now(&self) -> Result<RequestOutcome<()>> {
        self.ledger
            .create_request(RECONCILE_KEY, |_token| self.run_reconciliation())
            .await
    }

    /// Tear down: cancel reconciliations, armed timers and engine loads.
    ///
    /// Mutations already in flight run to completion but no longer schedule
    /// a reconciliation when they settle.
    pub fn cancel_all(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.ledger.cancel_all_requests();
        self.engine.cancel_all();
        tracing::debug!("Coordinator cancelled all pending work");
    }

    fn after_mutation(self: &Arc<Self>, epoch: u64, result: &Result<Settled>) {
        if self.teardowns.load(Ordering::SeqCst) != epoch {
            tracing::debug!("Mutation settled after teardown; not reconciling");
            return;
        }
        if let Ok(settled) = result {
            let mut operation = settled.operation.clone();
            if operation.advance(Phase::Reconciling).is_ok() {
                lock(&self.awaiting).push(operation);
            }
        }
        self.schedule_reconciliation();
    }

    fn schedule_reconciliation(self: &Arc<Self>) {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let handle = self.ledger.debounced_sync(
            RECONCILE_KEY,
            move |_token| async move {
                match coordinator.upgrade() {
                    Some(coordinator) => coordinator.run_reconciliation().await,
                    None => Ok(()),
                }
            },
            self.reconcile_delay,
        );
        *lock(&self.last_reconcile) = Some(handle);
    }

    async fn run_reconciliation(&self) -> Result<()> {
        let _syncing = SyncingGuard::new(&self.syncing);
        // Only operations confirmed before the load started are covered by it.
        let covered = lock(&self.awaiting).len();

        match self.engine.load(self.filters()).await {
            Ok(RequestOutcome::Completed(records)) => {
                let synced = self.settle_awaiting(covered);
                tracing::info!(records, synced, "Reconciliation complete");
                Ok(())
            }
            Ok(RequestOutcome::Cancelled) => {
                tracing::debug!("Reconciliation load superseded");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconciliation failed; keeping local view");
                Err(SyncError::Reconciliation(e.to_string()))
            }
        }
    }

    fn settle_awaiting(&self, covered: usize) -> usize {
        let mut awaiting = lock(&self.awaiting);
        let covered = covered.min(awaiting.len());
        for mut operation in awaiting.drain(..covered) {
            if operation.advance(Phase::Synced).is_ok() {
                tracing::trace!(op_id = %operation.op_id, "Operation synced");
            }
        }
        covered
    }
}
