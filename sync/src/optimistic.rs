//! Optimistic mutation engine.
//!
//! Each mutation follows the same shape:
//! 1. Snapshot the whole store
//! 2. Apply the change locally (marked unconfirmed) so readers see it at once
//! 3. Call the remote
//! 4. Swap in the canonical server record, or restore the snapshot on failure
//!
//! Every step is one assignment under the store lock; the lock is never held
//! across the remote call. With `enable_optimistic` off, steps 1-2 are skipped
//! and the store is only touched after the remote succeeds.
//!
//! Each mutation restores its *own* snapshot on failure. Two overlapping
//! mutations can therefore clobber each other: if B starts, then A starts and
//! is confirmed, then B fails, B's rollback erases A. That is the accepted
//! cost of whole-collection rollback; the next reconciliation load repairs it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use orderly_engine::{Operation, OperationId, Record, RecordStore, Snapshot};
use serde_json::{Map, Value};

use crate::config::DEFAULT_TEMP_ID_PREFIX;
use crate::ledger::{DebouncedSync, RequestLedger, RequestOutcome};
use crate::remote::{Filters, Loader, RemoteResponse};
use crate::{lock, now_millis, read, write, Result, SyncError};

/// Ledger key of collection loads.
pub const LOAD_KEY: &str = "load";
/// Ledger key of debounced engine syncs.
pub const SYNC_KEY: &str = "sync";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Apply mutations before the remote confirms them
    pub enable_optimistic: bool,
    /// Prefix for temporary record ids
    pub temp_id_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_optimistic: true,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
        }
    }
}

/// A confirmed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    /// The operation, in phase `Confirmed`
    pub operation: Operation,
    /// The created/updated record, or the removed one for deletes
    pub record: Option<Record>,
}

/// Removes an operation from the pending set however its future ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<OperationId, Operation>,
    op_id: OperationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.op_id);
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Applies mutations to a [`RecordStore`] ahead of the remote.
pub struct OptimisticEngine {
    config: EngineConfig,
    loader: Loader,
    ledger: Arc<RequestLedger>,
    store: RwLock<RecordStore>,
    /// Last authoritative collection
    baseline: RwLock<Snapshot>,
    /// Snapshot taken by the most recent mutation
    last_snapshot: Mutex<Option<Snapshot>>,
    pending: DashMap<OperationId, Operation>,
    loading: AtomicUsize,
    error: Mutex<Option<SyncError>>,
}

impl std::fmt::Debug for OptimisticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticEngine")
            .field("config", &self.config)
            .field("records", &read(&self.store).len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn new_op_id() -> OperationId {
    uuid::Uuid::new_v4().to_string()
}

impl OptimisticEngine {
    /// Create an engine with an empty store.
    pub fn new(config: EngineConfig, loader: Loader) -> Self {
        Self {
            config,
            loader,
            ledger: Arc::new(RequestLedger::new()),
            store: RwLock::new(RecordStore::new()),
            baseline: RwLock::new(Snapshot::empty(now_millis())),
            last_snapshot: Mutex::new(None),
            pending: DashMap::new(),
            loading: AtomicUsize::new(0),
            error: Mutex::new(None),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current records, copied out for readers.
    pub fn data(&self) -> Arc<[Record]> {
        Arc::from(read(&self.store).records())
    }

    /// Look up one record by identifier.
    pub fn get(&self, id: &str) -> Option<Record> {
        read(&self.store).get(id).cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        read(&self.store).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        read(&self.store).is_empty()
    }

    /// Whether `external` differs from the local view in size or identities.
    pub fn diverges_from(&self, external: &[Record]) -> bool {
        read(&self.store).diverges_from(external)
    }

    /// Last authoritative collection.
    pub fn baseline(&self) -> Snapshot {
        read(&self.baseline).clone()
    }

    /// Snapshot taken by the most recent optimistic mutation.
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        lock(&self.last_snapshot).clone()
    }

    /// Error of the last failed load, cleared by the next successful one.
    pub fn error(&self) -> Option<SyncError> {
        lock(&self.error).clone()
    }

    /// Forget the last load error.
    pub fn clear_error(&self) {
        lock(&self.error).take();
    }

    /// Whether a load is running.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Mutations whose remote call has not settled, oldest first.
    pub fn pending_operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.pending.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|op| op.started_at);
        ops
    }

    /// Whether any mutation is in flight.
    pub fn has_pending_mutations(&self) -> bool {
        !self.pending.is_empty()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Fetch the full collection and replace the store and baseline with it.
    ///
    /// A newer load supersedes this one; a superseded load changes nothing.
    /// On failure the store is left as it was and the error is recorded.
    pub async fn load(&self, filters: Filters) -> Result<RequestOutcome<usize>> {
        let _loading = LoadingGuard::new(&self.loading);
        let loader = Arc::clone(&self.loader);

        let outcome = self
            .ledger
            .create_request(LOAD_KEY, move |token| async move {
                loader(filters, token).await?.into_records()
            })
            .await;

        match outcome {
            Ok(RequestOutcome::Completed(records)) => {
                let count = records.len();
                self.install(records);
                self.clear_error();
                tracing::info!(records = count, "Collection loaded");
                Ok(RequestOutcome::Completed(count))
            }
            Ok(RequestOutcome::Cancelled) => {
                tracing::debug!("Load superseded");
                Ok(RequestOutcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Load failed; keeping current records");
                *lock(&self.error) = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Debounced [`load`](Self::load); bursts within `delay` collapse into one.
    pub fn sync(self: &Arc<Self>, filters: Filters, delay: Duration) -> DebouncedSync {
        let engine = Arc::clone(self);
        self.ledger.debounced_sync(
            SYNC_KEY,
            move |_token| async move { engine.load(filters).await.map(|_| ()) },
            delay,
        )
    }

    /// Overwrite the local view and baseline with `records`.
    pub fn replace_all(&self, records: Vec<Record>) {
        self.install(records);
    }

    /// Cancel the engine's in-flight loads and syncs.
    ///
    /// Mutations in flight are not rolled back.
    pub fn cancel_all(&self) {
        self.ledger.cancel_all_requests();
    }

    fn install(&self, records: Vec<Record>) {
        *write(&self.baseline) = Snapshot::new(records.clone(), now_millis());
        write(&self.store).replace_all(records);
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create `new_item`, showing it immediately under a temporary id.
    ///
    /// `new_item` itself is never modified. On success the temporary record is
    /// replaced by the one the remote returns.
    pub async fn create_optimistic<F, Fut>(&self, new_item: &Record, remote_create: F) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let started_at = now_millis();
        let operation = Operation::create(new_op_id(), new_item.to_value(), started_at);
        let _pending = self.track(&operation);

        if !self.config.enable_optimistic {
            let result = remote_create().await.and_then(RemoteResponse::into_record);
            return match result {
                Ok(canonical) => {
                    let record = canonical.unwrap_or_else(|| new_item.clone()).into_confirmed();
                    write(&self.store).push(record.clone());
                    self.confirm(operation, Some(record))
                }
                Err(e) => self.abandon(operation, None, e),
            };
        }

        let temp_id = format!("{}{}", self.config.temp_id_prefix, uuid::Uuid::new_v4());
        let optimistic = new_item.with_temporary_id(&temp_id);
        let snapshot = {
            let mut store = write(&self.store);
            let snapshot = store.snapshot(started_at);
            store.push(optimistic.clone());
            snapshot
        };
        self.retain(&snapshot);
        tracing::debug!(op_id = %operation.op_id, temp_id = %temp_id, "Applied optimistic create");

        let result = remote_create().await.and_then(RemoteResponse::into_record);
        match result {
            Ok(canonical) => {
                let record = match canonical {
                    Some(record) => record.into_confirmed(),
                    // Keep the temporary id until the next load brings the real one.
                    None => Record {
                        unconfirmed: false,
                        ..optimistic
                    },
                };
                {
                    let mut store = write(&self.store);
                    if !store.replace_record(&temp_id, record.clone()) {
                        let present = record.resolved_id().is_some_and(|id| store.contains(id));
                        if !present {
                            store.push(record.clone());
                        }
                    }
                }
                self.confirm(operation, Some(record))
            }
            Err(e) => self.abandon(operation, Some(&snapshot), e),
        }
    }

    /// Merge `partial` into the record `id` resolves to.
    ///
    /// Fails with [`SyncError::NotFound`] before touching anything if `id`
    /// does not resolve.
    pub async fn update_optimistic<F, Fut>(
        &self,
        id: &str,
        partial: &Map<String, Value>,
        remote_update: F,
    ) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let started_at = now_millis();
        let operation = Operation::update(new_op_id(), id, Value::Object(partial.clone()), started_at);

        if !self.config.enable_optimistic {
            if !read(&self.store).contains(id) {
                return Err(SyncError::NotFound(id.to_string()));
            }
            let _pending = self.track(&operation);
            let result = remote_update().await.and_then(RemoteResponse::into_record);
            return match result {
                Ok(canonical) => {
                    let record = {
                        let mut store = write(&self.store);
                        match canonical {
                            Some(record) => {
                                let record = record.into_confirmed();
                                store.replace_record(id, record.clone()).then_some(record)
                            }
                            None => {
                                let patched = store.patch(id, partial).is_ok();
                                if patched {
                                    confirm_in_store(&mut store, id)
                                } else {
                                    None
                                }
                            }
                        }
                    };
                    self.confirm(operation, record)
                }
                Err(e) => self.abandon(operation, None, e),
            };
        }

        let (snapshot, key) = {
            let mut store = write(&self.store);
            if !store.contains(id) {
                return Err(SyncError::NotFound(id.to_string()));
            }
            let snapshot = store.snapshot(started_at);
            let patched = store.patch(id, partial)?;
            // The patch may have changed identifiers; find the record by its new identity.
            let key = patched.resolved_id().map(str::to_string);
            (snapshot, key)
        };
        let _pending = self.track(&operation);
        self.retain(&snapshot);
        tracing::debug!(op_id = %operation.op_id, id = %id, "Applied optimistic update");

        let result = remote_update().await.and_then(RemoteResponse::into_record);
        match result {
            Ok(canonical) => {
                let record = key.and_then(|key| {
                    let mut store = write(&self.store);
                    match canonical {
                        Some(record) => {
                            let record = record.into_confirmed();
                            store.replace_record(&key, record.clone()).then_some(record)
                        }
                        None => confirm_in_store(&mut store, &key),
                    }
                });
                self.confirm(operation, record)
            }
            Err(e) => self.abandon(operation, Some(&snapshot), e),
        }
    }

    /// Remove the record `id` resolves to.
    ///
    /// Fails with [`SyncError::NotFound`] before touching anything if `id`
    /// does not resolve. On failure the record reappears exactly as it was.
    pub async fn delete_optimistic<F, Fut>(&self, id: &str, remote_delete: F) -> Result<Settled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteResponse>>,
    {
        let started_at = now_millis();
        let operation = Operation::delete(new_op_id(), id, started_at);

        if !self.config.enable_optimistic {
            if !read(&self.store).contains(id) {
                return Err(SyncError::NotFound(id.to_string()));
            }
            let _pending = self.track(&operation);
            let result = remote_delete().await.and_then(RemoteResponse::into_result);
            return match result {
                Ok(_) => {
                    let removed = write(&self.store).remove(id).ok();
                    self.confirm(operation, removed)
                }
                Err(e) => self.abandon(operation, None, e),
            };
        }

        let (snapshot, removed) = {
            let mut store = write(&self.store);
            if !store.contains(id) {
                return Err(SyncError::NotFound(id.to_string()));
            }
            let snapshot = store.snapshot(started_at);
            let removed = store.remove(id)?;
            (snapshot, removed)
        };
        let _pending = self.track(&operation);
        self.retain(&snapshot);
        tracing::debug!(op_id = %operation.op_id, id = %id, "Applied optimistic delete");

        let result = remote_delete().await.and_then(RemoteResponse::into_result);
        match result {
            Ok(_) => self.confirm(operation, Some(removed)),
            Err(e) => self.abandon(operation, Some(&snapshot), e),
        }
    }

    fn track(&self, operation: &Operation) -> PendingGuard<'_> {
        self.pending
            .insert(operation.op_id.clone(), operation.clone());
        PendingGuard {
            pending: &self.pending,
            op_id: operation.op_id.clone(),
        }
    }

    fn retain(&self, snapshot: &Snapshot) {
        *lock(&self.last_snapshot) = Some(snapshot.clone());
    }

    fn confirm(&self, mut operation: Operation, record: Option<Record>) -> Result<Settled> {
        operation.confirm()?;
        tracing::info!(
            op_id = %operation.op_id,
            kind = ?operation.kind,
            id = record.as_ref().and_then(|r| r.resolved_id()).unwrap_or("-"),
            "Mutation confirmed"
        );
        Ok(Settled { operation, record })
    }

    fn abandon(&self, mut operation: Operation, snapshot: Option<&Snapshot>, error: SyncError) -> Result<Settled> {
        if let Some(snapshot) = snapshot {
            write(&self.store).restore(snapshot);
        }
        operation.roll_back()?;
        tracing::warn!(
            op_id = %operation.op_id,
            kind = ?operation.kind,
            restored = snapshot.is_some(),
            error = %error,
            "Mutation rolled back"
        );
        Err(error)
    }
}

/// Clear the unconfirmed marker on the record `id` resolves to.
fn confirm_in_store(store: &mut RecordStore, id: &str) -> Option<Record> {
    let mut record = store.get(id)?.clone();
    record.unconfirmed = false;
    store.replace_record(id, record.clone());
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use orderly_engine::Phase;
    use tokio_util::sync::CancellationToken;
    use serde_json::json;

    fn order(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn static_loader(records: Vec<Record>) -> Loader {
        Arc::new(move |_filters: Filters, _token: CancellationToken| -> BoxFuture<'static, Result<RemoteResponse>> {
            let items: Vec<Value> = records.iter().map(Record::to_value).collect();
            async move { Ok(RemoteResponse::ok(Value::Array(items))) }.boxed()
        })
    }

    async fn loaded_engine(config: EngineConfig, records: Vec<Record>) -> OptimisticEngine {
        let engine = OptimisticEngine::new(config, static_loader(records));
        engine.load(Filters::new()).await.unwrap();
        engine
    }

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn load_replaces_store_and_baseline() {
        let engine = loaded_engine(
            EngineConfig::default(),
            vec![order(json!({"id": 1})), order(json!({"id": 2}))],
        )
        .await;

        assert_eq!(engine.len(), 2);
        assert_eq!(engine.baseline().record_count(), 2);
        assert!(!engine.is_loading());
        assert_eq!(engine.error(), None);
    }

    #[tokio::test]
    async fn failed_load_keeps_store_and_records_error() {
        let engine = loaded_engine(EngineConfig::default(), vec![order(json!({"id": 1}))]).await;
        let failing = OptimisticEngine {
            loader: Arc::new(
                |_filters: Filters, _token: CancellationToken| -> BoxFuture<'static, Result<RemoteResponse>> {
                    async { Ok(RemoteResponse::failure("HTTP 500")) }.boxed()
                },
            ),
            ..engine
        };

        let result = failing.load(Filters::new()).await;

        assert_eq!(result, Err(SyncError::remote("HTTP 500")));
        assert_eq!(failing.len(), 1);
        assert_eq!(failing.error(), Some(SyncError::remote("HTTP 500")));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_coalesces_into_one_load() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let loader: Loader = {
            let calls = Arc::clone(&calls);
            Arc::new(
                move |_filters: Filters, _token: CancellationToken| -> BoxFuture<'static, Result<RemoteResponse>> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(RemoteResponse::ok(json!([{"id": 1}]))) }.boxed()
                },
            )
        };
        let engine = Arc::new(OptimisticEngine::new(EngineConfig::default(), loader));

        let _ = engine.sync(Filters::new(), Duration::from_millis(300));
        let _ = engine.sync(Filters::new(), Duration::from_millis(300));
        let outcome = engine.sync(Filters::new(), Duration::from_millis(300)).await;

        assert_eq!(outcome, Ok(RequestOutcome::Completed(())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn clear_error_forgets_failed_load() {
        let engine = OptimisticEngine::new(
            EngineConfig::default(),
            Arc::new(
                |_filters: Filters, _token: CancellationToken| -> BoxFuture<'static, Result<RemoteResponse>> {
                    async { Ok(RemoteResponse::ok(json!("not a list"))) }.boxed()
                },
            ),
        );

        assert!(engine.load(Filters::new()).await.is_err());
        assert!(matches!(engine.error(), Some(SyncError::InvalidResponse(_))));

        engine.clear_error();
        assert_eq!(engine.error(), None);
    }

    #[tokio::test]
    async fn create_replaces_temporary_record() {
        let engine = loaded_engine(EngineConfig::default(), vec![]).await;
        let draft = order(json!({"status": "Unpaid"}));

        let settled = engine
            .create_optimistic(&draft, || async {
                Ok(RemoteResponse::ok(json!({"id": 10, "status": "Unpaid"})))
            })
            .await
            .unwrap();

        assert_eq!(settled.operation.phase, Phase::Confirmed);
        assert_eq!(engine.data().len(), 1);
        assert_eq!(engine.data()[0].resolved_id(), Some("10"));
        assert!(!engine.data()[0].unconfirmed);
        assert_eq!(draft, order(json!({"status": "Unpaid"})));
        assert!(!engine.has_pending_mutations());
    }

    #[tokio::test]
    async fn create_is_visible_while_in_flight() {
        let engine = loaded_engine(EngineConfig::default(), vec![]).await;
        let draft = order(json!({"status": "Unpaid"}));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let create = engine.create_optimistic(&draft, || async move {
            let _ = rx.await;
            Ok(RemoteResponse::ok(json!({"id": 1, "status": "Unpaid"})))
        });
        let observe = async {
            tokio::task::yield_now().await;
            let data = engine.data();
            assert_eq!(data.len(), 1);
            assert!(data[0].temporary);
            assert!(data[0].unconfirmed);
            assert!(data[0].resolved_id().unwrap().starts_with("temp-"));
            assert_eq!(engine.pending_operations().len(), 1);
            let _ = tx.send(());
        };

        let (result, ()) = tokio::join!(create, observe);
        result.unwrap();
        assert_eq!(engine.data()[0].resolved_id(), Some("1"));
    }

    #[tokio::test]
    async fn create_without_body_keeps_temporary_id() {
        let engine = loaded_engine(EngineConfig::default(), vec![]).await;

        let settled = engine
            .create_optimistic(&order(json!({"status": "Unpaid"})), || async {
                Ok(RemoteResponse::ok_empty())
            })
            .await
            .unwrap();

        let record = settled.record.unwrap();
        assert!(record.temporary);
        assert!(!record.unconfirmed);
        assert_eq!(engine.data()[0], record);
    }

    #[tokio::test]
    async fn update_not_found_touches_nothing() {
        let engine = loaded_engine(EngineConfig::default(), vec![order(json!({"id": 1}))]).await;
        let before = engine.data();

        let result = engine
            .update_optimistic("404", &patch(json!({"status": "Paid"})), || async {
                Ok(RemoteResponse::ok_empty())
            })
            .await;

        assert_eq!(result, Err(SyncError::NotFound("404".into())));
        assert_eq!(engine.data(), before);
        assert_eq!(engine.last_snapshot(), None);
    }

    #[tokio::test]
    async fn update_with_invalid_identifier_patch_is_rejected() {
        let engine = loaded_engine(EngineConfig::default(), vec![order(json!({"id": 1}))]).await;
        let before = engine.data();

        let result = engine
            .update_optimistic("1", &patch(json!({"id": [1]})), || async {
                Ok(RemoteResponse::ok_empty())
            })
            .await;

        assert!(matches!(result, Err(SyncError::Engine(_))));
        assert_eq!(engine.data(), before);
        assert!(!engine.has_pending_mutations());
    }

    #[tokio::test]
    async fn update_without_body_confirms_patch() {
        let engine =
            loaded_engine(EngineConfig::default(), vec![order(json!({"id": 1, "status": "Unpaid"}))]).await;

        engine
            .update_optimistic("1", &patch(json!({"status": "Paid"})), || async {
                Ok(RemoteResponse::ok_empty())
            })
            .await
            .unwrap();

        let record = engine.get("1").unwrap();
        assert_eq!(record.field("status"), Some(&json!("Paid")));
        assert!(!record.unconfirmed);
    }

    #[tokio::test]
    async fn delete_failure_resurrects_record() {
        let records = vec![
            order(json!({"id": 1})),
            order(json!({"_id": "b"})),
            order(json!({"orderId": "c"})),
        ];
        let engine = loaded_engine(EngineConfig::default(), records.clone()).await;

        let result = engine
            .delete_optimistic("b", || async { Err(SyncError::remote("timeout")) })
            .await;

        assert_eq!(result, Err(SyncError::remote("timeout")));
        assert_eq!(engine.data().to_vec(), records);
    }

    #[tokio::test]
    async fn delete_success_returns_removed_record() {
        let engine = loaded_engine(EngineConfig::default(), vec![order(json!({"orderId": "L-1"}))]).await;

        let settled = engine
            .delete_optimistic("L-1", || async { Ok(RemoteResponse::ok_empty()) })
            .await
            .unwrap();

        assert_eq!(settled.record.unwrap().resolved_id(), Some("L-1"));
        assert!(engine.is_empty());
        assert_eq!(engine.last_snapshot().unwrap().record_count(), 1);
    }

    #[tokio::test]
    async fn safe_mode_waits_for_remote() {
        let config = EngineConfig {
            enable_optimistic: false,
            ..EngineConfig::default()
        };
        let engine = loaded_engine(config, vec![order(json!({"id": 1, "status": "Unpaid"}))]).await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let paid = patch(json!({"status": "Paid"}));
        let update = engine.update_optimistic("1", &paid, || async move {
            let _ = rx.await;
            Ok(RemoteResponse::ok(json!({"id": 1, "status": "Paid"})))
        });
        let observe = async {
            tokio::task::yield_now().await;
            assert_eq!(engine.get("1").unwrap().field("status"), Some(&json!("Unpaid")));
            assert!(!engine.get("1").unwrap().unconfirmed);
            let _ = tx.send(());
        };

        let (result, ()) = tokio::join!(update, observe);
        result.unwrap();
        assert_eq!(engine.get("1").unwrap().field("status"), Some(&json!("Paid")));
        assert_eq!(engine.last_snapshot(), None);
    }

    #[tokio::test]
    async fn safe_mode_failure_touches_nothing() {
        let config = EngineConfig {
            enable_optimistic: false,
            ..EngineConfig::default()
        };
        let engine = loaded_engine(config, vec![order(json!({"id": 1}))]).await;
        let before = engine.data();

        let create = engine
            .create_optimistic(&order(json!({"status": "new"})), || async {
                Ok(RemoteResponse::failure("rejected"))
            })
            .await;
        let delete = engine
            .delete_optimistic("1", || async { Err(SyncError::remote("down")) })
            .await;

        assert!(create.unwrap_err().is_remote());
        assert!(delete.unwrap_err().is_remote());
        assert_eq!(engine.data(), before);
    }

    #[tokio::test]
    async fn safe_mode_create_appends_canonical_record() {
        let config = EngineConfig {
            enable_optimistic: false,
            ..EngineConfig::default()
        };
        let engine = loaded_engine(config, vec![]).await;

        engine
            .create_optimistic(&order(json!({"status": "new"})), || async {
                Ok(RemoteResponse::ok(json!({"id": 3, "status": "new"})))
            })
            .await
            .unwrap();

        assert_eq!(engine.data()[0].resolved_id(), Some("3"));
        assert!(!engine.data()[0].temporary);
    }

    #[tokio::test]
    async fn dropped_mutation_leaves_optimistic_state() {
        let engine = loaded_engine(EngineConfig::default(), vec![order(json!({"id": 1, "status": "Unpaid"}))]).await;

        {
            let paid = patch(json!({"status": "Paid"}));
            let update = engine.update_optimistic("1", &paid, || {
                futures::future::pending::<Result<RemoteResponse>>()
            });
            futures::pin_mut!(update);
            assert!(futures::poll!(update.as_mut()).is_pending());
            assert!(engine.has_pending_mutations());
        }

        // Dropping the future is cancellation, and cancellation never rolls back.
        assert!(!engine.has_pending_mutations());
        let record = engine.get("1").unwrap();
        assert_eq!(record.field("status"), Some(&json!("Paid")));
        assert!(record.unconfirmed);
    }
}
