//! # Orderly Sync
//!
//! Optimistic mutations over an [`orderly_engine::RecordStore`], with the
//! request bookkeeping needed to keep a dashboard responsive while the order
//! service catches up.
//!
//! - [`RequestLedger`] runs named async operations: a newer call under the
//!   same key cancels the older one, and bursts of sync requests collapse into
//!   one trailing debounced execution.
//! - [`OptimisticEngine`] applies create/update/delete locally, calls the
//!   remote, then confirms or restores the pre-mutation snapshot.
//! - [`SyncCoordinator`] is what the UI talks to: it runs mutations through
//!   the engine, schedules a debounced reconciliation load after each one, and
//!   overwrites the local view when an externally loaded list drifts from it.
//!
//! ```no_run
//! use orderly_sync::{InMemoryService, RecordService, SyncConfig, SyncCoordinator};
//! use orderly_engine::Record;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> orderly_sync::Result<()> {
//! let service = Arc::new(InMemoryService::new());
//! let coordinator = SyncCoordinator::from_config(SyncConfig::default(), service.loader());
//! coordinator.load().await?;
//!
//! let draft = Record::default().with_field("status", json!("Unpaid"));
//! let payload = draft.to_value();
//! let settled = coordinator
//!     .fast_create(&draft, || service.create(payload))
//!     .await?;
//! println!("created {:?}", settled.record);
//!
//! coordinator.cancel_all();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod optimistic;
pub mod remote;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{CoordinatorStatus, SyncCoordinator};
pub use error::{Result, SyncError};
pub use ledger::{DebouncedSync, PendingRequestEntry, RequestLedger, RequestOutcome};
pub use optimistic::{EngineConfig, OptimisticEngine, Settled};
pub use remote::{Filters, InMemoryService, Loader, RecordService, RemoteResponse};

use orderly_engine::Timestamp;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Current wall-clock time in milliseconds since epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

// Critical sections never panic midway, so a poisoned lock still holds
// consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
