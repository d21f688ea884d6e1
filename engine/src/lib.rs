//! # Orderly Engine
//!
//! The data layer behind Orderly's optimistic order cache.
//!
//! This crate holds the records the admin UI is looking at, resolves them by
//! whichever identifier their source happened to provide, and takes the
//! snapshots that failed mutations roll back to. The async machinery (remote
//! calls, cancellation, debouncing) lives in `orderly-sync`; everything here is
//! synchronous and free of IO.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, the clock or the disk.
//!   Timestamps are passed in by the caller.
//! - **Whole-collection rollback**: a [`Snapshot`] is a copy of the entire
//!   collection, never a diff.
//! - **One identifier policy**: every lookup goes through
//!   [`IdField::PRECEDENCE`].
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] may carry up to three identifiers:
//! - `id` - the primary id assigned by the order service
//! - `_id` - a natural id from document-style sources
//! - `orderId` - a legacy id from imported spreadsheets
//!
//! Records also carry an `unconfirmed` marker while an optimistic mutation on
//! them is outstanding, and a `temporary` marker until a create is confirmed.
//!
//! ### Operations
//!
//! An [`Operation`] describes one requested mutation and walks through
//! [`Phase`]s: `PendingOptimistic -> Confirmed | RolledBack`, and for confirmed
//! operations `Reconciling -> Synced`.
//!
//! ## Quick Start
//!
//! ```rust
//! use orderly_engine::{Record, RecordStore};
//! use serde_json::json;
//!
//! let record: Record = serde_json::from_value(json!({"id": 1, "status": "Unpaid"})).unwrap();
//! let mut store = RecordStore::from_records(vec![record]);
//!
//! let before = store.snapshot(1_000);
//!
//! let patch = json!({"status": "Paid"});
//! store.patch("1", patch.as_object().unwrap()).unwrap();
//! assert_eq!(store.get("1").unwrap().field("status"), Some(&json!("Paid")));
//!
//! // A failed remote call restores the whole collection.
//! store.restore(&before);
//! assert_eq!(store.get("1").unwrap().field("status"), Some(&json!("Unpaid")));
//! ```

pub mod error;
pub mod operation;
pub mod record;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use error::Error;
pub use operation::{MutationKind, Operation, Phase};
pub use record::{IdField, Record};
pub use snapshot::{Snapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use store::RecordStore;

/// Type aliases for clarity
pub type RecordId = String;
pub type OperationId = String;
pub type Timestamp = u64;
