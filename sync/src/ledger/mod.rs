//! Request ledger.
//!
//! Tracks named in-flight async operations. Each key holds at most one
//! [`PendingRequestEntry`]; starting a new operation under a busy key cancels
//! the old one, and the old caller sees [`RequestOutcome::Cancelled`] instead
//! of a late result.

mod debounce;

pub use debounce::DebouncedSync;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::Result;
use debounce::DebounceSlot;

/// How a ledger-managed call ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome<T> {
    /// The operation ran to completion
    Completed(T),
    /// The operation was superseded or cancelled; its result was discarded
    Cancelled,
}

impl<T> RequestOutcome<T> {
    /// The completed value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            RequestOutcome::Completed(value) => Some(value),
            RequestOutcome::Cancelled => None,
        }
    }

    /// Check for cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestOutcome::Cancelled)
    }

    /// Map the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestOutcome<U> {
        match self {
            RequestOutcome::Completed(value) => RequestOutcome::Completed(f(value)),
            RequestOutcome::Cancelled => RequestOutcome::Cancelled,
        }
    }
}

/// Bookkeeping for one in-flight operation.
#[derive(Debug, Clone)]
pub struct PendingRequestEntry {
    /// Trips when the operation is superseded or cancelled
    pub token: CancellationToken,
    /// When the operation started
    pub started_at: DateTime<Utc>,
    generation: u64,
}

/// Manages named asynchronous operations.
///
/// Thread-safe and meant to be shared via `Arc`; debounced syncs require it.
#[derive(Debug, Default)]
pub struct RequestLedger {
    /// Active entries, keyed by operation name.
    entries: DashMap<String, PendingRequestEntry>,
    /// Armed trailing timers, keyed by sync name.
    debounces: Mutex<HashMap<String, DebounceSlot>>,
    generation: AtomicU64,
}

/// Removes a ledger entry when its operation settles or its future is dropped,
/// unless a newer operation has taken the key.
struct EntryGuard<'a> {
    ledger: &'a RequestLedger,
    key: &'a str,
    generation: u64,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.ledger
            .entries
            .remove_if(self.key, |_, entry| entry.generation == self.generation);
    }
}

impl RequestLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under `key`, superseding whatever is running there.
    ///
    /// The operation receives a token that trips if it is superseded or
    /// cancelled; the future is dropped at that point either way. Errors from
    /// the operation are returned as-is, cancellation is not an error.
    pub async fn create_request<T, F, Fut>(&self, key: &str, operation: F) -> Result<RequestOutcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let entry = PendingRequestEntry {
            token: token.clone(),
            started_at: Utc::now(),
            generation,
        };

        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            previous.token.cancel();
            tracing::debug!(key = %key, superseded = previous.generation, "Superseded pending request");
        }
        tracing::trace!(key = %key, generation, "Request registered");

        let _guard = EntryGuard {
            ledger: self,
            key,
            generation,
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = operation(token.clone()) => Some(result),
        };

        // A cancel that raced with completion still wins.
        if token.is_cancelled() {
            tracing::debug!(key = %key, generation, "Request cancelled; result discarded");
            return Ok(RequestOutcome::Cancelled);
        }

        match result {
            Some(Ok(value)) => Ok(RequestOutcome::Completed(value)),
            Some(Err(e)) => Err(e),
            None => Ok(RequestOutcome::Cancelled),
        }
    }

    /// Cancel the operation and any armed debounce timer under `key`.
    pub fn cancel_request(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            entry.token.cancel();
            tracing::debug!(key = %key, "Request cancelled");
        }
        self.disarm(key);
    }

    /// Cancel everything the ledger tracks.
    pub fn cancel_all_requests(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                entry.token.cancel();
            }
        }
        let disarmed = self.disarm_all();

        tracing::debug!(
            cancelled = keys.len(),
            disarmed,
            "Cancelled all pending requests"
        );
    }

    /// Whether any operation is in flight.
    pub fn has_pending_operations(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Number of operations in flight.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Keys with an operation in flight, sorted.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Whether an operation is in flight under `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// When the operation under `key` started.
    pub fn started_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.started_at)
    }
}
