//! Trailing debounce for sync calls.
//!
//! Calls under one key within the quiet window share a single armed timer.
//! Each call pushes the deadline out and replaces the pending sync function;
//! when the window finally passes, the last function runs once through
//! [`RequestLedger::create_request`] and every caller of the burst receives
//! its outcome. The deadline always follows the latest call, so a shorter
//! delay wakes the timer early.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{RequestLedger, RequestOutcome};
use crate::{lock, Result};

type SyncFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// Shared handle on the outcome of a debounced burst.
///
/// Cloneable; awaiting it is optional and dropping it does not cancel the sync.
pub type DebouncedSync = Shared<BoxFuture<'static, Result<RequestOutcome<()>>>>;

/// An armed trailing timer.
pub(crate) struct DebounceSlot {
    deadline: Instant,
    sync_fn: Option<SyncFn>,
    outcome: DebouncedSync,
    timer: AbortHandle,
    /// Wakes the timer when the deadline moves earlier
    wake: Arc<Notify>,
    calls: usize,
}

impl std::fmt::Debug for DebounceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceSlot")
            .field("deadline", &self.deadline)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

enum TimerState {
    Wait(Instant, Arc<Notify>),
    Due { sync_fn: Option<SyncFn>, calls: usize },
    Gone,
}

impl RequestLedger {
    /// Request a sync under `key`, coalescing with other calls in the window.
    ///
    /// Registration happens immediately, so the returned handle may be
    /// dropped. Must be called from within a tokio runtime.
    pub fn debounced_sync<F, Fut>(self: &Arc<Self>, key: &str, sync_fn: F, delay: Duration) -> DebouncedSync
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let sync_fn: SyncFn = Box::new(move |token| sync_fn(token).boxed());
        let deadline = Instant::now() + delay;

        let mut slots = lock(&self.debounces);
        if let Some(slot) = slots.get_mut(key) {
            if deadline < slot.deadline {
                slot.wake.notify_one();
            }
            slot.deadline = deadline;
            slot.sync_fn = Some(sync_fn);
            slot.calls += 1;
            tracing::trace!(key = %key, calls = slot.calls, "Debounce window extended");
            return slot.outcome.clone();
        }

        let (tx, rx) = oneshot::channel();
        // A dropped sender means the timer was disarmed before firing.
        let outcome: DebouncedSync = async move { rx.await.unwrap_or(Ok(RequestOutcome::Cancelled)) }
            .boxed()
            .shared();

        let timer = tokio::spawn(Arc::clone(self).run_timer(key.to_string(), tx));
        slots.insert(
            key.to_string(),
            DebounceSlot {
                deadline,
                sync_fn: Some(sync_fn),
                outcome: outcome.clone(),
                timer: timer.abort_handle(),
                wake: Arc::new(Notify::new()),
                calls: 1,
            },
        );
        tracing::debug!(key = %key, delay_ms = delay.as_millis() as u64, "Debounce armed");

        outcome
    }

    /// Whether a debounce timer is armed under `key`.
    pub fn is_debouncing(&self, key: &str) -> bool {
        lock(&self.debounces).contains_key(key)
    }

    async fn run_timer(self: Arc<Self>, key: String, tx: oneshot::Sender<Result<RequestOutcome<()>>>) {
        let (sync_fn, calls) = loop {
            match self.poll_timer(&key) {
                TimerState::Wait(deadline, wake) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = wake.notified() => {}
                    }
                }
                TimerState::Due { sync_fn, calls } => break (sync_fn, calls),
                TimerState::Gone => return,
            }
        };
        let Some(sync_fn) = sync_fn else {
            return;
        };

        tracing::debug!(key = %key, coalesced = calls, "Running debounced sync");
        let result = self.create_request(&key, sync_fn).await;
        if let Err(e) = &result {
            tracing::debug!(key = %key, error = %e, "Debounced sync failed");
        }

        // Nobody awaiting is fine.
        let _ = tx.send(result);
    }

    fn poll_timer(&self, key: &str) -> TimerState {
        let mut slots = lock(&self.debounces);
        let due = match slots.get(key) {
            Some(slot) if slot.deadline > Instant::now() => {
                return TimerState::Wait(slot.deadline, Arc::clone(&slot.wake))
            }
            Some(_) => true,
            None => false,
        };
        match slots.remove(key) {
            Some(slot) if due => TimerState::Due {
                sync_fn: slot.sync_fn,
                calls: slot.calls,
            },
            _ => TimerState::Gone,
        }
    }

    /// Drop the armed timer under `key`; its waiters see `Cancelled`.
    pub(super) fn disarm(&self, key: &str) -> bool {
        match lock(&self.debounces).remove(key) {
            Some(slot) => {
                slot.timer.abort();
                tracing::debug!(key = %key, "Debounce disarmed");
                true
            }
            None => false,
        }
    }

    /// Drop every armed timer. Returns how many were armed.
    pub(super) fn disarm_all(&self) -> usize {
        let slots: Vec<DebounceSlot> = lock(&self.debounces).drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            slot.timer.abort();
        }
        slots.len()
    }
}
