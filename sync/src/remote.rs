//! The remote record service, as seen by the engine.
//!
//! The engine never knows about transport or URLs. Remote calls arrive as
//! caller-supplied closures that produce a [`RemoteResponse`], the
//! `{success, data?, error?}` envelope the order service speaks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use orderly_engine::{Record, RecordId, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{lock, Result, SyncError};

/// Equality filters passed through to list calls.
pub type Filters = Map<String, Value>;

/// Injected collection loader: `list(filters, token)`.
pub type Loader = Arc<
    dyn Fn(Filters, CancellationToken) -> BoxFuture<'static, Result<RemoteResponse>> + Send + Sync,
>;

/// Response envelope of the order service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteResponse {
    /// Successful response carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Successful response without a body.
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Turn a `success: false` envelope into a [`SyncError::Remote`].
    pub fn into_result(self) -> Result<Option<Value>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SyncError::Remote(
                self.error
                    .unwrap_or_else(|| "remote reported failure".to_string()),
            ))
        }
    }

    /// The canonical record of a create/update response, if one was returned.
    pub fn into_record(self) -> Result<Option<Record>> {
        match self.into_result()? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Record::from_value(value)
                .map(Some)
                .map_err(|e| SyncError::InvalidResponse(e.to_string())),
        }
    }

    /// The collection of a list response. A missing body is an empty list.
    pub fn into_records(self) -> Result<Vec<Record>> {
        match self.into_result()? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| {
                    Record::from_value(item).map_err(|e| SyncError::InvalidResponse(e.to_string()))
                })
                .collect(),
            Some(other) => Err(SyncError::InvalidResponse(format!(
                "expected an array of records, got {other}"
            ))),
        }
    }
}

/// The four calls of the order service.
pub trait RecordService: Send + Sync {
    fn list(
        &self,
        filters: Filters,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<RemoteResponse>>;

    fn create(&self, payload: Value) -> BoxFuture<'static, Result<RemoteResponse>>;

    fn update(&self, id: RecordId, payload: Value) -> BoxFuture<'static, Result<RemoteResponse>>;

    fn delete(&self, id: RecordId) -> BoxFuture<'static, Result<RemoteResponse>>;
}

/// Wrap a service's `list` call as an engine [`Loader`].
pub fn loader_for<S: RecordService + 'static>(service: Arc<S>) -> Loader {
    Arc::new(move |filters, token| service.list(filters, token))
}

/// How the next call to an [`InMemoryService`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    /// `Ok` envelope with `success: false`
    Response,
    /// `Err`, as a transport failure would produce
    Transport,
}

#[derive(Debug, Default)]
struct ServiceState {
    records: RecordStore,
    next_id: u64,
    failures: VecDeque<Injected>,
}

/// An in-process order service.
///
/// Assigns sequential numeric ids, supports equality filters on list calls,
/// and can be told to fail upcoming calls.
#[derive(Debug, Default)]
pub struct InMemoryService {
    state: Arc<Mutex<ServiceState>>,
    latency: Duration,
    list_calls: Arc<AtomicUsize>,
    mutation_calls: Arc<AtomicUsize>,
}

impl InMemoryService {
    /// An empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// A service pre-loaded with `records`.
    pub fn with_records(records: Vec<Record>) -> Self {
        let next_id = records
            .iter()
            .filter_map(|r| r.id.as_deref().and_then(|id| id.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);

        Self {
            state: Arc::new(Mutex::new(ServiceState {
                records: RecordStore::from_records(records),
                next_id,
                failures: VecDeque::new(),
            })),
            ..Self::default()
        }
    }

    /// Delay every call by `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call return `success: false`.
    pub fn fail_next(&self) {
        lock(&self.state).failures.push_back(Injected::Response);
    }

    /// Make the next call return `Err`.
    pub fn error_next(&self) {
        lock(&self.state).failures.push_back(Injected::Transport);
    }

    /// Server-side records.
    pub fn records(&self) -> Vec<Record> {
        lock(&self.state).records.records().to_vec()
    }

    /// Number of list calls started.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of create/update/delete calls started.
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// This service's `list` as an engine [`Loader`].
    pub fn loader(self: &Arc<Self>) -> Loader {
        loader_for(Arc::clone(self))
    }

    fn call<F>(&self, counter: &Arc<AtomicUsize>, apply: F) -> BoxFuture<'static, Result<RemoteResponse>>
    where
        F: FnOnce(&mut ServiceState) -> RemoteResponse + Send + 'static,
    {
        counter.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.state);
        let latency = self.latency;

        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let mut state = lock(&shared);
            match state.failures.pop_front() {
                Some(Injected::Response) => Ok(RemoteResponse::failure("injected failure")),
                Some(Injected::Transport) => Err(SyncError::remote("injected transport error")),
                None => Ok(apply(&mut state)),
            }
        }
        .boxed()
    }
}

fn matches_filters(record: &Record, filters: &Filters) -> bool {
    filters.iter().all(|(key, expected)| {
        let actual = match orderly_engine::IdField::from_key(key) {
            Some(field) => record.identifier(field).map(|id| Value::String(id.to_string())),
            None => record.field(key).cloned(),
        };
        actual.as_ref() == Some(expected)
    })
}

impl RecordService for InMemoryService {
    fn list(
        &self,
        filters: Filters,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<RemoteResponse>> {
        let call = self.call(&self.list_calls, move |state| {
            let items: Vec<Value> = state
                .records
                .records()
                .iter()
                .filter(|r| matches_filters(r, &filters))
                .map(Record::to_value)
                .collect();
            RemoteResponse::ok(Value::Array(items))
        });

        async move {
            tokio::select! {
                _ = token.cancelled() => Err(SyncError::remote("list aborted")),
                response = call => response,
            }
        }
        .boxed()
    }

    fn create(&self, payload: Value) -> BoxFuture<'static, Result<RemoteResponse>> {
        self.call(&self.mutation_calls, move |state| {
            let record = match Record::from_value(payload) {
                Ok(record) => record,
                Err(e) => return RemoteResponse::failure(e.to_string()),
            };
            state.next_id += 1;
            let record = record.into_confirmed().with_id(state.next_id.to_string());
            state.records.push(record.clone());
            RemoteResponse::ok(record.to_value())
        })
    }

    fn update(&self, id: RecordId, payload: Value) -> BoxFuture<'static, Result<RemoteResponse>> {
        self.call(&self.mutation_calls, move |state| {
            let Some(patch) = payload.as_object() else {
                return RemoteResponse::failure("update payload must be an object");
            };
            match state.records.patch(&id, patch) {
                Ok(record) => {
                    let record = record.clone().into_confirmed();
                    state.records.replace_record(&id, record.clone());
                    RemoteResponse::ok(record.to_value())
                }
                Err(e) => RemoteResponse::failure(e.to_string()),
            }
        })
    }

    fn delete(&self, id: RecordId) -> BoxFuture<'static, Result<RemoteResponse>> {
        self.call(&self.mutation_calls, move |state| {
            match state.records.remove(&id) {
                Ok(_) => RemoteResponse::ok_empty(),
                Err(e) => RemoteResponse::failure(e.to_string()),
            }
        })
    }
}
