//! RecordStore - the in-memory record collection.
//!
//! The store keeps records in the order they were loaded or created. Every
//! lookup goes through the identifier-resolution policy: a primary-id match
//! anywhere in the collection wins over a natural-id match, which wins over a
//! legacy-id match.
//!
//! Lookups match any identifier a record carries, so `{id: 5, _id: "x"}` is
//! found by both `"5"` and `"x"`. Identity comparisons (`identity_set`,
//! `diverges_from`) use only the resolved identifier, `"5"` here.

use crate::{error::Result, Error, IdField, Record, RecordId, Snapshot, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// An ordered collection of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Create a store holding `records`.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// All records in store order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of the record `id` resolves to.
    pub fn position(&self, id: &str) -> Option<usize> {
        IdField::PRECEDENCE.into_iter().find_map(|field| {
            self.records
                .iter()
                .position(|record| record.has_identifier(field, id))
        })
    }

    /// Get a record by identifier.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.position(id).map(|idx| &self.records[idx])
    }

    /// Check if `id` resolves to a record.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Append a record.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Shallow-merge `patch` into the record `id` resolves to and mark it
    /// unconfirmed.
    pub fn patch(&mut self, id: &str, patch: &Map<String, Value>) -> Result<&Record> {
        let idx = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        let record = &mut self.records[idx];
        record.apply_patch(patch)?;
        record.mark_unconfirmed();
        Ok(record)
    }

    /// Replace the record `id` resolves to, keeping its position.
    ///
    /// Returns false if nothing matched.
    pub fn replace_record(&mut self, id: &str, record: Record) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.records[idx] = record;
                true
            }
            None => false,
        }
    }

    /// Remove the record `id` resolves to.
    pub fn remove(&mut self, id: &str) -> Result<Record> {
        let idx = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        Ok(self.records.remove(idx))
    }

    /// Replace the entire collection.
    pub fn replace_all(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    /// Copy the entire collection into a snapshot.
    pub fn snapshot(&self, taken_at: Timestamp) -> Snapshot {
        Snapshot::new(self.records.clone(), taken_at)
    }

    /// Restore the entire collection from a snapshot.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.records = snapshot.records().to_vec();
    }

    /// Resolved identifiers of all records that have one.
    pub fn identity_set(&self) -> BTreeSet<RecordId> {
        identity_set(&self.records)
    }

    /// Whether `other` differs from this store in size or identity membership.
    pub fn diverges_from(&self, other: &[Record]) -> bool {
        self.records.len() != other.len() || self.identity_set() != identity_set(other)
    }

    /// Count records still carrying a temporary id.
    pub fn temporary_count(&self) -> usize {
        self.records.iter().filter(|r| r.temporary).count()
    }

    /// Count records with an outstanding optimistic mutation.
    pub fn unconfirmed_count(&self) -> usize {
        self.records.iter().filter(|r| r.unconfirmed).count()
    }
}

/// Resolved identifiers of `records`.
pub fn identity_set(records: &[Record]) -> BTreeSet<RecordId> {
    records
        .iter()
        .filter_map(|r| r.resolved_id().map(str::to_string))
        .collect()
}
