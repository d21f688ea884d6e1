//! Snapshots of the whole record collection.
//!
//! A snapshot is the only unit of rollback: restoring one replaces the entire
//! collection, never a single record.

use crate::{error::Result, Error, Record, Timestamp};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// An immutable point-in-time copy of a [`RecordStore`](crate::RecordStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot format version
    format_version: u32,
    /// When the snapshot was taken (milliseconds since epoch)
    taken_at: Timestamp,
    /// Records in store order
    records: Vec<Record>,
}

impl Snapshot {
    /// Create a snapshot from records.
    pub fn new(records: Vec<Record>, taken_at: Timestamp) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at,
            records,
        }
    }

    /// An empty snapshot.
    pub fn empty(taken_at: Timestamp) -> Self {
        Self::new(Vec::new(), taken_at)
    }

    /// Records held by the snapshot.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Consume the snapshot, yielding its records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// When the snapshot was taken.
    pub fn taken_at(&self) -> Timestamp {
        self.taken_at
    }

    /// Count records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Summary of a snapshot (without the records).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// When the snapshot was taken
    pub taken_at: Timestamp,
    /// Total record count
    pub record_count: usize,
    /// Records with an outstanding optimistic mutation
    pub unconfirmed_count: usize,
    /// Records still carrying a temporary id
    pub temporary_count: usize,
}

impl From<&Snapshot> for SnapshotMetadata {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            taken_at: snapshot.taken_at,
            record_count: snapshot.records.len(),
            unconfirmed_count: snapshot.records.iter().filter(|r| r.unconfirmed).count(),
            temporary_count: snapshot.records.iter().filter(|r| r.temporary).count(),
        }
    }
}
