//! Record types and the identifier-resolution policy.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One of the identifier fields a record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdField {
    /// `id`, assigned by the order service
    Primary,
    /// `_id`, from document-style sources
    Natural,
    /// `orderId`, from imported legacy data
    Legacy,
}

impl IdField {
    /// The order in which identifier fields are tried, everywhere.
    pub const PRECEDENCE: [IdField; 3] = [IdField::Primary, IdField::Natural, IdField::Legacy];

    /// JSON key of this field.
    pub fn key(self) -> &'static str {
        match self {
            IdField::Primary => "id",
            IdField::Natural => "_id",
            IdField::Legacy => "orderId",
        }
    }

    /// Map a JSON key back to an identifier field.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::PRECEDENCE.into_iter().find(|f| f.key() == key)
    }
}

/// A domain record (an order, in practice).
///
/// Identifier values are accepted as JSON strings or numbers and kept as
/// strings, so `{"id": 1}` and `{"id": "1"}` resolve the same way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary id
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_id"
    )]
    pub id: Option<RecordId>,
    /// Natural id
    #[serde(
        rename = "_id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_id"
    )]
    pub natural_id: Option<RecordId>,
    /// Legacy id
    #[serde(
        rename = "orderId",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_id"
    )]
    pub legacy_id: Option<RecordId>,
    /// Set while an optimistic mutation on this record is outstanding
    #[serde(rename = "_unconfirmed", default, skip_serializing_if = "is_false")]
    pub unconfirmed: bool,
    /// Set while `id` holds a client-generated temporary identifier
    #[serde(rename = "_temporary", default, skip_serializing_if = "is_false")]
    pub temporary: bool,
    /// Every other field
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<RecordId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Repr>::deserialize(deserializer)?.map(|repr| match repr {
        Repr::Text(text) => text,
        Repr::Number(number) => number.to_string(),
    }))
}

/// Convert a JSON scalar into an identifier. `null` clears the identifier.
fn id_from_value(key: &str, value: &Value) -> Result<Option<RecordId>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(Error::InvalidRecord(format!(
            "identifier '{key}' must be a string or number, got {other}"
        ))),
    }
}

impl Record {
    /// Create a record without identifiers.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Parse a record from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidRecord(format!(
                "expected a JSON object, got {value}"
            )));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Serialize back into the JSON shape the UI consumes.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Set the primary id.
    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the natural id.
    pub fn with_natural_id(mut self, id: impl Into<RecordId>) -> Self {
        self.natural_id = Some(id.into());
        self
    }

    /// Set the legacy id.
    pub fn with_legacy_id(mut self, id: impl Into<RecordId>) -> Self {
        self.legacy_id = Some(id.into());
        self
    }

    /// Set a plain field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Get a single identifier field.
    pub fn identifier(&self, field: IdField) -> Option<&str> {
        match field {
            IdField::Primary => self.id.as_deref(),
            IdField::Natural => self.natural_id.as_deref(),
            IdField::Legacy => self.legacy_id.as_deref(),
        }
    }

    /// The record's identity: its first present identifier in precedence order.
    pub fn resolved_id(&self) -> Option<&str> {
        IdField::PRECEDENCE
            .into_iter()
            .find_map(|field| self.identifier(field))
    }

    /// Check whether `field` holds exactly `id`.
    pub fn has_identifier(&self, field: IdField, id: &str) -> bool {
        self.identifier(field) == Some(id)
    }

    /// Get a plain field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Shallow-merge a partial update into this record.
    ///
    /// Identifier keys update the identifier fields; everything else lands in
    /// the plain fields. On error the record is left unchanged.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<()> {
        let mut ids = Vec::new();
        for (key, value) in patch {
            if let Some(field) = IdField::from_key(key) {
                ids.push((field, id_from_value(key, value)?));
            }
        }

        for (field, id) in ids {
            match field {
                IdField::Primary => self.id = id,
                IdField::Natural => self.natural_id = id,
                IdField::Legacy => self.legacy_id = id,
            }
        }
        for (key, value) in patch {
            if IdField::from_key(key).is_none() {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Produce a new record carrying a temporary primary id.
    ///
    /// The receiver is not modified; the copy is marked unconfirmed.
    pub fn with_temporary_id(&self, temp_id: impl Into<RecordId>) -> Self {
        let mut record = self.clone();
        record.id = Some(temp_id.into());
        record.temporary = true;
        record.unconfirmed = true;
        record
    }

    /// Mark this record as having an outstanding optimistic mutation.
    pub fn mark_unconfirmed(&mut self) {
        self.unconfirmed = true;
    }

    /// Clear the optimistic markers.
    pub fn into_confirmed(mut self) -> Self {
        self.unconfirmed = false;
        self.temporary = false;
        self
    }
}
