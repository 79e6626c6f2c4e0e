//! Normalized rows and their deterministic identifiers.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::table::TableSchema;
use crate::strata_error;
use crate::types::value::Value;

/// Name of the synthetic column carrying the row identifier.
pub const ID_COLUMN: &str = "_strata_id";
/// Name of the synthetic column linking a child row to its parent row.
pub const PARENT_ID_COLUMN: &str = "_strata_parent_id";
/// Name of the synthetic column carrying the position in the originating list.
pub const LIST_IDX_COLUMN: &str = "_strata_list_idx";
/// Name of the synthetic column linking a root row to its load package.
pub const LOAD_ID_COLUMN: &str = "_strata_load_id";
/// Name of the single data column of child tables derived from scalar lists.
pub const VALUE_COLUMN: &str = "value";

/// Deterministic identifier of a normalized row.
///
/// A [`RowId`] is a 128-bit hex digest derived from the row's table, its
/// parent linkage and its content, so re-normalizing the same document batch
/// under the same load id yields byte-identical identifiers. This is what
/// makes replace and merge loads idempotent under retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(String);

impl RowId {
    /// Computes the identifier of a root table row.
    ///
    /// Root rows have no parent, so the load id takes the parent's place in
    /// the digest input.
    pub fn for_root(table: &str, load_id: &str, content_hash: &str) -> RowId {
        Self::digest(&[table, load_id, content_hash])
    }

    /// Computes the identifier of a child table row from its parent linkage.
    ///
    /// Lists are ordered, so (parent, table, index) pins the row uniquely and
    /// deterministically regardless of content.
    pub fn for_child(table: &str, parent: &RowId, list_idx: u64) -> RowId {
        Self::digest(&[parent.as_str(), table, &list_idx.to_string()])
    }

    /// Returns the identifier as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(parts: &[&str]) -> RowId {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        // 128 bits are plenty for uniqueness and keep identifiers compact.
        RowId(hex::encode(&digest[..16]))
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        RowId(value)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A flat mapping of column name to typed value plus synthetic linkage fields.
///
/// Rows are produced by the unpacker and flow unchanged through package row
/// files into destinations. Values are keyed by normalized column name; the
/// synthetic identifier fields are kept separate and materialized as columns
/// only at serialization time.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Deterministic row identifier.
    pub id: RowId,
    /// Identifier of the parent row, `None` for root table rows.
    pub parent_id: Option<RowId>,
    /// Position in the originating list for list-derived rows.
    pub list_idx: Option<u64>,
    /// Load id of the package this row was normalized into, set on root rows.
    pub load_id: Option<String>,
    /// Data columns in normalized-name order.
    pub values: BTreeMap<String, Value>,
}

impl Row {
    /// Computes the content hash over the flattened data values.
    ///
    /// The hash covers column names and serialized values in sorted column
    /// order, making it independent of document field ordering.
    pub fn content_hash(values: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in values {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_json().to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(&hasher.finalize()[..16])
    }

    /// Returns an estimate of bytes owned by this row for flush accounting.
    pub fn size_hint(&self) -> usize {
        let values: usize = self
            .values
            .iter()
            .map(|(name, value)| name.capacity() + value.size_hint())
            .sum();
        std::mem::size_of::<Row>() + values + 64
    }

    /// Serializes the row into the JSON object stored in row files.
    ///
    /// Synthetic fields become regular `_strata_*` columns so that the record
    /// is self-describing for destinations.
    pub fn to_record(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut record = serde_json::Map::new();
        record.insert(
            ID_COLUMN.to_string(),
            serde_json::Value::String(self.id.as_str().to_string()),
        );
        if let Some(parent_id) = &self.parent_id {
            record.insert(
                PARENT_ID_COLUMN.to_string(),
                serde_json::Value::String(parent_id.as_str().to_string()),
            );
        }
        if let Some(list_idx) = self.list_idx {
            record.insert(
                LIST_IDX_COLUMN.to_string(),
                serde_json::Value::Number(list_idx.into()),
            );
        }
        if let Some(load_id) = &self.load_id {
            record.insert(
                LOAD_ID_COLUMN.to_string(),
                serde_json::Value::String(load_id.clone()),
            );
        }
        for (name, value) in &self.values {
            record.insert(name.clone(), value.to_json());
        }
        record
    }

    /// Rereads a row file record, typing each column against `table`.
    ///
    /// Fails with a conversion error when a record column is missing from the
    /// table schema or does not parse as its column type.
    pub fn from_record(
        table: &TableSchema,
        record: serde_json::Map<String, serde_json::Value>,
    ) -> StrataResult<Row> {
        let mut id = None;
        let mut parent_id = None;
        let mut list_idx = None;
        let mut load_id = None;
        let mut values = BTreeMap::new();

        for (name, value) in record {
            match name.as_str() {
                ID_COLUMN => id = value.as_str().map(|s| RowId::from(s.to_string())),
                PARENT_ID_COLUMN => {
                    parent_id = value.as_str().map(|s| RowId::from(s.to_string()));
                }
                LIST_IDX_COLUMN => list_idx = value.as_u64(),
                LOAD_ID_COLUMN => load_id = value.as_str().map(|s| s.to_string()),
                _ => {
                    let column = table.column(&name).ok_or_else(|| {
                        strata_error!(
                            ErrorKind::ConversionError,
                            "Row file record contains a column missing from the table schema",
                            format!("table '{}', column '{}'", table.name, name)
                        )
                    })?;
                    values.insert(name, Value::from_json_typed(column.data_type, &value)?);
                }
            }
        }

        let id = id.ok_or_else(|| {
            strata_error!(
                ErrorKind::ConversionError,
                "Row file record is missing its row identifier",
                format!("table '{}'", table.name)
            )
        })?;

        Ok(Row {
            id,
            parent_id,
            list_idx,
            load_id,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::ColumnSchema;
    use crate::schema::lattice::DataType;
    use crate::schema::table::{TableSchema, WriteDisposition};

    fn events_table() -> TableSchema {
        let mut table = TableSchema::new("events", None, WriteDisposition::Append);
        table
            .push_column(ColumnSchema::new("id", DataType::Integer, true))
            .unwrap();
        table
            .push_column(ColumnSchema::new("name", DataType::Text, true))
            .unwrap();
        table
    }

    #[test]
    fn row_ids_are_deterministic() {
        let values: BTreeMap<_, _> = [("id".to_string(), Value::Integer(1))].into();
        let hash = Row::content_hash(&values);
        let a = RowId::for_root("events", "100.1", &hash);
        let b = RowId::for_root("events", "100.1", &hash);
        assert_eq!(a, b);

        let other = RowId::for_root("events", "100.2", &hash);
        assert_ne!(a, other);
    }

    #[test]
    fn child_ids_depend_on_position() {
        let values: BTreeMap<_, _> = [("id".to_string(), Value::Integer(1))].into();
        let parent = RowId::for_root("events", "100.1", &Row::content_hash(&values));
        let a = RowId::for_child("events__tags", &parent, 0);
        let b = RowId::for_child("events__tags", &parent, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn record_round_trip() {
        let values: BTreeMap<_, _> = [
            ("id".to_string(), Value::Integer(7)),
            ("name".to_string(), Value::Text("first".to_string())),
        ]
        .into();
        let row = Row {
            id: RowId::for_root("events", "100.1", &Row::content_hash(&values)),
            parent_id: None,
            list_idx: None,
            load_id: Some("100.1".to_string()),
            values,
        };

        let record = row.to_record();
        let back = Row::from_record(&events_table(), record).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn unknown_columns_are_rejected_on_reread() {
        let mut record = serde_json::Map::new();
        record.insert(
            ID_COLUMN.to_string(),
            serde_json::Value::String("aa".repeat(16)),
        );
        record.insert("ghost".to_string(), serde_json::Value::Bool(true));
        let err = Row::from_record(&events_table(), record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
