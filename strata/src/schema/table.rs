//! Table schemas and write dispositions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::column::ColumnSchema;
use crate::strata_error;

/// Policy governing how a package's rows are applied to a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    /// Rows are always inserted.
    Append,
    /// The table's prior content is atomically swapped for the new content.
    Replace,
    /// Rows are upserted by merge key.
    Merge,
}

impl Default for WriteDisposition {
    fn default() -> Self {
        Self::Append
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteDisposition::Append => "append",
            WriteDisposition::Replace => "replace",
            WriteDisposition::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// Schema of one relational table within a dataset.
///
/// Columns hold only data fields; the synthetic `_strata_*` linkage columns
/// are implicit on every table and never appear here. Column order is the
/// order of first discovery and is preserved across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Normalized table name.
    pub name: String,
    /// Columns in discovery order.
    pub columns: Vec<ColumnSchema>,
    /// Parent table for tables derived from nested lists, `None` for roots.
    pub parent: Option<String>,
    /// How rows are applied to the destination.
    pub write_disposition: WriteDisposition,
    /// Column used to match rows for merge loads.
    pub merge_key: Option<String>,
}

impl TableSchema {
    /// Creates an empty table schema.
    pub fn new(
        name: impl Into<String>,
        parent: Option<String>,
        write_disposition: WriteDisposition,
    ) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            parent,
            write_disposition,
            merge_key: None,
        }
    }

    /// Returns `true` for tables not derived from a nested structure.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Appends a column, enforcing name uniqueness within the table.
    pub fn push_column(&mut self, column: ColumnSchema) -> StrataResult<()> {
        if self.column(&column.name).is_some() {
            return Err(strata_error!(
                ErrorKind::SchemaConflict,
                "Duplicate column name in table",
                format!("table '{}', column '{}'", self.name, column.name)
            ));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replaces the type of an existing column.
    ///
    /// Callers must have validated the change against the lattice; this only
    /// performs the mutation.
    pub(crate) fn set_column_type(&mut self, name: &str, data_type: crate::schema::DataType) {
        if let Some(column) = self.columns.iter_mut().find(|column| column.name == name) {
            column.data_type = data_type;
        }
    }
}
