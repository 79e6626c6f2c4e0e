//! Schema diffs: the set of table and column additions or type widenings
//! required before a package can load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::column::ColumnSchema;
use crate::schema::lattice::{DataType, widen};
use crate::schema::table::TableSchema;
use crate::strata_error;

/// A column whose type widened between two schema versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTypeChange {
    /// Column name.
    pub name: String,
    /// Type in the base schema version.
    pub from: DataType,
    /// Widened type.
    pub to: DataType,
}

/// Pending changes for a single table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDiff {
    /// Full schema when the table does not exist in the base version.
    /// Added columns are carried inside the schema in that case.
    pub created: Option<TableSchema>,
    /// Columns added to an existing table.
    pub added_columns: Vec<ColumnSchema>,
    /// Columns of an existing table whose type widened.
    pub widened_columns: Vec<ColumnTypeChange>,
}

impl TableDiff {
    /// Returns `true` when the diff carries no changes.
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.added_columns.is_empty() && self.widened_columns.is_empty()
    }

    /// Looks up the effective schema of a column within this diff, if the diff
    /// defines or changes it.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        if let Some(created) = &self.created {
            return created.column(name);
        }
        self.added_columns.iter().find(|column| column.name == name)
    }

    /// Looks up the widened type of a column, if this diff widens it.
    pub fn widened_type(&self, name: &str) -> Option<DataType> {
        self.widened_columns
            .iter()
            .find(|change| change.name == name)
            .map(|change| change.to)
    }
}

/// The set of schema changes accumulated while normalizing one or more
/// documents, applied to the schema store only at commit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Per-table changes, keyed by normalized table name.
    pub tables: BTreeMap<String, TableDiff>,
}

impl SchemaDiff {
    /// Returns `true` when no changes are pending.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|table| table.is_empty())
    }

    /// Returns the pending diff for a table, if any.
    pub fn table(&self, name: &str) -> Option<&TableDiff> {
        self.tables.get(name)
    }

    /// Returns the mutable pending diff for a table, creating an empty one.
    pub fn table_mut(&mut self, name: &str) -> &mut TableDiff {
        self.tables.entry(name.to_string()).or_default()
    }

    /// Merges another diff produced against the same base schema version.
    ///
    /// Normalization workers run independently and may discover the same new
    /// tables or columns with different types; merging widens where the
    /// lattice allows it and fails with a schema conflict otherwise.
    pub fn merge(&mut self, other: SchemaDiff) -> StrataResult<()> {
        for (table_name, other_table) in other.tables {
            let table = self.tables.entry(table_name.clone()).or_default();
            let table_was_empty = table.is_empty();

            match (table.created.as_mut(), other_table.created) {
                (Some(mine), Some(theirs)) => {
                    merge_created_tables(mine, theirs)?;
                }
                (None, Some(theirs)) if table_was_empty => {
                    table.created = Some(theirs);
                }
                (None, Some(theirs)) => {
                    // One worker saw the table as new while this diff already
                    // tracks changes against it, which cannot happen for diffs
                    // built against the same base version.
                    return Err(strata_error!(
                        ErrorKind::SchemaConflict,
                        "Diffs disagree on whether a table exists",
                        format!("table '{}'", theirs.name)
                    ));
                }
                (_, None) => {}
            }

            for column in other_table.added_columns {
                merge_added_column(&table_name, &mut table.added_columns, column)?;
            }

            for change in other_table.widened_columns {
                merge_widened_column(&table_name, &mut table.widened_columns, change)?;
            }
        }

        Ok(())
    }
}

/// Merges two freshly-created schemas for the same table, widening columns
/// discovered with different types.
fn merge_created_tables(mine: &mut TableSchema, theirs: TableSchema) -> StrataResult<()> {
    for column in theirs.columns {
        match mine.column(&column.name) {
            None => mine.push_column(column)?,
            Some(existing) if existing.data_type == column.data_type => {}
            Some(existing) => {
                let widened =
                    widen(existing.data_type, column.data_type).ok_or_else(|| {
                        strata_error!(
                            ErrorKind::SchemaConflict,
                            "Workers discovered incompatible types for a new column",
                            format!(
                                "table '{}', column '{}': {} vs {}",
                                mine.name, column.name, existing.data_type, column.data_type
                            )
                        )
                    })?;
                mine.set_column_type(&column.name, widened);
            }
        }
    }
    Ok(())
}

/// Merges an added column into the accumulated list, widening on type clash.
fn merge_added_column(
    table_name: &str,
    added: &mut Vec<ColumnSchema>,
    column: ColumnSchema,
) -> StrataResult<()> {
    match added.iter_mut().find(|c| c.name == column.name) {
        None => added.push(column),
        Some(existing) if existing.data_type == column.data_type => {}
        Some(existing) => {
            existing.data_type =
                widen(existing.data_type, column.data_type).ok_or_else(|| {
                    strata_error!(
                        ErrorKind::SchemaConflict,
                        "Workers discovered incompatible types for a new column",
                        format!(
                            "table '{table_name}', column '{}': {} vs {}",
                            column.name, existing.data_type, column.data_type
                        )
                    )
                })?;
        }
    }
    Ok(())
}

/// Merges a widening into the accumulated list, taking the wider target.
fn merge_widened_column(
    table_name: &str,
    widened: &mut Vec<ColumnTypeChange>,
    change: ColumnTypeChange,
) -> StrataResult<()> {
    match widened.iter_mut().find(|c| c.name == change.name) {
        None => widened.push(change),
        Some(existing) => {
            existing.to = widen(existing.to, change.to).ok_or_else(|| {
                strata_error!(
                    ErrorKind::SchemaConflict,
                    "Workers widened a column to incompatible types",
                    format!(
                        "table '{table_name}', column '{}': {} vs {}",
                        change.name, existing.to, change.to
                    )
                )
            })?;
        }
    }
    Ok(())
}
