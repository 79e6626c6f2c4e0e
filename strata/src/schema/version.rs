//! Immutable, numbered snapshots of all table schemas for a dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::diff::SchemaDiff;
use crate::schema::lattice::DataType;
use crate::schema::table::{TableSchema, WriteDisposition};
use crate::strata_error;

/// An immutable snapshot of all table schemas of a dataset at one version.
///
/// Version numbers are strictly increasing and never reused. A column set only
/// ever grows or widens between versions; columns are never dropped or
/// narrowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Version number, starting at 0 for the empty schema.
    pub version: u64,
    /// Table schemas keyed by normalized table name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaVersion {
    /// Returns the empty initial version of a dataset.
    pub fn empty() -> Self {
        Self {
            version: 0,
            tables: BTreeMap::new(),
        }
    }

    /// Looks up a table schema by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Returns the effective type of a column, if the column exists.
    pub fn column_type(&self, table: &str, column: &str) -> Option<DataType> {
        self.table(table)
            .and_then(|table| table.column(column))
            .map(|column| column.data_type)
    }

    /// Resolves the write disposition of a table by walking up to its root.
    ///
    /// Child tables inherit the disposition of the root table they descend
    /// from.
    pub fn write_disposition(&self, table: &str) -> Option<WriteDisposition> {
        let mut current = self.table(table)?;
        while let Some(parent) = &current.parent {
            current = self.table(parent)?;
        }
        Some(current.write_disposition)
    }

    /// Validates a diff against this version and produces the next version.
    ///
    /// This is the propose step of the two-phase schema evolution protocol: it
    /// never mutates stored state. Validation enforces the invariants that
    /// columns are never narrowed or dropped, column names stay unique, and
    /// parent tables exist (in this version or in the diff itself).
    ///
    /// A diff proposed against an older version remains applicable after a
    /// concurrent commit advanced the schema: changes the newer version
    /// already covers degrade to no-ops, so a losing committer can re-propose
    /// the same diff without re-normalizing its data. Only genuinely
    /// incompatible changes fail.
    pub fn apply(&self, diff: &SchemaDiff) -> StrataResult<SchemaVersion> {
        let mut tables = self.tables.clone();

        for (table_name, table_diff) in &diff.tables {
            if let Some(created) = &table_diff.created {
                match tables.get_mut(table_name) {
                    // A concurrent package already created the table; merge
                    // the columns instead.
                    Some(existing) => {
                        for column in &created.columns {
                            merge_column(existing, column)?;
                        }
                    }
                    None => {
                        tables.insert(table_name.clone(), created.clone());
                    }
                }
                continue;
            }

            let Some(table) = tables.get_mut(table_name) else {
                return Err(strata_error!(
                    ErrorKind::SchemaConflict,
                    "Diff changes a table that does not exist",
                    format!("table '{table_name}'")
                ));
            };

            for column in &table_diff.added_columns {
                merge_column(table, column)?;
            }

            for change in &table_diff.widened_columns {
                if !change.from.widens_to(change.to) {
                    return Err(strata_error!(
                        ErrorKind::SchemaConflict,
                        "Diff would narrow a column type",
                        format!(
                            "table '{table_name}', column '{}': {} -> {}",
                            change.name, change.from, change.to
                        )
                    ));
                }
                let Some(existing) = table.column(&change.name) else {
                    return Err(strata_error!(
                        ErrorKind::SchemaConflict,
                        "Diff widens a column that does not exist",
                        format!("table '{table_name}', column '{}'", change.name)
                    ));
                };
                if change.to.widens_to(existing.data_type) {
                    // Already at least as wide.
                    continue;
                }
                if !existing.data_type.widens_to(change.to) {
                    return Err(strata_error!(
                        ErrorKind::SchemaConflict,
                        "Column type cannot be widened as requested",
                        format!(
                            "table '{table_name}', column '{}': {} -> {}",
                            change.name, existing.data_type, change.to
                        )
                    ));
                }
                table.set_column_type(&change.name, change.to);
            }
        }

        // Parent references must resolve once all additions are in place.
        for table in tables.values() {
            if let Some(parent) = &table.parent {
                if !tables.contains_key(parent) {
                    return Err(strata_error!(
                        ErrorKind::SchemaConflict,
                        "Child table references a missing parent table",
                        format!("table '{}', parent '{parent}'", table.name)
                    ));
                }
            }
        }

        Ok(SchemaVersion {
            version: self.version + 1,
            tables,
        })
    }
}

/// Folds one column of a diff into an existing table, widening where needed.
fn merge_column(
    table: &mut TableSchema,
    column: &crate::schema::column::ColumnSchema,
) -> StrataResult<()> {
    let Some(existing) = table.column(&column.name) else {
        return table.push_column(column.clone());
    };
    if existing.data_type == column.data_type || column.data_type.widens_to(existing.data_type) {
        return Ok(());
    }
    if existing.data_type.widens_to(column.data_type) {
        table.set_column_type(&column.name, column.data_type);
        return Ok(());
    }
    Err(strata_error!(
        ErrorKind::SchemaConflict,
        "Diffs disagree incompatibly on a column type",
        format!(
            "table '{}', column '{}': {} vs {}",
            table.name, column.name, existing.data_type, column.data_type
        )
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::ColumnSchema;
    use crate::schema::diff::ColumnTypeChange;

    fn version_with_events() -> SchemaVersion {
        let mut table = TableSchema::new("events", None, WriteDisposition::Append);
        table
            .push_column(ColumnSchema::new("id", DataType::Integer, true))
            .unwrap();
        let mut version = SchemaVersion::empty();
        version.tables.insert("events".to_string(), table);
        version.version = 1;
        version
    }

    #[test]
    fn applying_a_diff_bumps_the_version() {
        let base = version_with_events();
        let mut diff = SchemaDiff::default();
        diff.table_mut("events")
            .added_columns
            .push(ColumnSchema::new("name", DataType::Text, true));

        let next = base.apply(&diff).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.column_type("events", "name"), Some(DataType::Text));
        // The base snapshot is untouched.
        assert_eq!(base.column_type("events", "name"), None);
    }

    #[test]
    fn narrowing_is_rejected() {
        let base = version_with_events();
        let mut diff = SchemaDiff::default();
        diff.table_mut("events")
            .widened_columns
            .push(ColumnTypeChange {
                name: "id".to_string(),
                from: DataType::Integer,
                to: DataType::Bool,
            });

        let err = base.apply(&diff).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaConflict);
    }

    #[test]
    fn stale_widenings_still_apply_after_a_racing_commit() {
        let base = version_with_events();
        let mut diff = SchemaDiff::default();
        diff.table_mut("events")
            .widened_columns
            .push(ColumnTypeChange {
                name: "id".to_string(),
                from: DataType::Float,
                to: DataType::Decimal,
            });

        // The diff believes the column is a float; the racing commit left it
        // an integer. The widening target still wins.
        let next = base.apply(&diff).unwrap();
        assert_eq!(next.column_type("events", "id"), Some(DataType::Decimal));
    }

    #[test]
    fn widenings_already_covered_degrade_to_no_ops() {
        let mut base = version_with_events();
        base.tables
            .get_mut("events")
            .unwrap()
            .set_column_type("id", DataType::Text);

        let mut diff = SchemaDiff::default();
        diff.table_mut("events")
            .widened_columns
            .push(ColumnTypeChange {
                name: "id".to_string(),
                from: DataType::Integer,
                to: DataType::Float,
            });

        let next = base.apply(&diff).unwrap();
        assert_eq!(next.column_type("events", "id"), Some(DataType::Text));
    }

    #[test]
    fn recreating_an_existing_table_merges_its_columns() {
        let base = version_with_events();

        let mut created = TableSchema::new("events", None, WriteDisposition::Append);
        created
            .push_column(ColumnSchema::new("id", DataType::Float, true))
            .unwrap();
        created
            .push_column(ColumnSchema::new("name", DataType::Text, true))
            .unwrap();
        let mut diff = SchemaDiff::default();
        diff.table_mut("events").created = Some(created);

        let next = base.apply(&diff).unwrap();
        assert_eq!(next.column_type("events", "id"), Some(DataType::Float));
        assert_eq!(next.column_type("events", "name"), Some(DataType::Text));
    }

    #[test]
    fn missing_parent_is_rejected() {
        let base = SchemaVersion::empty();
        let mut diff = SchemaDiff::default();
        diff.table_mut("events__tags").created = Some(TableSchema::new(
            "events__tags",
            Some("events".to_string()),
            WriteDisposition::Append,
        ));

        let err = base.apply(&diff).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaConflict);
    }

    #[test]
    fn disposition_is_inherited_from_the_root() {
        let mut version = version_with_events();
        version.tables.get_mut("events").unwrap().write_disposition = WriteDisposition::Replace;
        version.tables.insert(
            "events__tags".to_string(),
            TableSchema::new(
                "events__tags",
                Some("events".to_string()),
                WriteDisposition::Append,
            ),
        );

        assert_eq!(
            version.write_disposition("events__tags"),
            Some(WriteDisposition::Replace)
        );
    }
}
