//! In-memory destination, used for tests and as the reference semantics for
//! real backends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::destination::base::{Destination, TableLoadRequest};
use crate::error::{ErrorKind, StrataResult};
use crate::schema::{TableDiff, TableSchema, WriteDisposition};
use crate::types::Row;

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, StoredTable>,
    // (load_id, table) pairs already applied, the idempotence ledger.
    applied_loads: HashSet<(String, String)>,
}

#[derive(Debug)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// A destination that keeps all loaded data in memory.
///
/// Implements the full [`Destination`] contract, including idempotent DDL,
/// per-(load id, table) load deduplication and the three write dispositions.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows currently stored for `table`.
    pub async fn table_rows(&self, table: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|stored| stored.rows.clone())
            .unwrap_or_default()
    }

    /// Returns the schema currently applied for `table`.
    pub async fn table_schema(&self, table: &str) -> Option<TableSchema> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|stored| stored.schema.clone())
    }

    /// Returns the number of rows stored for `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map_or(0, |stored| stored.rows.len())
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn apply_schema(&self, table: &TableSchema, diff: &TableDiff) -> StrataResult<()> {
        let mut inner = self.inner.lock().await;

        let stored = match inner.tables.entry(table.name.clone()) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(StoredTable {
                    schema: table.clone(),
                    rows: Vec::new(),
                });
                return Ok(());
            }
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
        };

        for column in diff
            .created
            .as_ref()
            .map(|created| created.columns.as_slice())
            .unwrap_or(&diff.added_columns)
        {
            // Re-applied diffs skip columns that already exist.
            if stored.schema.column(&column.name).is_none() {
                stored.schema.push_column(column.clone())?;
            }
        }

        for change in &diff.widened_columns {
            let Some(current) = stored.schema.column(&change.name) else {
                continue;
            };
            if current.data_type == change.to {
                continue;
            }
            if !current.data_type.widens_to(change.to) {
                bail!(
                    ErrorKind::DestinationFatal,
                    "Refusing to narrow a destination column",
                    format!(
                        "table '{}', column '{}': {} -> {}",
                        table.name, change.name, current.data_type, change.to
                    )
                );
            }
            stored.schema.set_column_type(&change.name, change.to);
        }

        Ok(())
    }

    async fn load_table(&self, request: TableLoadRequest) -> StrataResult<()> {
        let mut inner = self.inner.lock().await;

        let key = (request.load_id.clone(), request.table.name.clone());
        if inner.applied_loads.contains(&key) {
            debug!(
                load_id = %request.load_id,
                table = %request.table.name,
                "load already applied, skipping"
            );
            return Ok(());
        }

        let stored = inner
            .tables
            .entry(request.table.name.clone())
            .or_insert_with(|| StoredTable {
                schema: request.table.clone(),
                rows: Vec::new(),
            });

        match request.disposition {
            WriteDisposition::Append => stored.rows.extend(request.rows),
            WriteDisposition::Replace => stored.rows = request.rows,
            WriteDisposition::Merge => {
                for row in request.rows {
                    let position = stored.rows.iter().position(|existing| {
                        match request.merge_key.as_deref() {
                            Some(key) => {
                                existing.values.get(key).is_some()
                                    && existing.values.get(key) == row.values.get(key)
                            }
                            None => existing.id == row.id,
                        }
                    });
                    match position {
                        Some(position) => stored.rows[position] = row,
                        None => stored.rows.push(row),
                    }
                }
            }
        }

        inner.applied_loads.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, DataType};
    use crate::types::{RowId, Value};
    use std::collections::BTreeMap;

    fn table(name: &str, disposition: WriteDisposition) -> TableSchema {
        let mut table = TableSchema::new(name, None, disposition);
        table
            .push_column(ColumnSchema::new("id", DataType::Integer, true))
            .unwrap();
        table
    }

    fn row(table: &str, load_id: &str, id: i64) -> Row {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::Integer(id));
        Row {
            id: RowId::for_root(table, load_id, &Row::content_hash(&values)),
            parent_id: None,
            list_idx: None,
            load_id: Some(load_id.to_string()),
            values,
        }
    }

    fn request(
        schema: &TableSchema,
        load_id: &str,
        merge_key: Option<&str>,
        rows: Vec<Row>,
    ) -> TableLoadRequest {
        TableLoadRequest {
            load_id: load_id.to_string(),
            table: schema.clone(),
            disposition: schema.write_disposition,
            merge_key: merge_key.map(str::to_string),
            rows,
        }
    }

    #[tokio::test]
    async fn repeated_loads_of_the_same_package_apply_once() {
        let destination = MemoryDestination::new();
        let schema = table("events", WriteDisposition::Append);
        let rows = vec![row("events", "1.1", 1), row("events", "1.1", 2)];

        let load = request(&schema, "1.1", None, rows);
        destination.load_table(load.clone()).await.unwrap();
        destination.load_table(load).await.unwrap();

        assert_eq!(destination.row_count("events").await, 2);
    }

    #[tokio::test]
    async fn replace_swaps_the_table_contents() {
        let destination = MemoryDestination::new();
        let schema = table("events", WriteDisposition::Replace);

        destination
            .load_table(request(&schema, "1.1", None, vec![row("events", "1.1", 1)]))
            .await
            .unwrap();
        destination
            .load_table(request(
                &schema,
                "1.2",
                None,
                vec![row("events", "1.2", 2), row("events", "1.2", 3)],
            ))
            .await
            .unwrap();

        let rows = destination.table_rows("events").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values["id"], Value::Integer(2));
    }

    #[tokio::test]
    async fn merge_upserts_by_merge_key() {
        let destination = MemoryDestination::new();
        let schema = table("events", WriteDisposition::Merge);

        destination
            .load_table(request(
                &schema,
                "1.1",
                Some("id"),
                vec![row("events", "1.1", 1), row("events", "1.1", 2)],
            ))
            .await
            .unwrap();
        // Same key 2 replaces, key 3 inserts.
        destination
            .load_table(request(
                &schema,
                "1.2",
                Some("id"),
                vec![row("events", "1.2", 2), row("events", "1.2", 3)],
            ))
            .await
            .unwrap();

        let rows = destination.table_rows("events").await;
        assert_eq!(rows.len(), 3);
        let updated = rows
            .iter()
            .find(|row| row.values["id"] == Value::Integer(2))
            .unwrap();
        assert_eq!(updated.load_id.as_deref(), Some("1.2"));
    }

    #[tokio::test]
    async fn ddl_is_idempotent_and_never_narrows() {
        let destination = MemoryDestination::new();
        let schema = table("events", WriteDisposition::Append);

        let mut diff = TableDiff::default();
        diff.created = Some(schema.clone());
        destination.apply_schema(&schema, &diff).await.unwrap();
        destination.apply_schema(&schema, &diff).await.unwrap();

        let mut widen = TableDiff::default();
        widen.widened_columns.push(crate::schema::ColumnTypeChange {
            name: "id".to_string(),
            from: DataType::Integer,
            to: DataType::Float,
        });
        destination.apply_schema(&schema, &widen).await.unwrap();
        // Re-applying the same widening is a no-op.
        destination.apply_schema(&schema, &widen).await.unwrap();
        assert_eq!(
            destination
                .table_schema("events")
                .await
                .unwrap()
                .column("id")
                .unwrap()
                .data_type,
            DataType::Float
        );

        let mut narrow = TableDiff::default();
        narrow.widened_columns.push(crate::schema::ColumnTypeChange {
            name: "id".to_string(),
            from: DataType::Float,
            to: DataType::Integer,
        });
        let err = destination.apply_schema(&schema, &narrow).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
    }
}
