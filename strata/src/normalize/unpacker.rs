//! Unpacks nested documents into flat rows across a root table and derived
//! child tables.
//!
//! Unpacking is a pure function of the document, the current schema snapshot
//! and the normalization config. It never mutates the schema store: new
//! tables, new columns and type widenings are collected into a [`SchemaDiff`]
//! that the caller commits through the store before the rows may load.
//!
//! The traversal uses an explicit work stack instead of recursion so that
//! adversarially deep documents cannot blow the call stack. Depth is still
//! bounded by `max_nesting`: structures nested deeper are carried as a single
//! serialized value instead of being unpacked further.

use std::collections::BTreeMap;

use strata_config::shared::{NormalizeConfig, VariantPolicy};

use crate::bail;
use crate::error::{ErrorKind, StrataResult};
use crate::normalize::naming::{make_path, normalize_column_name, normalize_table_name};
use crate::schema::{
    ColumnSchema, DataType, SchemaDiff, SchemaVersion, TableSchema, WriteDisposition, widen,
};
use crate::types::{Document, DocumentBatch, Row, RowId, VALUE_COLUMN};

/// Rows and schema changes produced by unpacking one or more documents.
#[derive(Debug, Default)]
pub struct UnpackedDocument {
    /// Rows grouped by destination table, in document order per table.
    pub rows: BTreeMap<String, Vec<Row>>,
    /// Schema changes required before these rows can load.
    pub diff: SchemaDiff,
}

impl UnpackedDocument {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    /// Absorbs the output of another unpack run, merging its schema diff.
    ///
    /// Fails with a schema conflict when the two runs disagree incompatibly
    /// about a column's type.
    pub fn merge(&mut self, other: UnpackedDocument) -> StrataResult<()> {
        for (table, mut rows) in other.rows {
            self.rows.entry(table).or_default().append(&mut rows);
        }
        self.diff.merge(other.diff)
    }
}

/// One unit of pending traversal work.
enum Task {
    /// A JSON object destined to become one row of `table`.
    Object {
        table: String,
        parent_table: Option<String>,
        parent_id: Option<RowId>,
        list_idx: Option<u64>,
        body: serde_json::Map<String, serde_json::Value>,
        level: usize,
    },
    /// A JSON list whose elements become rows of `table`.
    List {
        table: String,
        parent_table: String,
        parent_id: RowId,
        items: Vec<serde_json::Value>,
        level: usize,
    },
}

/// Flattens documents into rows according to a normalization config.
#[derive(Debug, Clone)]
pub struct Unpacker {
    config: NormalizeConfig,
}

impl Unpacker {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    /// Unpacks every document of a batch against the same schema snapshot.
    ///
    /// Documents are independent; their individual diffs are merged into one
    /// batch-level diff.
    pub fn unpack_batch(
        &self,
        schema: &SchemaVersion,
        batch: &DocumentBatch,
        load_id: &str,
    ) -> StrataResult<UnpackedDocument> {
        let mut unpacked = UnpackedDocument::default();
        for document in &batch.documents {
            let one = self.unpack(
                schema,
                document,
                load_id,
                batch.write_disposition,
                batch.merge_key.as_deref(),
            )?;
            unpacked.merge(one)?;
        }
        Ok(unpacked)
    }

    /// Unpacks a single document into rows plus the schema diff they require.
    ///
    /// `disposition` and `merge_key` are recorded on the root table only when
    /// this document is the first to create it.
    pub fn unpack(
        &self,
        schema: &SchemaVersion,
        document: &Document,
        load_id: &str,
        disposition: WriteDisposition,
        merge_key: Option<&str>,
    ) -> StrataResult<UnpackedDocument> {
        let root_table = normalize_table_name(document.root_table())?;
        let serde_json::Value::Object(body) = document.body() else {
            bail!(
                ErrorKind::InvalidData,
                "Documents must have an object body",
                format!("root table '{root_table}'")
            );
        };

        let mut ctx = UnpackContext {
            schema,
            config: &self.config,
            load_id,
            disposition,
            merge_key,
            out: UnpackedDocument::default(),
        };

        let mut stack = vec![Task::Object {
            table: root_table,
            parent_table: None,
            parent_id: None,
            list_idx: None,
            body: body.clone(),
            level: 0,
        }];

        while let Some(task) = stack.pop() {
            match task {
                Task::Object {
                    table,
                    parent_table,
                    parent_id,
                    list_idx,
                    body,
                    level,
                } => ctx.unpack_object(
                    &mut stack,
                    table,
                    parent_table,
                    parent_id,
                    list_idx,
                    body,
                    level,
                )?,
                Task::List {
                    table,
                    parent_table,
                    parent_id,
                    items,
                    level,
                } => ctx.unpack_list(&mut stack, table, parent_table, parent_id, items, level)?,
            }
        }

        Ok(ctx.out)
    }
}

/// State threaded through the traversal of one document.
struct UnpackContext<'a> {
    schema: &'a SchemaVersion,
    config: &'a NormalizeConfig,
    load_id: &'a str,
    disposition: WriteDisposition,
    merge_key: Option<&'a str>,
    out: UnpackedDocument,
}

impl UnpackContext<'_> {
    #[allow(clippy::too_many_arguments)]
    fn unpack_object(
        &mut self,
        stack: &mut Vec<Task>,
        table: String,
        parent_table: Option<String>,
        parent_id: Option<RowId>,
        list_idx: Option<u64>,
        body: serde_json::Map<String, serde_json::Value>,
        level: usize,
    ) -> StrataResult<()> {
        let (leaves, lists) = self.flatten(&table, body, level)?;

        let mut values = BTreeMap::new();
        for (column, json) in leaves {
            if let Some((column, value)) = self.resolve_leaf(&table, parent_table.as_deref(), &column, &json)? {
                values.insert(column, value);
            }
        }

        let row_id = match (&parent_id, list_idx) {
            (Some(parent), Some(idx)) => RowId::for_child(&table, parent, idx),
            _ => RowId::for_root(&table, self.load_id, &Row::content_hash(&values)),
        };
        let is_root = parent_id.is_none();

        self.ensure_table(&table, parent_table.as_deref());
        self.out.rows.entry(table.clone()).or_default().push(Row {
            id: row_id.clone(),
            parent_id,
            list_idx,
            load_id: is_root.then(|| self.load_id.to_string()),
            values,
        });

        // Push lists in reverse so the stack yields them in document order.
        for (path, items) in lists.into_iter().rev() {
            stack.push(Task::List {
                table: make_path(&[&table, &path]),
                parent_table: table.clone(),
                parent_id: row_id.clone(),
                items,
                level: level + 1,
            });
        }

        Ok(())
    }

    fn unpack_list(
        &mut self,
        stack: &mut Vec<Task>,
        table: String,
        parent_table: String,
        parent_id: RowId,
        items: Vec<serde_json::Value>,
        level: usize,
    ) -> StrataResult<()> {
        let mut deferred = Vec::new();
        for (idx, item) in items.into_iter().enumerate() {
            let idx = idx as u64;
            match item {
                serde_json::Value::Object(body) => deferred.push(Task::Object {
                    table: table.clone(),
                    parent_table: Some(parent_table.clone()),
                    parent_id: Some(parent_id.clone()),
                    list_idx: Some(idx),
                    body,
                    level,
                }),
                // Nested lists share one derived table; elements keep their
                // own position within the inner list.
                serde_json::Value::Array(inner) => deferred.push(Task::List {
                    table: make_path(&[&table, "list"]),
                    parent_table: parent_table.clone(),
                    parent_id: parent_id.clone(),
                    items: inner,
                    level: level + 1,
                }),
                scalar => {
                    let Some((column, value)) =
                        self.resolve_leaf(&table, Some(&parent_table), VALUE_COLUMN, &scalar)?
                    else {
                        continue;
                    };
                    let mut values = BTreeMap::new();
                    values.insert(column, value);
                    self.ensure_table(&table, Some(&parent_table));
                    self.out.rows.entry(table.clone()).or_default().push(Row {
                        id: RowId::for_child(&table, &parent_id, idx),
                        parent_id: Some(parent_id.clone()),
                        list_idx: Some(idx),
                        load_id: None,
                        values,
                    });
                }
            }
        }
        for task in deferred.into_iter().rev() {
            stack.push(task);
        }
        Ok(())
    }

    /// Flattens one object into leaf columns and extracted lists.
    ///
    /// Nested objects become `parent__child` columns unless the column is
    /// already typed complex or the nesting limit is reached, in which case
    /// the whole substructure stays a single complex leaf.
    fn flatten(
        &self,
        table: &str,
        body: serde_json::Map<String, serde_json::Value>,
        level: usize,
    ) -> StrataResult<(Vec<(String, serde_json::Value)>, Vec<(String, Vec<serde_json::Value>)>)>
    {
        let mut leaves = Vec::new();
        let mut lists = Vec::new();
        let mut pending = vec![(None::<String>, body, level)];

        while let Some((prefix, object, level)) = pending.pop() {
            for (key, value) in object {
                let normalized = normalize_column_name(&key)?;
                let column = match &prefix {
                    Some(prefix) => make_path(&[prefix, &normalized]),
                    None => normalized,
                };
                match value {
                    serde_json::Value::Object(nested) if !self.keep_complex(table, &column, level) => {
                        pending.push((Some(column), nested, level + 1));
                    }
                    serde_json::Value::Array(items) if !self.keep_complex(table, &column, level) => {
                        lists.push((column, items));
                    }
                    leaf => leaves.push((column, leaf)),
                }
            }
        }

        Ok((leaves, lists))
    }

    /// Whether a nested structure at `column` should stay a complex value.
    fn keep_complex(&self, table: &str, column: &str, level: usize) -> bool {
        level >= self.config.max_nesting
            || self.effective_column_type(table, column) == Some(DataType::Complex)
    }

    /// Types one leaf value against the effective schema, recording any new
    /// column or widening in the diff.
    ///
    /// Returns `None` for nulls, which never materialize a column. The
    /// returned column name differs from the input one only when the variant
    /// policy routed a clashing value into a variant column.
    fn resolve_leaf(
        &mut self,
        table: &str,
        parent_table: Option<&str>,
        column: &str,
        json: &serde_json::Value,
    ) -> StrataResult<Option<(String, crate::types::Value)>> {
        let value = crate::types::Value::infer_from_json(json);
        let Some(kind) = value.kind() else {
            if let Some(existing) = self.schema.table(table).and_then(|t| t.column(column)) {
                if !existing.nullable {
                    bail!(
                        ErrorKind::SchemaConflict,
                        "Null value for a non-nullable column",
                        format!("table '{table}', column '{column}'")
                    );
                }
            }
            return Ok(None);
        };

        let Some(existing) = self.effective_column_type(table, column) else {
            self.ensure_table(table, parent_table);
            self.record_column(table, ColumnSchema::new(column, kind, true));
            return Ok(Some((column.to_string(), value)));
        };

        if kind == existing {
            return Ok(Some((column.to_string(), value)));
        }

        match widen(kind, existing) {
            // The column already covers the value; coerce the value up.
            Some(target) if target == existing => {
                Ok(Some((column.to_string(), value.coerce_to(existing)?)))
            }
            // The value is wider; the column must widen with it.
            Some(target) => {
                self.record_widening(table, column, existing, target);
                Ok(Some((column.to_string(), value)))
            }
            None => match self.config.variant_policy {
                VariantPolicy::Split => {
                    let variant = format!("{column}_v_{kind}");
                    match self.effective_column_type(table, &variant) {
                        Some(existing_variant) if existing_variant != kind => bail!(
                            ErrorKind::SchemaConflict,
                            "Variant column exists with a different type",
                            format!(
                                "table '{table}', column '{variant}': {existing_variant} vs {kind}"
                            )
                        ),
                        Some(_) => {}
                        None => {
                            self.ensure_table(table, parent_table);
                            self.record_column(table, ColumnSchema::variant(&variant, kind));
                        }
                    }
                    Ok(Some((variant, value)))
                }
                VariantPolicy::Error => bail!(
                    ErrorKind::SchemaConflict,
                    "Value type cannot be widened into the column type",
                    format!("table '{table}', column '{column}': {kind} vs {existing}")
                ),
            },
        }
    }

    /// Looks up a column's type across the committed schema and the diff
    /// built so far, with pending widenings taking precedence.
    fn effective_column_type(&self, table: &str, column: &str) -> Option<DataType> {
        if let Some(table_diff) = self.out.diff.table(table) {
            if let Some(widened) = table_diff.widened_type(column) {
                return Some(widened);
            }
            if let Some(added) = table_diff.column(column) {
                return Some(added.data_type);
            }
        }
        self.schema.column_type(table, column)
    }

    /// Records a new table in the diff unless it is already known.
    fn ensure_table(&mut self, table: &str, parent_table: Option<&str>) {
        if self.schema.table(table).is_some() {
            return;
        }
        let table_diff = self.out.diff.table_mut(table);
        if table_diff.created.is_none() {
            let mut created = TableSchema::new(
                table,
                parent_table.map(str::to_string),
                self.disposition,
            );
            if parent_table.is_none() {
                created.merge_key = self.merge_key.map(str::to_string);
            }
            table_diff.created = Some(created);
        }
    }

    /// Records a new column on either the created table or as an addition to
    /// an existing one. The caller has already checked the column is absent.
    fn record_column(&mut self, table: &str, column: ColumnSchema) {
        let table_diff = self.out.diff.table_mut(table);
        match &mut table_diff.created {
            Some(created) => {
                // Absence was checked through the effective view.
                let _ = created.push_column(column);
            }
            None => table_diff.added_columns.push(column),
        }
    }

    /// Records a type widening, updating in place when the column itself is
    /// still pending in the diff.
    fn record_widening(&mut self, table: &str, column: &str, from: DataType, to: DataType) {
        let table_diff = self.out.diff.table_mut(table);
        if let Some(created) = &mut table_diff.created {
            if created.column(column).is_some() {
                created.set_column_type(column, to);
                return;
            }
        }
        if let Some(added) = table_diff
            .added_columns
            .iter_mut()
            .find(|c| c.name == column)
        {
            added.data_type = to;
            return;
        }
        if let Some(change) = table_diff
            .widened_columns
            .iter_mut()
            .find(|c| c.name == column)
        {
            if change.to.widens_to(to) {
                change.to = to;
            }
            return;
        }
        table_diff.widened_columns.push(crate::schema::ColumnTypeChange {
            name: column.to_string(),
            from,
            to,
        });
    }
}
