use std::future::Future;

use crate::error::StrataResult;
use crate::schema::{TableDiff, TableSchema, WriteDisposition};
use crate::types::Row;

/// One table's worth of rows to apply to a destination.
#[derive(Debug, Clone)]
pub struct TableLoadRequest {
    /// Load id of the package the rows belong to.
    pub load_id: String,
    /// Schema of the destination table, after all pending DDL was applied.
    pub table: TableSchema,
    /// How the rows are applied.
    pub disposition: WriteDisposition,
    /// Column matching rows for merge loads, resolved from the table config.
    pub merge_key: Option<String>,
    /// Rows in package order.
    pub rows: Vec<Row>,
}

/// Trait for warehouse backends that can receive load packages.
///
/// A [`Destination`] is a capability contract with two operations: schema
/// application (DDL) and table loading (DML). Both must be safe to call more
/// than once with the same arguments, since the loader retries transient
/// failures and a resumed run may re-issue work that already succeeded.
/// Deterministic row identifiers and the load id let implementations
/// deduplicate re-deliveries.
///
/// The trait also provides an optional [`Destination::shutdown`] method with
/// a default no-op implementation. Override it if the backend holds
/// connections or buffers that need flushing when the pipeline shuts down.
pub trait Destination {
    /// Returns the name of the destination backend.
    fn name() -> &'static str;

    /// Propagates the shutdown signal to the destination.
    fn shutdown(&self) -> impl Future<Output = StrataResult<()>> + Send {
        async { Ok(()) }
    }

    /// Issues the DDL required by `diff` so that `table` exists with the
    /// expected columns and types.
    ///
    /// Must be idempotent: a retry may re-apply a diff that already took
    /// effect, and re-applying it must succeed without changing anything.
    /// Narrowing an existing column is a fatal error, never performed.
    fn apply_schema(
        &self,
        table: &TableSchema,
        diff: &TableDiff,
    ) -> impl Future<Output = StrataResult<()>> + Send;

    /// Stages and commits one table's rows according to the disposition.
    ///
    /// For a given `(load_id, table)` pair this must be atomic and
    /// idempotent: either all rows commit or none do, and a repeated call
    /// with the same arguments must not duplicate rows.
    fn load_table(
        &self,
        request: TableLoadRequest,
    ) -> impl Future<Output = StrataResult<()>> + Send;
}
