//! A destination wrapper that injects failures on demand.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::destination::{Destination, TableLoadRequest};
use crate::error::{ErrorKind, StrataResult};
use crate::schema::{TableDiff, TableSchema};
use crate::strata_error;

#[derive(Debug, Default)]
struct Inner {
    // Remaining failures to inject per table, consumed load by load.
    load_failures: HashMap<String, (ErrorKind, u32)>,
    load_calls: Vec<(String, String)>,
    apply_schema_calls: u64,
    shutdown_called: bool,
}

/// Wraps a destination and fails configured operations before delegating.
///
/// Failures are deterministic: `fail_loads` arms a per-table budget of
/// injected errors, each `load_table` call for that table consumes one until
/// the budget is empty and calls start reaching the inner destination. All
/// calls are recorded for later inspection.
#[derive(Debug, Clone)]
pub struct FlakyDestination<D> {
    inner: D,
    state: Arc<Mutex<Inner>>,
}

impl<D> FlakyDestination<D> {
    pub fn wrap(inner: D) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// The wrapped destination, for inspecting what actually loaded.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Arms `times` injected failures of `kind` for loads of `table`.
    pub async fn fail_loads(&self, table: &str, kind: ErrorKind, times: u32) {
        let mut state = self.state.lock().await;
        state.load_failures.insert(table.to_string(), (kind, times));
    }

    /// Returns every `(load_id, table)` load attempt seen so far, including
    /// the ones that were failed.
    pub async fn load_calls(&self) -> Vec<(String, String)> {
        self.state.lock().await.load_calls.clone()
    }

    /// Number of load attempts for one table.
    pub async fn load_calls_for(&self, table: &str) -> usize {
        self.state
            .lock()
            .await
            .load_calls
            .iter()
            .filter(|(_, t)| t == table)
            .count()
    }

    pub async fn apply_schema_calls(&self) -> u64 {
        self.state.lock().await.apply_schema_calls
    }

    pub async fn shutdown_called(&self) -> bool {
        self.state.lock().await.shutdown_called
    }
}

impl<D> Destination for FlakyDestination<D>
where
    D: Destination + Send + Sync,
{
    fn name() -> &'static str {
        "flaky"
    }

    async fn shutdown(&self) -> StrataResult<()> {
        self.state.lock().await.shutdown_called = true;
        self.inner.shutdown().await
    }

    async fn apply_schema(&self, table: &TableSchema, diff: &TableDiff) -> StrataResult<()> {
        self.state.lock().await.apply_schema_calls += 1;
        self.inner.apply_schema(table, diff).await
    }

    async fn load_table(&self, request: TableLoadRequest) -> StrataResult<()> {
        {
            let mut state = self.state.lock().await;
            state
                .load_calls
                .push((request.load_id.clone(), request.table.name.clone()));

            if let Some((kind, remaining)) = state.load_failures.get_mut(&request.table.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    let kind = *kind;
                    return Err(strata_error!(
                        kind,
                        "Injected destination failure",
                        format!("table '{}'", request.table.name)
                    ));
                }
            }
        }
        self.inner.load_table(request).await
    }
}
