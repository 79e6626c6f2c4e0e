//! Applies sealed load packages to a destination, table by table.
//!
//! The loader owns the resumable half of the pipeline: it makes sure the
//! package's schema diff is committed, schedules tables parents-first with a
//! bounded worker count, drives each table through the
//! `New → Staged → Committed` state machine and archives the package once
//! every table committed. All destination calls go through the retry wrapper
//! and are deduplicated by the state tracker on resume.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use strata_config::shared::PipelineConfig;

use crate::bail;
use crate::concurrency::{ShutdownRx, is_shutdown};
use crate::destination::{Destination, TableLoadRequest};
use crate::error::{ErrorKind, StrataError, StrataResult};
use crate::hooks::PostLoadHook;
use crate::load::retry::run_with_retry;
use crate::package::{PackageManifest, PackageStorage, TableManifest};
use crate::schema::{SchemaStore, SchemaVersion, TableDiff, WriteDisposition};
use crate::state::{StateStore, TableLoadState};
use crate::strata_error;

/// Outcome of loading one package.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Tables committed by this run.
    pub committed: Vec<String>,
    /// Tables found already committed by an earlier run and skipped.
    pub skipped: Vec<String>,
    /// Whether shutdown stopped scheduling before all tables ran.
    pub interrupted: bool,
    /// Whether the package was fully committed and archived.
    pub archived: bool,
}

/// Loads sealed packages into a destination.
pub struct Loader<S, T, D> {
    schema_store: Arc<S>,
    state_store: Arc<T>,
    destination: Arc<D>,
    storage: PackageStorage,
    config: Arc<PipelineConfig>,
    hook: Option<Arc<dyn PostLoadHook>>,
}

impl<S, T, D> Loader<S, T, D>
where
    S: SchemaStore + Send + Sync + 'static,
    T: StateStore + Send + Sync + 'static,
    D: Destination + Send + Sync + 'static,
{
    pub fn new(
        schema_store: Arc<S>,
        state_store: Arc<T>,
        destination: Arc<D>,
        storage: PackageStorage,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            schema_store,
            state_store,
            destination,
            storage,
            config,
            hook: None,
        }
    }

    /// Registers a hook invoked after a package is fully committed.
    pub fn with_hook(mut self, hook: Arc<dyn PostLoadHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Loads one sealed package, resuming from recorded table states.
    ///
    /// Returns a [`LoadReport`] when every scheduled table committed. Fails
    /// with a partial load error when some tables committed and others
    /// failed; the package stays pending and can be re-run for the failed
    /// tables only.
    pub async fn load_package(
        &self,
        manifest: &PackageManifest,
        mut shutdown: ShutdownRx,
    ) -> StrataResult<LoadReport> {
        if self.storage.is_archived(&manifest.load_id) {
            debug!(load_id = %manifest.load_id, "package already archived, nothing to do");
            return Ok(LoadReport {
                archived: true,
                ..LoadReport::default()
            });
        }

        let schema = self.ensure_schema(manifest).await?;
        let diff = self.storage.read_schema_update(&manifest.load_id)?;

        let mut report = LoadReport::default();
        let mut failures: Vec<StrataError> = Vec::new();
        let semaphore = Arc::new(Semaphore::new(
            self.config.max_table_load_workers.max(1) as usize,
        ));

        // Parents must be committed before their children, so tables are
        // scheduled in waves by nesting depth. Within a wave the semaphore
        // bounds destination concurrency.
        for wave in tables_by_depth(manifest, &schema) {
            if is_shutdown(&mut shutdown) {
                report.interrupted = true;
                break;
            }
            if !failures.is_empty() {
                // A failed parent would orphan its children; stop scheduling.
                break;
            }

            let mut join_set: JoinSet<(String, StrataResult<bool>)> = JoinSet::new();
            for table_name in wave {
                let table_manifest = manifest.tables[&table_name].clone();
                let worker = TableWorker {
                    state_store: self.state_store.clone(),
                    destination: self.destination.clone(),
                    storage: self.storage.clone(),
                    config: self.config.clone(),
                    schema: schema.clone(),
                    table_diff: diff.table(&table_name).cloned().unwrap_or_default(),
                    load_id: manifest.load_id.clone(),
                    table_name: table_name.clone(),
                    table_manifest,
                };
                let semaphore = semaphore.clone();
                let shutdown = shutdown.clone();
                join_set.spawn(async move {
                    // Closed only when the whole runtime shuts down.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return (
                            worker.table_name.clone(),
                            Err(strata_error!(
                                ErrorKind::InvalidState,
                                "Load worker semaphore closed"
                            )),
                        );
                    };
                    let name = worker.table_name.clone();
                    let result = worker.run(shutdown).await;
                    (name, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((table, Ok(was_skipped))) => {
                        if was_skipped {
                            report.skipped.push(table);
                        } else {
                            report.committed.push(table);
                        }
                    }
                    Ok((table, Err(error))) => {
                        warn!(load_id = %manifest.load_id, table, error = %error, "table load failed");
                        failures.push(error);
                    }
                    Err(join_error) => {
                        failures.push(strata_error!(
                            ErrorKind::Unknown,
                            "A table load worker panicked",
                            source: join_error
                        ));
                    }
                }
            }
        }

        if !failures.is_empty() {
            let committed = report.committed.len() + report.skipped.len();
            let failed = failures.len();
            let source = StrataError::from(failures);
            return Err(strata_error!(
                ErrorKind::PartialLoad,
                "Some tables of the package failed to load",
                format!(
                    "package '{}': {committed} tables committed, {failed} failed",
                    manifest.load_id
                ),
                source: source
            ));
        }

        if report.interrupted {
            info!(load_id = %manifest.load_id, "load interrupted by shutdown, package left pending");
            return Ok(report);
        }

        self.storage.archive(&manifest.load_id)?;
        report.archived = true;
        info!(
            load_id = %manifest.load_id,
            committed = report.committed.len(),
            skipped = report.skipped.len(),
            "load package committed"
        );

        if let Some(hook) = &self.hook {
            hook.on_package_loaded(&manifest.load_id).await?;
        }

        Ok(report)
    }

    /// Makes sure the schema version the package was normalized against is
    /// committed, re-committing its diff when an earlier run crashed between
    /// normalize and commit.
    async fn ensure_schema(&self, manifest: &PackageManifest) -> StrataResult<Arc<SchemaVersion>> {
        loop {
            let current = self.schema_store.current(&manifest.dataset).await?;
            if current.version >= manifest.schema_version {
                return Ok(current);
            }

            let diff = self.storage.read_schema_update(&manifest.load_id)?;
            let candidate = self.schema_store.propose(&manifest.dataset, diff).await?;
            match self.schema_store.commit(candidate).await {
                Ok(committed) => return Ok(committed),
                // Lost the race; re-propose against the new current version.
                Err(error) if error.kind() == ErrorKind::SchemaConflict => continue,
                Err(error) => return Err(error),
            }
        }
    }
}

/// Everything one table load task needs, owned so it can move into the task.
struct TableWorker<T, D> {
    state_store: Arc<T>,
    destination: Arc<D>,
    storage: PackageStorage,
    config: Arc<PipelineConfig>,
    schema: Arc<SchemaVersion>,
    table_diff: TableDiff,
    load_id: String,
    table_name: String,
    table_manifest: TableManifest,
}

impl<T, D> TableWorker<T, D>
where
    T: StateStore + Send + Sync,
    D: Destination + Send + Sync,
{
    /// Drives one table to `Committed`. Returns `true` when the table was
    /// already committed by an earlier run and nothing was done.
    async fn run(&self, mut shutdown: ShutdownRx) -> StrataResult<bool> {
        let result = self.run_inner(&mut shutdown).await;
        if let Err(error) = &result {
            if !error.is_transient() && !is_shutdown(&mut shutdown) {
                // Best effort; the error we report is the load failure.
                let _ = self
                    .state_store
                    .set(&self.load_id, &self.table_name, TableLoadState::Failed)
                    .await;
            }
        }
        result
    }

    async fn run_inner(&self, shutdown: &mut ShutdownRx) -> StrataResult<bool> {
        match self
            .state_store
            .get(&self.load_id, &self.table_name)
            .await?
        {
            TableLoadState::Committed => {
                debug!(load_id = %self.load_id, table = %self.table_name, "table already committed, skipping");
                return Ok(true);
            }
            TableLoadState::Staged => {
                // A staged file must still match its manifest before the
                // commit is re-issued; deterministic row ids make the
                // re-commit itself safe.
                if !self.storage.verify_table(&self.load_id, &self.table_manifest)? {
                    bail!(
                        ErrorKind::InvalidState,
                        "Staged row file does not match its manifest",
                        format!("package '{}', table '{}'", self.load_id, self.table_name)
                    );
                }
            }
            TableLoadState::Failed => {
                // Retries re-enter at the start of the state machine.
                self.state_store
                    .set(&self.load_id, &self.table_name, TableLoadState::New)
                    .await?;
            }
            TableLoadState::New => {}
        }

        let Some(table) = self.schema.table(&self.table_name) else {
            bail!(
                ErrorKind::InvalidState,
                "Package references a table missing from the committed schema",
                format!("package '{}', table '{}'", self.load_id, self.table_name)
            );
        };

        // DDL must be applied and visible before the table's data loads.
        run_with_retry(&self.config.retry, shutdown, "apply_schema", || {
            self.destination.apply_schema(table, &self.table_diff)
        })
        .await?;

        self.state_store
            .set(&self.load_id, &self.table_name, TableLoadState::Staged)
            .await?;

        let rows = self
            .storage
            .read_table_rows(&self.load_id, table, &self.table_manifest)?;
        let disposition = self
            .schema
            .write_disposition(&self.table_name)
            .unwrap_or(WriteDisposition::Append);
        let merge_key = self.merge_key();

        run_with_retry(&self.config.retry, shutdown, "load_table", || {
            self.destination.load_table(TableLoadRequest {
                load_id: self.load_id.clone(),
                table: table.clone(),
                disposition,
                merge_key: merge_key.clone(),
                rows: rows.clone(),
            })
        })
        .await?;

        self.state_store
            .set(&self.load_id, &self.table_name, TableLoadState::Committed)
            .await?;
        debug!(load_id = %self.load_id, table = %self.table_name, rows = rows.len(), "table committed");
        Ok(false)
    }

    /// Merge key configured on the table's root ancestor.
    fn merge_key(&self) -> Option<String> {
        let mut name = self.table_name.as_str();
        loop {
            let table = self.schema.table(name)?;
            match &table.parent {
                Some(parent) => name = parent,
                None => return table.merge_key.clone(),
            }
        }
    }
}

/// Groups the package's tables into waves of equal nesting depth, roots first.
fn tables_by_depth(manifest: &PackageManifest, schema: &SchemaVersion) -> Vec<Vec<String>> {
    let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for name in manifest.tables.keys() {
        let mut depth = 0;
        let mut current = name.as_str();
        while let Some(parent) = schema.table(current).and_then(|table| table.parent.as_deref()) {
            depth += 1;
            current = parent;
        }
        by_depth.entry(depth).or_default().push(name.clone());
    }
    by_depth.into_values().collect()
}
