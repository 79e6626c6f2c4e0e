//! The pipeline: documents in, committed warehouse tables out.
//!
//! One [`Pipeline`] owns the full flow for a dataset: normalize a batch of
//! documents on a worker pool, commit the resulting schema diff, seal the
//! rows into a load package and drive the package into the destination. Each
//! batch becomes exactly one package, and packages left pending by an earlier
//! interrupted run can be resumed without re-normalizing anything.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use strata_config::shared::PipelineConfig;

use crate::concurrency::{ShutdownTx, create_shutdown_channel, is_shutdown};
use crate::destination::Destination;
use crate::error::{ErrorKind, StrataResult};
use crate::hooks::PostLoadHook;
use crate::load::{LoadReport, Loader};
use crate::normalize::{UnpackedDocument, Unpacker};
use crate::package::{LoadIdGenerator, PackageBuilder, PackageStorage};
use crate::schema::{SchemaStore, SchemaVersion};
use crate::source::DocumentSource;
use crate::state::StateStore;
use crate::strata_error;
use crate::types::DocumentBatch;

pub type PipelineId = u64;

/// A document normalization and loading pipeline for one dataset.
pub struct Pipeline<S, T, D> {
    id: PipelineId,
    config: Arc<PipelineConfig>,
    schema_store: Arc<S>,
    destination: Arc<D>,
    storage: PackageStorage,
    unpacker: Unpacker,
    load_ids: LoadIdGenerator,
    loader: Loader<S, T, D>,
    shutdown_tx: ShutdownTx,
}

impl<S, T, D> Pipeline<S, T, D>
where
    S: SchemaStore + Send + Sync + 'static,
    T: StateStore + Send + Sync + 'static,
    D: Destination + Send + Sync + 'static,
{
    /// Creates a pipeline over the given stores and destination.
    ///
    /// Fails with a config error when the configuration does not validate.
    pub fn new(
        id: PipelineId,
        config: PipelineConfig,
        schema_store: S,
        state_store: T,
        destination: D,
        storage: PackageStorage,
    ) -> StrataResult<Self> {
        config.validate().map_err(|err| {
            strata_error!(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                err.to_string()
            )
        })?;

        // The receiver side is recovered via `subscribe` wherever needed.
        let (shutdown_tx, _) = create_shutdown_channel();

        let config = Arc::new(config);
        let schema_store = Arc::new(schema_store);
        let destination = Arc::new(destination);
        let unpacker = Unpacker::new(config.normalize.clone());
        let loader = Loader::new(
            schema_store.clone(),
            Arc::new(state_store),
            destination.clone(),
            storage.clone(),
            config.clone(),
        );

        Ok(Self {
            id,
            config,
            schema_store,
            destination,
            storage,
            unpacker,
            load_ids: LoadIdGenerator::new(),
            loader,
            shutdown_tx,
        })
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Registers a hook invoked after each fully committed package.
    pub fn with_hook(mut self, hook: Arc<dyn PostLoadHook>) -> Self {
        self.loader = self.loader.with_hook(hook);
        self
    }

    /// Signals shutdown to all in-flight work.
    ///
    /// In-flight table commits finish; not-yet-started tables stay pending
    /// and are picked up by [`Pipeline::resume_pending`] on the next run.
    pub fn shutdown(&self) {
        info!(pipeline_id = self.id, "shutting down pipeline");
        let _ = self.shutdown_tx.shutdown();
    }

    /// Signals shutdown and lets the destination flush and close.
    pub async fn shutdown_and_wait(&self) -> StrataResult<()> {
        self.shutdown();
        self.destination.shutdown().await
    }

    /// Drains a document source, loading one package per batch.
    ///
    /// Stops pulling when shutdown is signalled; not-yet-pulled batches stay
    /// in the source, and the batch in flight runs to its usual conclusion.
    pub async fn run_source<Src>(&self, source: &mut Src) -> StrataResult<Vec<LoadReport>>
    where
        Src: DocumentSource,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut reports = Vec::new();
        loop {
            if is_shutdown(&mut shutdown) {
                break;
            }
            let Some(batch) = source.next_batch().await? else {
                break;
            };
            reports.push(self.run_batch(batch).await?);
        }
        Ok(reports)
    }

    /// Normalizes one document batch, seals it as a package and loads it.
    pub async fn run_batch(&self, batch: DocumentBatch) -> StrataResult<LoadReport> {
        let load_id = self.load_ids.next_id();
        let document_count = batch.documents.len();
        info!(
            pipeline_id = self.id,
            dataset = %self.config.dataset,
            load_id,
            documents = document_count,
            "normalizing document batch"
        );

        let schema = self.schema_store.current(&self.config.dataset).await?;
        let unpacked = self.normalize(schema.clone(), batch, &load_id).await?;
        debug!(
            load_id,
            rows = unpacked.row_count(),
            tables = unpacked.rows.len(),
            "batch normalized"
        );

        // Commit the schema before sealing, so the manifest can pin the
        // version its rows were normalized against.
        let committed = self.commit_schema(&unpacked).await?;

        let mut builder = PackageBuilder::new(
            &self.storage,
            &load_id,
            &self.config.dataset,
            self.config.batch.clone(),
        )?;
        self.storage.write_schema_update(&load_id, &unpacked.diff)?;
        builder.push_unpacked(unpacked)?;
        let manifest = builder.finalize(&self.storage, committed.version)?;

        self.loader
            .load_package(&manifest, self.shutdown_tx.subscribe())
            .await
    }

    /// Loads every package a previous run left pending, oldest first.
    pub async fn resume_pending(&self) -> StrataResult<Vec<LoadReport>> {
        let mut reports = Vec::new();
        for load_id in self.storage.list_pending()? {
            let manifest = self.storage.read_manifest(&load_id)?;
            let report = self
                .loader
                .load_package(&manifest, self.shutdown_tx.subscribe())
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Fans the batch out over normalization workers and merges their output.
    ///
    /// Documents are independent, so workers share nothing but the immutable
    /// schema snapshot; their diffs are merged afterwards.
    async fn normalize(
        &self,
        schema: Arc<SchemaVersion>,
        batch: DocumentBatch,
        load_id: &str,
    ) -> StrataResult<UnpackedDocument> {
        let workers = (self.config.normalize_workers.max(1) as usize).min(batch.documents.len());
        if workers <= 1 {
            return self.unpacker.unpack_batch(&schema, &batch, load_id);
        }

        let chunk_size = batch.documents.len().div_ceil(workers);
        let mut documents = batch.documents;
        let mut join_set: JoinSet<StrataResult<UnpackedDocument>> = JoinSet::new();
        while !documents.is_empty() {
            let rest = documents.split_off(chunk_size.min(documents.len()));
            let chunk = DocumentBatch {
                documents: std::mem::replace(&mut documents, rest),
                write_disposition: batch.write_disposition,
                merge_key: batch.merge_key.clone(),
            };
            let unpacker = self.unpacker.clone();
            let schema = schema.clone();
            let load_id = load_id.to_string();
            join_set.spawn(async move { unpacker.unpack_batch(&schema, &chunk, &load_id) });
        }

        let mut merged = UnpackedDocument::default();
        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            let result = joined.map_err(|join_error| {
                strata_error!(
                    ErrorKind::Unknown,
                    "A normalization worker panicked",
                    source: join_error
                )
            })?;
            match result {
                Ok(unpacked) => merged.merge(unpacked)?,
                Err(error) if first_error.is_none() => first_error = Some(error),
                Err(_) => {}
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(merged),
        }
    }

    /// Commits the batch's schema diff with optimistic-concurrency retries.
    async fn commit_schema(&self, unpacked: &UnpackedDocument) -> StrataResult<Arc<SchemaVersion>> {
        if unpacked.diff.is_empty() {
            return self.schema_store.current(&self.config.dataset).await;
        }

        loop {
            let candidate = self
                .schema_store
                .propose(&self.config.dataset, unpacked.diff.clone())
                .await?;
            match self.schema_store.commit(candidate).await {
                Ok(committed) => return Ok(committed),
                // Another package advanced the schema; re-propose against the
                // new current version without re-normalizing.
                Err(error) if error.kind() == ErrorKind::SchemaConflict => continue,
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MemoryDestination;
    use crate::schema::MemorySchemaStore;
    use crate::source::MemorySource;
    use crate::state::MemoryStateStore;
    use crate::test_utils::{FlakyDestination, sample_events_batch};
    use strata_config::shared::{BatchConfig, NormalizeConfig, RetryConfig};

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            id: 1,
            dataset: "analytics".to_string(),
            batch: BatchConfig::default(),
            normalize: NormalizeConfig::default(),
            retry: RetryConfig {
                max_attempts: 4,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                operation_timeout_ms: 1_000,
            },
            max_table_load_workers: 2,
            normalize_workers: 2,
        }
    }

    fn test_pipeline<D>(
        dir: &std::path::Path,
        destination: D,
    ) -> Pipeline<MemorySchemaStore, MemoryStateStore, D>
    where
        D: Destination + Send + Sync + 'static,
    {
        Pipeline::new(
            1,
            test_config(),
            MemorySchemaStore::new(),
            MemoryStateStore::new(),
            destination,
            PackageStorage::new(dir).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn a_batch_flows_from_documents_to_destination_tables() {
        let dir = tempfile::tempdir().unwrap();
        let destination = MemoryDestination::new();
        let pipeline = test_pipeline(dir.path(), destination.clone());

        let report = pipeline.run_batch(sample_events_batch(3)).await.unwrap();
        assert!(report.archived);
        assert_eq!(report.committed.len(), 2);

        assert_eq!(destination.row_count("events").await, 3);
        assert_eq!(destination.row_count("events__tags").await, 6);

        // The nested user object landed as flattened root columns.
        let events = destination.table_rows("events").await;
        assert!(events[0].values.contains_key("user__id"));
        assert!(events[0].values.contains_key("user__active"));
    }

    #[tokio::test]
    async fn transient_destination_failures_are_retried_to_success() {
        let dir = tempfile::tempdir().unwrap();
        let destination = FlakyDestination::wrap(MemoryDestination::new());
        destination
            .fail_loads("events", ErrorKind::DestinationTransient, 2)
            .await;
        let pipeline = test_pipeline(dir.path(), destination.clone());

        let report = pipeline.run_batch(sample_events_batch(2)).await.unwrap();
        assert!(report.archived);
        assert_eq!(destination.load_calls_for("events").await, 3);
    }

    #[tokio::test]
    async fn fatal_failures_surface_as_partial_loads() {
        let dir = tempfile::tempdir().unwrap();
        let destination = FlakyDestination::wrap(MemoryDestination::new());
        destination
            .fail_loads("events__tags", ErrorKind::DestinationFatal, 1)
            .await;
        let pipeline = test_pipeline(dir.path(), destination.clone());

        let err = pipeline.run_batch(sample_events_batch(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialLoad);
        // The root table committed before the child failed.
        assert_eq!(destination.load_calls_for("events").await, 1);
    }

    #[tokio::test]
    async fn a_source_is_drained_one_package_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let destination = MemoryDestination::new();
        let pipeline = test_pipeline(dir.path(), destination.clone());

        let mut source = MemorySource::new([sample_events_batch(2), sample_events_batch(1)]);
        let reports = pipeline.run_source(&mut source).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|report| report.archived));
        assert_eq!(destination.row_count("events").await, 3);
    }

    #[tokio::test]
    async fn shutdown_stops_pulling_batches_from_the_source() {
        use std::collections::VecDeque;

        struct SignallingSource {
            batches: VecDeque<DocumentBatch>,
            shutdown: ShutdownTx,
            pulls: u32,
        }

        impl DocumentSource for SignallingSource {
            fn name() -> &'static str {
                "signalling"
            }

            async fn next_batch(&mut self) -> StrataResult<Option<DocumentBatch>> {
                self.pulls += 1;
                if self.pulls == 2 {
                    let _ = self.shutdown.shutdown();
                }
                Ok(self.batches.pop_front())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let destination = MemoryDestination::new();
        let pipeline = test_pipeline(dir.path(), destination.clone());

        let mut source = SignallingSource {
            batches: (0..3).map(|_| sample_events_batch(1)).collect(),
            shutdown: pipeline.shutdown_tx(),
            pulls: 0,
        };
        let reports = pipeline.run_source(&mut source).await.unwrap();

        // The batch in flight when shutdown fired still ran; the third was
        // never pulled.
        assert_eq!(reports.len(), 2);
        assert_eq!(source.batches.len(), 1);
        assert_eq!(destination.row_count("events").await, 2);
    }

    #[tokio::test]
    async fn shutdown_propagates_to_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = FlakyDestination::wrap(MemoryDestination::new());
        let pipeline = test_pipeline(dir.path(), destination.clone());

        pipeline.shutdown_and_wait().await.unwrap();
        assert!(destination.shutdown_called().await);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.dataset = String::new();

        let err = Pipeline::new(
            1,
            config,
            MemorySchemaStore::new(),
            MemoryStateStore::new(),
            MemoryDestination::new(),
            PackageStorage::new(dir.path()).unwrap(),
        )
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
