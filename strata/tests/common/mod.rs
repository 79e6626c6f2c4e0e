#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;

use serde_json::json;
use strata::destination::Destination;
use strata::package::PackageStorage;
use strata::pipeline::Pipeline;
use strata::schema::MemorySchemaStore;
use strata::state::FsStateStore;
use strata::types::{Document, DocumentBatch};
use strata_config::shared::{BatchConfig, NormalizeConfig, PipelineConfig, RetryConfig};

static TRACING: Once = Once::new();

/// Initializes tracing once per test binary, honoring `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Pipeline configuration with a fast retry schedule for tests.
pub fn test_config(dataset: &str) -> PipelineConfig {
    PipelineConfig {
        id: 1,
        dataset: dataset.to_string(),
        batch: BatchConfig::default(),
        normalize: NormalizeConfig::default(),
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            operation_timeout_ms: 1_000,
        },
        max_table_load_workers: 2,
        normalize_workers: 2,
    }
}

/// Builds a pipeline over filesystem package and state storage, so resumed
/// runs in the same test observe earlier state.
pub fn build_pipeline<D>(
    dir: &Path,
    dataset: &str,
    destination: D,
) -> Pipeline<MemorySchemaStore, FsStateStore, D>
where
    D: Destination + Send + Sync + 'static,
{
    let storage = PackageStorage::new(dir).unwrap();
    Pipeline::new(
        1,
        test_config(dataset),
        MemorySchemaStore::new(),
        FsStateStore::new(storage.clone()),
        destination,
        storage,
    )
    .unwrap()
}

pub fn event_doc(id: i64, tags: &[&str]) -> Document {
    Document::new("events", json!({"id": id, "tags": tags}))
}

pub fn event_batch(docs: Vec<Document>) -> DocumentBatch {
    DocumentBatch::append(docs)
}
