use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, NormalizeConfig, RetryConfig, ValidationError};

/// Configuration for a strata pipeline.
///
/// Contains all settings required to normalize document batches and load the
/// resulting packages, including buffering thresholds, retry policy and worker
/// limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The unique identifier for this pipeline.
    ///
    /// A pipeline id determines isolation between pipelines in terms of package
    /// storage and state tracking.
    pub id: u64,
    /// Name of the dataset that documents are normalized into.
    pub dataset: String,
    /// Row buffering configuration for the package builder.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Document normalization configuration.
    #[serde(default)]
    pub normalize: NormalizeConfig,
    /// Retry policy for transient destination failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Maximum number of tables loaded concurrently within one package.
    #[serde(default = "default_max_table_load_workers")]
    pub max_table_load_workers: u16,
    /// Number of worker tasks used to normalize a document batch.
    #[serde(default = "default_normalize_workers")]
    pub normalize_workers: u16,
}

impl PipelineConfig {
    /// Default number of concurrent table loads per package.
    pub const DEFAULT_MAX_TABLE_LOAD_WORKERS: u16 = 4;

    /// Default number of normalization workers.
    pub const DEFAULT_NORMALIZE_WORKERS: u16 = 4;

    /// Validates pipeline configuration settings.
    ///
    /// Checks nested configurations and ensures worker counts are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;
        self.normalize.validate()?;
        self.retry.validate()?;

        if self.dataset.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "dataset".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.max_table_load_workers == 0 {
            return Err(ValidationError::MaxTableLoadWorkersZero);
        }

        if self.normalize_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "normalize_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_max_table_load_workers() -> u16 {
    PipelineConfig::DEFAULT_MAX_TABLE_LOAD_WORKERS
}

fn default_normalize_workers() -> u16 {
    PipelineConfig::DEFAULT_NORMALIZE_WORKERS
}
