use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Row buffering configuration for load package builders.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows buffered for a table before a row file is flushed.
    #[serde(default = "default_batch_max_rows")]
    pub max_rows: usize,
    /// Maximum estimated size, in bytes, of buffered rows before a row file is flushed.
    #[serde(default = "default_batch_max_bytes")]
    pub max_bytes: usize,
}

impl BatchConfig {
    /// Default maximum number of buffered rows per table.
    pub const DEFAULT_MAX_ROWS: usize = 10000;

    /// Default maximum buffered size per table in bytes.
    pub const DEFAULT_MAX_BYTES: usize = 16 * 1024 * 1024;

    /// Validates batch configuration settings.
    ///
    /// Ensures both flush thresholds are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_rows == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_rows".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: default_batch_max_rows(),
            max_bytes: default_batch_max_bytes(),
        }
    }
}

fn default_batch_max_rows() -> usize {
    BatchConfig::DEFAULT_MAX_ROWS
}

fn default_batch_max_bytes() -> usize {
    BatchConfig::DEFAULT_MAX_BYTES
}
