/// Errors that can occur while validating configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Maximum table load workers cannot be zero.
    #[error("`max_table_load_workers` cannot be zero")]
    MaxTableLoadWorkersZero,
    /// Maximum retry attempts for destination errors cannot be zero.
    #[error("`max_attempts` cannot be zero")]
    MaxAttemptsZero,
    /// A field holds a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        /// Name of the offending field.
        field: String,
        /// Human readable constraint that was violated.
        constraint: String,
    },
}
