//! Shared configuration types for strata pipelines.

mod base;
mod batch;
mod normalize;
mod pipeline;
mod retry;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use normalize::{NormalizeConfig, VariantPolicy};
pub use pipeline::PipelineConfig;
pub use retry::RetryConfig;
