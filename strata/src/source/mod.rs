//! Document sources the pipeline pulls batches from.

pub mod base;
pub mod memory;

pub use base::DocumentSource;
pub use memory::MemorySource;
